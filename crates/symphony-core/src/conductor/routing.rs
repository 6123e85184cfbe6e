//! Query -> instrument routing.
//!
//! First match wins: image attachments go to vision, research intent or
//! long queries go to research, everything else is a note.

use symphony_db::models::ProcessType;

use crate::types::{IntentType, TaskRequest};

/// Queries longer than this are routed to research regardless of intent.
const LONG_QUERY_CHARS: usize = 200;

pub fn analyze_and_route(request: &TaskRequest) -> &'static str {
    if request.context.attachments.iter().any(|a| a.is_image()) {
        return "vision";
    }

    let research_intent = request
        .intent
        .as_ref()
        .is_some_and(|i| i.kind == IntentType::Research);
    if research_intent || request.query.chars().count() > LONG_QUERY_CHARS {
        return "research";
    }

    "note"
}

/// Observability classification per routed instrument. Compositions are
/// always `conscious`; unknown names default to `semi_autonomic`.
pub fn process_type_for(instrument: &str) -> ProcessType {
    match instrument {
        "note" => ProcessType::Autonomic,
        "research" => ProcessType::SemiAutonomic,
        _ => ProcessType::SemiAutonomic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attachment, Intent};

    #[test]
    fn image_attachment_routes_to_vision() {
        let mut request = TaskRequest::from_query("what is this");
        request.context.attachments.push(Attachment {
            url: Some("https://example.com/cat.png".to_string()),
            ..Default::default()
        });
        assert_eq!(analyze_and_route(&request), "vision");
    }

    #[test]
    fn vision_wins_over_research_intent() {
        let mut request = TaskRequest::from_query("research this image");
        request.intent = Some(Intent {
            kind: IntentType::Research,
            urgency: None,
            success_criteria: None,
            confidence: None,
            inferred: false,
        });
        request.context.attachments.push(Attachment {
            data: Some("aGVsbG8=".to_string()),
            ..Default::default()
        });
        assert_eq!(analyze_and_route(&request), "vision");
    }

    #[test]
    fn research_intent_routes_to_research() {
        let mut request = TaskRequest::from_query("short question");
        request.intent = Some(Intent {
            kind: IntentType::Research,
            urgency: None,
            success_criteria: None,
            confidence: None,
            inferred: true,
        });
        assert_eq!(analyze_and_route(&request), "research");
    }

    #[test]
    fn long_query_routes_to_research() {
        let request = TaskRequest::from_query("x".repeat(201));
        assert_eq!(analyze_and_route(&request), "research");
    }

    #[test]
    fn short_plain_query_is_a_note() {
        let request = TaskRequest::from_query("what time is it in lisbon");
        assert_eq!(analyze_and_route(&request), "note");
    }

    #[test]
    fn non_image_attachment_does_not_trigger_vision() {
        let mut request = TaskRequest::from_query("summarize this");
        request.context.attachments.push(Attachment {
            url: Some("https://example.com/report.pdf".to_string()),
            ..Default::default()
        });
        assert_eq!(analyze_and_route(&request), "note");
    }

    #[test]
    fn process_types_follow_the_instrument() {
        assert_eq!(process_type_for("note"), ProcessType::Autonomic);
        assert_eq!(process_type_for("research"), ProcessType::SemiAutonomic);
        assert_eq!(process_type_for("someloop"), ProcessType::SemiAutonomic);
    }
}
