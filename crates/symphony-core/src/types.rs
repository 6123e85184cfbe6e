//! Wire and runtime data types shared across the core.
//!
//! `TaskRequest` is what clients submit (snake_case JSON); the runtime
//! envelope with callbacks lives in [`crate::context`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use symphony_db::models::{Outcome, ProcessType};

// ---------------------------------------------------------------------------
// Request side
// ---------------------------------------------------------------------------

/// How much work the caller wants spent on the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Thoroughness {
    Quick,
    #[default]
    Balanced,
    Thorough,
}

/// Declared intent category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Decision,
    Research,
    Action,
    Curiosity,
    Validation,
}

/// Declared urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Immediate,
    Soon,
    Planning,
    Exploratory,
}

/// Caller-declared (or upstream-inferred) intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub kind: IntentType,
    pub urgency: Option<Urgency>,
    pub success_criteria: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub inferred: bool,
}

/// Execution preferences.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Preferences {
    #[serde(default)]
    pub thoroughness: Thoroughness,
    /// 0 = plan approval, 1 = auto with full visibility, 2 = auto with
    /// minimal surface. `None` falls back to the user profile level.
    pub trust_level: Option<i16>,
    #[serde(default)]
    pub notify_on_complete: bool,
    pub max_spawn_depth: Option<u32>,
}

/// An attachment reference: either an inline base64 payload or a URL.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Attachment {
    pub url: Option<String>,
    /// Base64-encoded payload.
    pub data: Option<String>,
    pub media_type: Option<String>,
}

impl Attachment {
    /// Whether this attachment can be consumed as an image.
    pub fn is_image(&self) -> bool {
        if let Some(mt) = &self.media_type {
            return mt.starts_with("image/");
        }
        if self.data.is_some() {
            // Inline payloads without a media type are assumed to be images.
            return true;
        }
        if let Some(url) = &self.url {
            let lower = url.to_ascii_lowercase();
            return [".png", ".jpg", ".jpeg", ".gif", ".webp"]
                .iter()
                .any(|ext| lower.split('?').next().unwrap_or("").ends_with(ext));
        }
        false
    }
}

/// Structured context envelope submitted with a request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestContext {
    pub app_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_summary: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub location: Option<String>,
    pub goal: Option<String>,
    pub intent: Option<String>,
    /// Upstream instrument results, consumed by synthesis.
    #[serde(default)]
    pub input_results: Vec<InstrumentResult>,
}

/// The unit of work clients submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Caller-supplied identifier; generated when absent.
    pub id: Option<String>,
    pub query: String,
    #[serde(default)]
    pub context: RequestContext,
    pub intent: Option<Intent>,
    #[serde(default)]
    pub preferences: Preferences,
}

impl TaskRequest {
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            id: None,
            query: query.into(),
            context: RequestContext::default(),
            intent: None,
            preferences: Preferences::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result side
// ---------------------------------------------------------------------------

/// One piece of evidence accumulated by an instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub content: String,
    pub source: Option<String>,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl Finding {
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            source: None,
            confidence,
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// One remote-delegation failure, carried in the execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub room_id: String,
    pub error: String,
    pub ts: DateTime<Utc>,
}

/// How an instrument execution went, mechanically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub instrument_used: String,
    pub iterations: u32,
    pub duration_ms: u64,
    pub sources_consulted: Vec<String>,
    pub process_type: ProcessType,
    pub room_id: Option<String>,
    #[serde(default)]
    pub failover_events: Vec<FailoverEvent>,
}

impl ExecutionMetadata {
    pub fn new(instrument: impl Into<String>, process_type: ProcessType) -> Self {
        Self {
            instrument_used: instrument.into(),
            iterations: 0,
            duration_ms: 0,
            sources_consulted: Vec::new(),
            process_type,
            room_id: None,
            failover_events: Vec::new(),
        }
    }
}

/// Per-instrument terminal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentResult {
    pub findings: Vec<Finding>,
    pub summary: String,
    pub confidence: f64,
    pub outcome: Outcome,
    pub discrepancy: Option<String>,
    pub metadata: ExecutionMetadata,
}

/// User-visible wrap of an [`InstrumentResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub request_id: String,
    pub summary: String,
    pub confidence: f64,
    pub outcome: Outcome,
    pub findings: Vec<Finding>,
    pub discrepancy: Option<String>,
    pub metadata: ExecutionMetadata,
    pub suggested_followups: Vec<String>,
}

/// Plan presented to the caller when a trust-0 task is held for
/// approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub task_id: String,
    pub query: String,
    pub instrument: String,
    pub process_type: ProcessType,
    pub estimated_iterations: u32,
    pub description: String,
    pub requires_approval: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_deserializes_with_defaults() {
        let request: TaskRequest =
            serde_json::from_value(json!({"query": "what is rust"})).unwrap();
        assert!(request.id.is_none());
        assert_eq!(request.preferences.thoroughness, Thoroughness::Balanced);
        assert!(request.preferences.trust_level.is_none());
        assert!(request.context.attachments.is_empty());
    }

    #[test]
    fn intent_type_field_uses_type_key() {
        let intent: Intent = serde_json::from_value(json!({
            "type": "research",
            "urgency": "soon"
        }))
        .unwrap();
        assert_eq!(intent.kind, IntentType::Research);
        assert!(!intent.inferred);
    }

    #[test]
    fn attachment_image_detection() {
        let url_image = Attachment {
            url: Some("https://example.com/photo.JPG?size=large".to_string()),
            ..Default::default()
        };
        assert!(url_image.is_image());

        let typed = Attachment {
            url: Some("https://example.com/blob".to_string()),
            media_type: Some("image/png".to_string()),
            ..Default::default()
        };
        assert!(typed.is_image());

        let pdf = Attachment {
            url: Some("https://example.com/doc.pdf".to_string()),
            ..Default::default()
        };
        assert!(!pdf.is_image());

        let inline = Attachment {
            data: Some("aGVsbG8=".to_string()),
            ..Default::default()
        };
        assert!(inline.is_image());
    }
}
