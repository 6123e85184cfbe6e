//! Request privacy classification for room selection.
//!
//! The classifier decides how far a request may travel: `public` work
//! can run anywhere, `personal` prefers trusted rooms, `sensitive` is
//! pinned to local execution. The default implementation is a keyword
//! heuristic; the term lists are configuration, not code.

use crate::types::TaskRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivacyLevel {
    Public,
    Personal,
    Sensitive,
}

pub trait PrivacyClassifier: Send + Sync {
    fn classify(&self, request: &TaskRequest) -> PrivacyLevel;
}

/// Keyword-based heuristic classifier.
pub struct KeywordClassifier {
    sensitive_terms: Vec<String>,
    personal_terms: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(sensitive_terms: Vec<String>, personal_terms: Vec<String>) -> Self {
        Self {
            sensitive_terms,
            personal_terms,
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let sensitive = ["password", "ssn", "social security", "medical", "diagnosis",
            "bank account", "credit card", "passport"];
        let personal = ["my ", "me ", "our ", "home", "family", "address", "salary"];
        Self::new(
            sensitive.iter().map(|s| s.to_string()).collect(),
            personal.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl PrivacyClassifier for KeywordClassifier {
    fn classify(&self, request: &TaskRequest) -> PrivacyLevel {
        let mut haystack = request.query.to_lowercase();
        if let Some(summary) = &request.context.conversation_summary {
            haystack.push(' ');
            haystack.push_str(&summary.to_lowercase());
        }

        if self.sensitive_terms.iter().any(|t| haystack.contains(t)) {
            return PrivacyLevel::Sensitive;
        }
        // Attachments are treated as personal by default.
        if !request.context.attachments.is_empty()
            || self.personal_terms.iter().any(|t| haystack.contains(t))
        {
            return PrivacyLevel::Personal;
        }
        PrivacyLevel::Public
    }
}
