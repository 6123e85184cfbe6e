//! Classified error kinds for the execution core.
//!
//! Propagation policy: errors inside a single iteration are recovered
//! into a low-confidence finding where possible; errors across a whole
//! loop collapse to a `bounded` or `inconclusive` outcome; errors
//! crossing a composition boundary fail fast for sequential steps and
//! aggregate for parallel branches. Anything unclassified becomes
//! [`LoopError::Internal`] and fails the task with full detail stored.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoopError {
    /// A required capability has no registered tool. Fatal at
    /// instrument construction; no task runs.
    #[error("required capabilities unsatisfied: {missing:?}")]
    Capability { missing: Vec<String> },

    /// A spawn attempt beyond the depth limit.
    #[error("spawn depth {depth} exceeds limit {max_depth}")]
    DepthExceeded { depth: u32, max_depth: u32 },

    /// A remote room failed to execute a delegated sub-task. Recovered
    /// locally by the conductor; never surfaced as a task failure unless
    /// local execution also fails.
    #[error("room delegation failed: {0}")]
    Delegation(String),

    /// A tool call failed after the tool's own retry policy was
    /// exhausted.
    #[error("tool {tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// Cancellation observed at an iteration boundary or spawn point.
    #[error("task cancelled")]
    Cancelled,

    /// Malformed request; surfaced as HTTP 400, no task created.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Any unclassified failure in a worker.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LoopError {
    /// Stable kind tag used by the error-learning store.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Capability { .. } => "capability",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::Delegation(_) => "delegation",
            Self::Tool { .. } => "tool",
            Self::Cancelled => "cancelled",
            Self::Validation(_) => "validation",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let err = LoopError::DepthExceeded {
            depth: 3,
            max_depth: 2,
        };
        assert_eq!(err.kind(), "depth_exceeded");
        assert_eq!(err.to_string(), "spawn depth 3 exceeds limit 2");

        let err = LoopError::Capability {
            missing: vec!["web_search".to_string()],
        };
        assert_eq!(err.kind(), "capability");
    }
}
