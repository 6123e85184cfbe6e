//! The note instrument: a single autonomic reasoning pass.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use symphony_db::models::{Outcome, ProcessType};

use crate::context::TaskContext;
use crate::error::LoopError;
use crate::instrument::{Instrument, InstrumentSpec};
use crate::tools::{ToolRegistry, ToolSet, caps};
use crate::types::{ExecutionMetadata, Finding, InstrumentResult};

/// Confidence at or above which a direct answer counts as `complete`.
const DIRECT_ANSWER_THRESHOLD: f64 = 0.7;

#[derive(Debug)]
pub struct NoteInstrument {
    spec: InstrumentSpec,
    tools: ToolSet,
}

impl NoteInstrument {
    pub fn new(registry: &ToolRegistry) -> Result<Self, LoopError> {
        let spec = InstrumentSpec {
            name: "note".to_string(),
            required_capabilities: vec![caps::REASONING.to_string()],
            optional_capabilities: vec![],
            max_iterations: 1,
            process_type: ProcessType::Autonomic,
        };
        let tools = registry.resolve(&[caps::REASONING], &[])?;
        Ok(Self { spec, tools })
    }
}

#[async_trait]
impl Instrument for NoteInstrument {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn execute(
        &self,
        query: &str,
        ctx: &TaskContext,
    ) -> Result<InstrumentResult, LoopError> {
        ctx.check_cancelled()?;
        let started = Instant::now();

        let mut metadata = ExecutionMetadata::new(&self.spec.name, self.spec.process_type);
        metadata.iterations = 1;

        let (text, confidence) = match self
            .tools
            .call(caps::REASONING, json!({"prompt": query, "mode": "answer"}))
            .await
        {
            Ok(reply) => (
                reply["text"].as_str().unwrap_or_default().to_string(),
                reply["confidence"].as_f64().unwrap_or(0.0),
            ),
            Err(LoopError::Tool { tool, message }) => {
                ctx.record_error("tool", format!("{tool}: {message}")).await;
                (format!("reasoning unavailable: {message}"), 0.1)
            }
            Err(e) => return Err(e),
        };

        let outcome = if confidence >= DIRECT_ANSWER_THRESHOLD {
            Outcome::Complete
        } else {
            Outcome::Bounded
        };

        metadata.duration_ms = started.elapsed().as_millis() as u64;

        Ok(InstrumentResult {
            findings: vec![Finding::new(text.clone(), confidence)],
            summary: text,
            confidence,
            outcome,
            discrepancy: None,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use crate::tools::Tool;
    use crate::types::{Preferences, RequestContext};
    use anyhow::Result;
    use serde_json::Value;
    use std::sync::Arc;
    use uuid::Uuid;

    struct ScriptedReasoner {
        confidence: f64,
    }

    #[async_trait]
    impl Tool for ScriptedReasoner {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> &[&'static str] {
            &[caps::REASONING]
        }

        async fn call(&self, _capability: &str, _input: Value) -> Result<Value, LoopError> {
            Ok(json!({"text": "the answer", "confidence": self.confidence}))
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new(
            "t1",
            Uuid::new_v4(),
            None,
            &RequestContext::default(),
            None,
            Preferences::default(),
            3,
        )
    }

    fn registry(confidence: f64) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ScriptedReasoner { confidence }));
        registry
    }

    #[tokio::test]
    async fn confident_answer_is_complete() {
        let note = NoteInstrument::new(&registry(0.9)).unwrap();
        let result = note.execute("what is rust", &ctx()).await.unwrap();
        assert_eq!(result.outcome, Outcome::Complete);
        assert_eq!(result.metadata.iterations, 1);
        assert_eq!(result.summary, "the answer");
    }

    #[tokio::test]
    async fn hesitant_answer_is_bounded() {
        let note = NoteInstrument::new(&registry(0.4)).unwrap();
        let result = note.execute("what is rust", &ctx()).await.unwrap();
        assert_eq!(result.outcome, Outcome::Bounded);
    }

    #[test]
    fn missing_reasoning_capability_is_fatal() {
        let registry = ToolRegistry::new();
        let err = NoteInstrument::new(&registry).unwrap_err();
        assert!(matches!(err, LoopError::Capability { .. }));
    }
}
