//! The vision instrument: iterative image analysis over the `vision`
//! capability.
//!
//! Consumes image attachments (base64 payloads or URLs) from the task
//! context. Without a parsable image attachment it exits immediately
//! with `bounded` and a diagnostic summary, making no tool calls.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};

use symphony_db::models::{Outcome, ProcessType};

use crate::context::{Checkpoint, TaskContext};
use crate::error::LoopError;
use crate::instrument::{Instrument, InstrumentSpec};
use crate::termination::{self, Decision, IterationSnapshot, TerminationConfig};
use crate::tools::{ToolRegistry, ToolSet, caps};
use crate::types::{ExecutionMetadata, Finding, InstrumentResult};

const MAX_ITERATIONS: u32 = 3;

pub struct VisionInstrument {
    spec: InstrumentSpec,
    tools: ToolSet,
    termination: TerminationConfig,
}

impl VisionInstrument {
    pub fn new(
        registry: &ToolRegistry,
        termination: TerminationConfig,
    ) -> Result<Self, LoopError> {
        let spec = InstrumentSpec {
            name: "vision".to_string(),
            required_capabilities: vec![caps::VISION.to_string()],
            optional_capabilities: vec![],
            max_iterations: MAX_ITERATIONS,
            process_type: ProcessType::SemiAutonomic,
        };
        let tools = registry.resolve(&[caps::VISION], &[])?;
        Ok(Self {
            spec,
            tools,
            termination,
        })
    }
}

#[async_trait]
impl Instrument for VisionInstrument {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn execute(
        &self,
        query: &str,
        ctx: &TaskContext,
    ) -> Result<InstrumentResult, LoopError> {
        let started = Instant::now();
        let mut metadata = ExecutionMetadata::new(&self.spec.name, self.spec.process_type);

        let images: Vec<Value> = ctx
            .attachments
            .iter()
            .filter(|a| a.is_image())
            .map(|a| {
                json!({
                    "url": a.url,
                    "data": a.data,
                    "media_type": a.media_type,
                })
            })
            .collect();

        if images.is_empty() {
            metadata.duration_ms = started.elapsed().as_millis() as u64;
            let diagnostic = format!(
                "no parsable image attachment among {} attachment(s); \
                 expected a base64 payload or an image URL",
                ctx.attachments.len()
            );
            return Ok(InstrumentResult {
                findings: Vec::new(),
                summary: diagnostic,
                confidence: 0.0,
                outcome: Outcome::Bounded,
                discrepancy: None,
                metadata,
            });
        }

        let max_iterations = ctx.overrides.max_iterations.unwrap_or(MAX_ITERATIONS);
        let mut findings: Vec<Finding> = Vec::new();
        let mut history: Vec<IterationSnapshot> = Vec::new();
        let mut summary = String::new();
        let mut outcome = Outcome::Bounded;
        let mut discrepancy = None;

        for iteration in 1..=max_iterations {
            ctx.check_cancelled()?;
            let iter_started = Instant::now();

            let prompt = if summary.is_empty() {
                query.to_string()
            } else {
                format!("{query}\nPrevious read: {summary}\nLook again and refine.")
            };

            let (text, confidence) = match self
                .tools
                .call(caps::VISION, json!({"prompt": prompt, "images": images}))
                .await
            {
                Ok(reply) => (
                    reply["text"].as_str().unwrap_or_default().to_string(),
                    reply["confidence"].as_f64().unwrap_or(0.0),
                ),
                Err(LoopError::Tool { tool, message }) => {
                    ctx.record_error("tool", format!("{tool}: {message}")).await;
                    (format!("vision degraded: {message}"), 0.1)
                }
                Err(e) => return Err(e),
            };

            if !text.is_empty() {
                summary = text.clone();
                findings.push(Finding::new(text, confidence));
            }

            history.push(IterationSnapshot {
                iteration,
                confidence,
                new_sources: 0,
                contradiction: None,
            });
            metadata.iterations = iteration;

            ctx.checkpoint(Checkpoint {
                iteration_num: iteration,
                phase: "analysis".to_string(),
                input: json!({"images": images.len()}),
                output: json!({"confidence": confidence}),
                duration_ms: iter_started.elapsed().as_millis() as u64,
            })
            .await?;

            match termination::evaluate(&self.termination, &history, max_iterations) {
                Decision::Stop {
                    outcome: stop_outcome,
                    discrepancy: stop_discrepancy,
                } => {
                    outcome = stop_outcome;
                    discrepancy = stop_discrepancy;
                    break;
                }
                Decision::Continue => {}
            }

            tokio::task::yield_now().await;
        }

        let confidence = history.last().map(|s| s.confidence).unwrap_or(0.0);
        metadata.duration_ms = started.elapsed().as_millis() as u64;

        Ok(InstrumentResult {
            findings,
            summary,
            confidence,
            outcome,
            discrepancy,
            metadata,
        })
    }
}
