//! The synthesis instrument: confidence-weighted merge of upstream
//! instrument results.
//!
//! Consumes `context.input_results`. The merge itself is mechanical
//! (weighted by each input's confidence); the `synthesis` capability is
//! asked for the merged narrative and for contradictions between
//! inputs, which land in `discrepancy`. A low merged confidence earns
//! exactly one re-synthesis pass.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use symphony_db::models::{Outcome, ProcessType};

use crate::context::{Checkpoint, TaskContext};
use crate::error::LoopError;
use crate::instrument::{Instrument, InstrumentSpec};
use crate::termination::TerminationConfig;
use crate::tools::{ToolRegistry, ToolSet, caps};
use crate::types::{ExecutionMetadata, Finding, InstrumentResult};

const MAX_ITERATIONS: u32 = 2;
/// Below this merged confidence the instrument takes its second pass.
const RESYNTHESIS_THRESHOLD: f64 = 0.6;

pub struct SynthesisInstrument {
    spec: InstrumentSpec,
    tools: ToolSet,
    termination: TerminationConfig,
}

impl SynthesisInstrument {
    pub fn new(
        registry: &ToolRegistry,
        termination: TerminationConfig,
    ) -> Result<Self, LoopError> {
        let spec = InstrumentSpec {
            name: "synthesis".to_string(),
            required_capabilities: vec![caps::SYNTHESIS.to_string()],
            optional_capabilities: vec![],
            max_iterations: MAX_ITERATIONS,
            process_type: ProcessType::SemiAutonomic,
        };
        let tools = registry.resolve(&[caps::SYNTHESIS], &[])?;
        Ok(Self {
            spec,
            tools,
            termination,
        })
    }

    /// Confidence-weighted mean of the input confidences: strong inputs
    /// pull the merge toward themselves.
    fn weighted_confidence(inputs: &[InstrumentResult]) -> f64 {
        let weight_sum: f64 = inputs.iter().map(|r| r.confidence).sum();
        if weight_sum <= f64::EPSILON {
            return 0.0;
        }
        inputs
            .iter()
            .map(|r| r.confidence * r.confidence)
            .sum::<f64>()
            / weight_sum
    }

    /// Mechanical merge used when the synthesis tool is unavailable.
    fn fallback_summary(inputs: &[InstrumentResult]) -> String {
        let mut parts: Vec<&InstrumentResult> = inputs.iter().collect();
        parts.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        parts
            .iter()
            .map(|r| r.summary.as_str())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

#[async_trait]
impl Instrument for SynthesisInstrument {
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

        let inputs = &ctx.input_results;
        if inputs.is_empty() {
            metadata.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(InstrumentResult {
                findings: Vec::new(),
                summary: "nothing to synthesize: no input results supplied".to_string(),
                confidence: 0.0,
                outcome: Outcome::Bounded,
                discrepancy: None,
                metadata,
            });
        }

        // Inputs' findings and sources carry over into the merge.
        let mut findings: Vec<Finding> = inputs.iter().flat_map(|r| r.findings.clone()).collect();
        for input in inputs {
            for source in &input.metadata.sources_consulted {
                if !metadata.sources_consulted.contains(source) {
                    metadata.sources_consulted.push(source.clone());
                }
            }
        }
        // Upstream discrepancies survive the merge.
        let mut discrepancy: Option<String> = inputs
            .iter()
            .filter_map(|r| r.discrepancy.clone())
            .reduce(|a, b| format!("{a}; {b}"));

        let base_confidence = Self::weighted_confidence(inputs);
        let mut summary = String::new();
        let mut confidence = base_confidence;

        let payload: Vec<_> = inputs
            .iter()
            .map(|r| {
                json!({
                    "summary": r.summary,
                    "confidence": r.confidence,
                    "outcome": r.outcome,
                    "instrument": r.metadata.instrument_used,
                })
            })
            .collect();

        for iteration in 1..=MAX_ITERATIONS {
            ctx.check_cancelled()?;
            let iter_started = Instant::now();

            let prompt_query = if iteration == 1 {
                query.to_string()
            } else {
                format!("{query} (previous merge was weak: {summary:?}; reconcile the inputs)")
            };

            match self
                .tools
                .call(
                    caps::SYNTHESIS,
                    json!({"query": prompt_query, "results": payload}),
                )
                .await
            {
                Ok(reply) => {
                    summary = reply["summary"]
                        .as_str()
                        .or_else(|| reply["text"].as_str())
                        .unwrap_or_default()
                        .to_string();
                    confidence = reply["confidence"].as_f64().unwrap_or(base_confidence);
                    if let Some(found) = reply["discrepancy"].as_str().filter(|s| !s.is_empty()) {
                        discrepancy = Some(match discrepancy.take() {
                            Some(existing) if !existing.contains(found) => {
                                format!("{existing}; {found}")
                            }
                            Some(existing) => existing,
                            None => found.to_string(),
                        });
                    }
                }
                Err(LoopError::Tool { tool, message }) => {
                    ctx.record_error("tool", format!("{tool}: {message}")).await;
                    summary = Self::fallback_summary(inputs);
                    confidence = (base_confidence * 0.5).min(0.4);
                }
                Err(e) => return Err(e),
            }

            metadata.iterations = iteration;
            ctx.checkpoint(Checkpoint {
                iteration_num: iteration,
                phase: "analysis".to_string(),
                input: json!({"inputs": inputs.len()}),
                output: json!({"confidence": confidence}),
                duration_ms: iter_started.elapsed().as_millis() as u64,
            })
            .await?;

            // One re-synthesis pass on a weak merge; otherwise done.
            if confidence >= RESYNTHESIS_THRESHOLD {
                break;
            }
        }

        findings.push(Finding::new(summary.clone(), confidence));

        let outcome = if discrepancy.is_some() && confidence < self.termination.confidence_threshold
        {
            Outcome::Inconclusive
        } else if confidence >= RESYNTHESIS_THRESHOLD {
            Outcome::Complete
        } else {
            Outcome::Bounded
        };

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
