//! Dynamically registered loop specifications.
//!
//! A [`LoopSpec`] is a JSON document describing a phase-based loop:
//! each iteration runs the phases in order, each phase exercising one
//! capability. The last phase's confidence feeds the termination
//! evaluator. This is how deployments add instruments beyond the
//! baseline four without recompiling.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use symphony_db::models::{Outcome, ProcessType};

use crate::context::{Checkpoint, TaskContext};
use crate::error::LoopError;
use crate::instrument::{Instrument, InstrumentSpec};
use crate::termination::{self, Decision, IterationSnapshot, TerminationConfig};
use crate::tools::{ToolRegistry, ToolSet};
use crate::types::{ExecutionMetadata, Finding, InstrumentResult};

/// One phase of a dynamic loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    /// Capability exercised by this phase.
    pub capability: String,
    /// Prompt template; `{query}` and `{previous}` are substituted.
    pub prompt: String,
}

/// A phase-based loop definition, loadable from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub max_iterations: u32,
    #[serde(default = "default_process_type")]
    pub process_type: ProcessType,
    pub phases: Vec<PhaseSpec>,
}

fn default_process_type() -> ProcessType {
    ProcessType::SemiAutonomic
}

impl LoopSpec {
    pub fn from_json(raw: &str) -> Result<Self, LoopError> {
        let spec: Self = serde_json::from_str(raw)
            .map_err(|e| LoopError::Validation(format!("invalid loop spec: {e}")))?;
        if spec.phases.is_empty() {
            return Err(LoopError::Validation(format!(
                "loop spec {:?} has no phases",
                spec.name
            )));
        }
        if spec.max_iterations == 0 {
            return Err(LoopError::Validation(format!(
                "loop spec {:?} has a zero iteration budget",
                spec.name
            )));
        }
        Ok(spec)
    }

    fn required_capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = Vec::new();
        for phase in &self.phases {
            if !caps.contains(&phase.capability) {
                caps.push(phase.capability.clone());
            }
        }
        caps
    }
}

pub struct DynamicLoopInstrument {
    spec: InstrumentSpec,
    phases: Vec<PhaseSpec>,
    tools: ToolSet,
    termination: TerminationConfig,
}

impl DynamicLoopInstrument {
    pub fn new(
        registry: &ToolRegistry,
        loop_spec: &LoopSpec,
        termination: TerminationConfig,
    ) -> Result<Self, LoopError> {
        let required = loop_spec.required_capabilities();
        let required_refs: Vec<&str> = required.iter().map(String::as_str).collect();
        let tools = registry.resolve(&required_refs, &[])?;

        let spec = InstrumentSpec {
            name: loop_spec.name.clone(),
            required_capabilities: required,
            optional_capabilities: vec![],
            max_iterations: loop_spec.max_iterations,
            process_type: loop_spec.process_type,
        };

        Ok(Self {
            spec,
            phases: loop_spec.phases.clone(),
            tools,
            termination,
        })
    }
}

#[async_trait]
impl Instrument for DynamicLoopInstrument {
    fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    async fn execute(
        &self,
        query: &str,
        ctx: &TaskContext,
    ) -> Result<InstrumentResult, LoopError> {
        let started = Instant::now();
        let max_iterations = ctx
            .overrides
            .max_iterations
            .unwrap_or(self.spec.max_iterations);

        let mut metadata = ExecutionMetadata::new(&self.spec.name, self.spec.process_type);
        let mut findings: Vec<Finding> = Vec::new();
        let mut history: Vec<IterationSnapshot> = Vec::new();
        let mut previous = String::new();
        let mut outcome = Outcome::Bounded;
        let mut discrepancy = None;

        for iteration in 1..=max_iterations {
            ctx.check_cancelled()?;
            let iter_started = Instant::now();
            let mut confidence = 0.0;
            let mut last_phase = "";

            for phase in &self.phases {
                let prompt = phase
                    .prompt
                    .replace("{query}", query)
                    .replace("{previous}", &previous);

                match self
                    .tools
                    .call(&phase.capability, json!({"prompt": prompt, "mode": phase.name}))
                    .await
                {
                    Ok(reply) => {
                        if let Some(text) = reply["text"].as_str().filter(|t| !t.is_empty()) {
                            previous = text.to_string();
                            confidence = reply["confidence"].as_f64().unwrap_or(confidence);
                            findings.push(Finding::new(text, confidence));
                        }
                    }
                    Err(LoopError::Tool { tool, message }) => {
                        ctx.record_error("tool", format!("{tool}: {message}")).await;
                        findings.push(Finding::new(
                            format!("phase {} degraded: {message}", phase.name),
                            0.1,
                        ));
                    }
                    Err(e) => return Err(e),
                }
                last_phase = &phase.name;
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
                phase: last_phase.to_string(),
                input: json!({"query": query}),
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
            summary: previous,
            confidence,
            outcome,
            discrepancy,
            metadata,
        })
    }
}
