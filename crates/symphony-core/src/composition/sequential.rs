//! Sequential pipeline: each step's result feeds the next step's
//! `input_results`.
//!
//! Step k+1 never starts before step k terminates. An `inconclusive`
//! step halts the pipeline early and its discrepancy becomes the
//! pipeline's. Per-step config overrides apply to that step only;
//! sibling steps see the defaults.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use symphony_db::models::{Outcome, ProcessType};

use super::{Composition, SequentialStep, fold_metadata};
use crate::conductor::Conductor;
use crate::context::{InstrumentOverrides, TaskContext};
use crate::error::LoopError;
use crate::types::{ExecutionMetadata, InstrumentResult};

pub struct SequentialComposition {
    steps: Vec<SequentialStep>,
}

impl SequentialComposition {
    pub fn new(steps: Vec<SequentialStep>) -> Self {
        Self { steps }
    }
}

#[async_trait]
impl Composition for SequentialComposition {
    fn name(&self) -> &str {
        "sequential"
    }

    async fn execute(
        &self,
        query: &str,
        ctx: &TaskContext,
        conductor: &Arc<Conductor>,
    ) -> Result<InstrumentResult, LoopError> {
        if self.steps.is_empty() {
            return Err(LoopError::Validation(
                "sequential composition has no steps".to_string(),
            ));
        }

        let mut metadata = ExecutionMetadata::new("sequential", ProcessType::Conscious);
        let mut previous: Option<InstrumentResult> = None;

        for (index, step) in self.steps.iter().enumerate() {
            ctx.check_cancelled()?;

            // The override is scoped to this step; the context handed to
            // the next step is rebuilt from the original.
            let mut step_ctx = ctx.clone();
            step_ctx.input_results = previous.take().map(|r| vec![r]).unwrap_or_default();
            step_ctx.overrides = match step.config {
                Some(config) => InstrumentOverrides {
                    max_iterations: config.max_iterations,
                    confidence_threshold: config.confidence_threshold,
                },
                None => InstrumentOverrides::default(),
            };

            debug!(step = index, instrument = %step.instrument, "sequential step starting");
            let result = conductor
                .execute_instrument(&step.instrument, query, &step_ctx)
                .await?;
            fold_metadata(&mut metadata, &result.metadata);

            if result.outcome == Outcome::Inconclusive {
                // Halt early: the contradiction propagates as-is.
                debug!(step = index, "sequential step inconclusive, halting pipeline");
                return Ok(InstrumentResult {
                    findings: result.findings,
                    summary: result.summary,
                    confidence: result.confidence,
                    outcome: Outcome::Inconclusive,
                    discrepancy: result.discrepancy,
                    metadata,
                });
            }

            previous = Some(result);
        }

        // The loop always leaves the last step's result here.
        let last = previous.expect("sequential pipeline ran at least one step");
        Ok(InstrumentResult {
            findings: last.findings,
            summary: last.summary,
            confidence: last.confidence,
            outcome: last.outcome,
            discrepancy: last.discrepancy,
            metadata,
        })
    }
}
