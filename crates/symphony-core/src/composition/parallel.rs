//! Parallel fan-out: branches run concurrently under per-branch
//! timeouts, then fan in through a merge instrument.
//!
//! Branches are unordered until fan-in; the merge instrument sees the
//! successful results in completion order. Partial failure merges what
//! succeeded and lists the failures in `discrepancy`; total failure is
//! `inconclusive`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use symphony_db::models::{Outcome, ProcessType};

use super::{Composition, fold_metadata};
use crate::conductor::Conductor;
use crate::context::TaskContext;
use crate::error::LoopError;
use crate::types::{ExecutionMetadata, InstrumentResult};

const DEFAULT_BRANCH_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MERGE_INSTRUMENT: &str = "synthesis";

pub struct ParallelComposition {
    branches: Vec<String>,
    branch_timeout: Duration,
    merge_instrument: String,
}

impl ParallelComposition {
    pub fn new(branches: Vec<String>) -> Self {
        Self {
            branches,
            branch_timeout: DEFAULT_BRANCH_TIMEOUT,
            merge_instrument: DEFAULT_MERGE_INSTRUMENT.to_string(),
        }
    }

    pub fn with_branch_timeout(mut self, timeout: Duration) -> Self {
        self.branch_timeout = timeout;
        self
    }

    pub fn with_merge_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.merge_instrument = instrument.into();
        self
    }
}

#[async_trait]
impl Composition for ParallelComposition {
    fn name(&self) -> &str {
        "parallel"
    }

    async fn execute(
        &self,
        query: &str,
        ctx: &TaskContext,
        conductor: &Arc<Conductor>,
    ) -> Result<InstrumentResult, LoopError> {
        if self.branches.is_empty() {
            return Err(LoopError::Validation(
                "parallel composition has no branches".to_string(),
            ));
        }
        ctx.check_cancelled()?;

        let mut metadata = ExecutionMetadata::new("parallel", ProcessType::Conscious);

        // Launch every branch; FuturesUnordered yields them in
        // completion order, which is the order the merge sees.
        let mut in_flight: FuturesUnordered<_> = self
            .branches
            .iter()
            .map(|branch| {
                let conductor = Arc::clone(conductor);
                let branch = branch.clone();
                let branch_ctx = ctx.clone();
                let query = query.to_string();
                let timeout = self.branch_timeout;
                async move {
                    let outcome = tokio::time::timeout(
                        timeout,
                        conductor.execute_instrument(&branch, &query, &branch_ctx),
                    )
                    .await;
                    (branch, outcome)
                }
            })
            .collect();

        let mut successes: Vec<InstrumentResult> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        while let Some((branch, outcome)) = in_flight.next().await {
            match outcome {
                Ok(Ok(result)) => {
                    debug!(branch = %branch, outcome = %result.outcome, "parallel branch finished");
                    fold_metadata(&mut metadata, &result.metadata);
                    successes.push(result);
                }
                Ok(Err(LoopError::Cancelled)) => return Err(LoopError::Cancelled),
                Ok(Err(e)) => {
                    warn!(branch = %branch, error = %e, "parallel branch failed");
                    failures.push(format!("{branch}: {e}"));
                }
                Err(_elapsed) => {
                    warn!(branch = %branch, timeout = ?self.branch_timeout, "parallel branch timed out");
                    failures.push(format!(
                        "{branch}: timed out after {:?}",
                        self.branch_timeout
                    ));
                }
            }
        }
        ctx.check_cancelled()?;

        let failure_note = if failures.is_empty() {
            None
        } else {
            Some(format!("failed branches: {}", failures.join("; ")))
        };

        if successes.is_empty() {
            return Ok(InstrumentResult {
                findings: Vec::new(),
                summary: "every parallel branch failed".to_string(),
                confidence: 0.0,
                outcome: Outcome::Inconclusive,
                discrepancy: failure_note,
                metadata,
            });
        }

        // Fan in through the merge instrument.
        let mut merge_ctx = ctx.clone();
        merge_ctx.input_results = successes;
        let merged = conductor
            .execute_instrument(&self.merge_instrument, query, &merge_ctx)
            .await?;
        fold_metadata(&mut metadata, &merged.metadata);

        let discrepancy = match (failure_note, merged.discrepancy) {
            (Some(f), Some(d)) => Some(format!("{d}; {f}")),
            (Some(f), None) => Some(f),
            (None, d) => d,
        };

        Ok(InstrumentResult {
            findings: merged.findings,
            summary: merged.summary,
            confidence: merged.confidence,
            outcome: merged.outcome,
            discrepancy,
            metadata,
        })
    }
}
