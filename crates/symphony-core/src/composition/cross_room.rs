//! Cross-room composition: branches delegated to sibling rooms, merged
//! via synthesis.
//!
//! Local and remote rooms are first-class: a branch naming the local
//! room executes in-process. Failed delegations land in the
//! discrepancy and the failover list; if every branch fails the result
//! is `inconclusive`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use symphony_db::models::{Outcome, ProcessType};

use super::{Composition, RoomBranchSpec, fold_metadata};
use crate::conductor::Conductor;
use crate::context::TaskContext;
use crate::error::LoopError;
use crate::types::{ExecutionMetadata, FailoverEvent, InstrumentResult};

const MERGE_INSTRUMENT: &str = "synthesis";

pub struct CrossRoomComposition {
    branches: Vec<RoomBranchSpec>,
}

impl CrossRoomComposition {
    pub fn new(branches: Vec<RoomBranchSpec>) -> Self {
        Self { branches }
    }
}

#[async_trait]
impl Composition for CrossRoomComposition {
    fn name(&self) -> &str {
        "cross_room"
    }

    async fn execute(
        &self,
        query: &str,
        ctx: &TaskContext,
        conductor: &Arc<Conductor>,
    ) -> Result<InstrumentResult, LoopError> {
        if self.branches.is_empty() {
            return Err(LoopError::Validation(
                "cross-room composition has no branches".to_string(),
            ));
        }

        let mut metadata = ExecutionMetadata::new("cross_room", ProcessType::Conscious);
        let mut successes: Vec<InstrumentResult> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        // Branches launch concurrently; results arrive in completion
        // order.
        let mut in_flight: futures::stream::FuturesUnordered<_> = self
            .branches
            .iter()
            .map(|branch| {
                let conductor = Arc::clone(conductor);
                let branch = branch.clone();
                let branch_ctx = ctx.clone();
                async move {
                    let outcome = conductor
                        .delegate_branch(&branch.room_id, &branch.sub_query, &branch_ctx)
                        .await;
                    (branch, outcome)
                }
            })
            .collect();

        use futures::StreamExt;
        while let Some((branch, outcome)) = in_flight.next().await {
            match outcome {
                Ok(result) => {
                    fold_metadata(&mut metadata, &result.metadata);
                    successes.push(result);
                }
                Err(LoopError::Cancelled) => return Err(LoopError::Cancelled),
                Err(e) => {
                    warn!(room_id = %branch.room_id, error = %e, "cross-room branch failed");
                    metadata.failover_events.push(FailoverEvent {
                        room_id: branch.room_id.clone(),
                        error: e.to_string(),
                        ts: Utc::now(),
                    });
                    failures.push(format!("{}: {e}", branch.room_id));
                }
            }
        }
        ctx.check_cancelled()?;

        let failure_note = if failures.is_empty() {
            None
        } else {
            Some(format!("failed rooms: {}", failures.join("; ")))
        };

        if successes.is_empty() {
            return Ok(InstrumentResult {
                findings: Vec::new(),
                summary: "every cross-room branch failed".to_string(),
                confidence: 0.0,
                outcome: Outcome::Inconclusive,
                discrepancy: failure_note,
                metadata,
            });
        }

        let mut merge_ctx = ctx.clone();
        merge_ctx.input_results = successes;
        let merged = conductor
            .execute_instrument(MERGE_INSTRUMENT, query, &merge_ctx)
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
