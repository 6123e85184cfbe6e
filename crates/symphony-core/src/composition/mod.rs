//! Compositions: higher-order loops combining instruments.
//!
//! A composition is any value with `execute(query, ctx, conductor)`.
//! Three variants ship: sequential pipelines, parallel fan-out with a
//! merge instrument, and cross-room delegation. A composition
//! specification ([`ArrangementSpec`]) is serializable and persists in
//! `saved_arrangements` for reuse.
//!
//! All compositions execute as `conscious` work and aggregate their
//! step metadata: iterations sum, sources union, durations sum.

pub mod cross_room;
pub mod parallel;
pub mod sequential;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conductor::Conductor;
use crate::context::TaskContext;
use crate::error::LoopError;
use crate::types::{ExecutionMetadata, InstrumentResult};

pub use cross_room::CrossRoomComposition;
pub use parallel::ParallelComposition;
pub use sequential::SequentialComposition;

/// The duck-typed composition interface, as a small object-safe trait.
#[async_trait]
pub trait Composition: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        query: &str,
        ctx: &TaskContext,
        conductor: &Arc<Conductor>,
    ) -> Result<InstrumentResult, LoopError>;
}

// Compile-time assertion: Composition must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Composition) {}
};

/// Per-step overrides applied before a sequential step and restored
/// after it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StepConfig {
    pub max_iterations: Option<u32>,
    pub confidence_threshold: Option<f64>,
}

/// One step of a sequential pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialStep {
    pub instrument: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<StepConfig>,
}

/// One branch of a cross-room composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomBranchSpec {
    pub room_id: String,
    pub sub_query: String,
}

/// A serializable composition specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArrangementSpec {
    Sequential {
        steps: Vec<SequentialStep>,
    },
    Parallel {
        branches: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    CrossRoom {
        branches: Vec<RoomBranchSpec>,
    },
}

impl ArrangementSpec {
    pub fn build(&self) -> Box<dyn Composition> {
        match self {
            Self::Sequential { steps } => Box::new(SequentialComposition::new(steps.clone())),
            Self::Parallel {
                branches,
                timeout_secs,
            } => {
                let mut composition = ParallelComposition::new(branches.clone());
                if let Some(secs) = timeout_secs {
                    composition =
                        composition.with_branch_timeout(std::time::Duration::from_secs(*secs));
                }
                Box::new(composition)
            }
            Self::CrossRoom { branches } => Box::new(CrossRoomComposition::new(branches.clone())),
        }
    }

    pub fn validate(&self) -> Result<(), LoopError> {
        let empty = match self {
            Self::Sequential { steps } => steps.is_empty(),
            Self::Parallel { branches, .. } => branches.is_empty(),
            Self::CrossRoom { branches } => branches.is_empty(),
        };
        if empty {
            return Err(LoopError::Validation(
                "arrangement has no steps or branches".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fold one part's metadata into the composition's aggregate.
pub(crate) fn fold_metadata(aggregate: &mut ExecutionMetadata, part: &ExecutionMetadata) {
    aggregate.iterations += part.iterations;
    aggregate.duration_ms += part.duration_ms;
    for source in &part.sources_consulted {
        if !aggregate.sources_consulted.contains(source) {
            aggregate.sources_consulted.push(source.clone());
        }
    }
    aggregate
        .failover_events
        .extend(part.failover_events.iter().cloned());
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphony_db::models::ProcessType;

    #[test]
    fn arrangement_spec_roundtrips_through_json() {
        let spec = ArrangementSpec::Sequential {
            steps: vec![
                SequentialStep {
                    instrument: "research".to_string(),
                    config: Some(StepConfig {
                        max_iterations: Some(2),
                        confidence_threshold: None,
                    }),
                },
                SequentialStep {
                    instrument: "synthesis".to_string(),
                    config: None,
                },
            ],
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "sequential");
        let back: ArrangementSpec = serde_json::from_value(json).unwrap();
        match back {
            ArrangementSpec::Sequential { steps } => {
                assert_eq!(steps.len(), 2);
                assert_eq!(steps[0].config.unwrap().max_iterations, Some(2));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn empty_arrangements_fail_validation() {
        let spec = ArrangementSpec::Parallel {
            branches: vec![],
            timeout_secs: None,
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn fold_metadata_sums_and_unions() {
        let mut aggregate = ExecutionMetadata::new("sequential", ProcessType::Conscious);
        let mut a = ExecutionMetadata::new("research", ProcessType::SemiAutonomic);
        a.iterations = 3;
        a.duration_ms = 100;
        a.sources_consulted = vec!["https://a".to_string(), "https://b".to_string()];
        let mut b = ExecutionMetadata::new("synthesis", ProcessType::SemiAutonomic);
        b.iterations = 1;
        b.duration_ms = 50;
        b.sources_consulted = vec!["https://b".to_string(), "https://c".to_string()];

        fold_metadata(&mut aggregate, &a);
        fold_metadata(&mut aggregate, &b);

        assert_eq!(aggregate.iterations, 4);
        assert_eq!(aggregate.duration_ms, 150);
        assert_eq!(
            aggregate.sources_consulted,
            vec!["https://a", "https://b", "https://c"]
        );
    }
}
