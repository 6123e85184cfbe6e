//! Composition tests: sequential pipelines, parallel fan-out with
//! partial failure, and metadata aggregation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use symphony_db::mem::MemStore;
use symphony_db::models::Outcome;
use symphony_db::store::Store;

use symphony_core::approval::ApprovalStore;
use symphony_core::bus::EventBus;
use symphony_core::composition::{
    ArrangementSpec, Composition, ParallelComposition, SequentialComposition, SequentialStep,
    StepConfig,
};
use symphony_core::conductor::{Conductor, ConductorConfig};
use symphony_core::context::TaskContext;
use symphony_core::error::LoopError;
use symphony_core::instrument::{InstrumentCatalog, LoopSpec};
use symphony_core::manager::TaskManager;
use symphony_core::rooms::KeywordClassifier;
use symphony_core::termination::TerminationConfig;
use symphony_core::tools::{Tool, ToolRegistry, caps};
use symphony_core::trust::TrustTracker;
use symphony_core::types::{Preferences, RequestContext};

// ===========================================================================
// Scripted tools
// ===========================================================================

struct ScriptedTool {
    tool_name: String,
    tool_caps: Vec<&'static str>,
    delay: Duration,
    confidence: f64,
    contradiction: Option<&'static str>,
    synthesis_calls: Arc<AtomicU32>,
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn capabilities(&self) -> &[&'static str] {
        &self.tool_caps
    }

    async fn call(&self, capability: &str, input: Value) -> Result<Value, LoopError> {
        tokio::time::sleep(self.delay).await;
        if capability == caps::SYNTHESIS {
            self.synthesis_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(json!({
                "summary": "merged branches",
                "confidence": 0.9,
            }));
        }
        if capability == caps::WEB_SEARCH {
            let q = input["query"].as_str().unwrap_or("").len();
            return Ok(json!({"results": [
                {"title": "doc", "url": format!("https://example.com/{q}"), "snippet": "s"}
            ]}));
        }
        if input["mode"] == "hypothesize" {
            return Ok(json!({"text": "hypothesis", "confidence": 0.5}));
        }
        let mut reply = json!({"text": "analysis", "confidence": self.confidence});
        if let Some(c) = self.contradiction {
            reply["contradiction"] = json!(c);
            reply["contradiction_severity"] = json!(0.9);
        }
        Ok(reply)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

struct StallTool;

#[async_trait]
impl Tool for StallTool {
    fn name(&self) -> &str {
        "stall"
    }

    fn capabilities(&self) -> &[&'static str] {
        &["stall_probe"]
    }

    async fn call(&self, _capability: &str, _input: Value) -> Result<Value, LoopError> {
        // Far beyond any branch timeout used in these tests.
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(json!({}))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ===========================================================================
// Harness
// ===========================================================================

fn build_conductor(
    confidence: f64,
    contradiction: Option<&'static str>,
    synthesis_calls: Arc<AtomicU32>,
    with_stall_loop: bool,
) -> Arc<Conductor> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ScriptedTool {
        tool_name: "brain".to_string(),
        tool_caps: vec![caps::REASONING, caps::VISION, caps::SYNTHESIS],
        delay: Duration::from_millis(1),
        confidence,
        contradiction,
        synthesis_calls,
    }));
    registry.register(Arc::new(ScriptedTool {
        tool_name: "search".to_string(),
        tool_caps: vec![caps::WEB_SEARCH],
        delay: Duration::from_millis(1),
        confidence,
        contradiction: None,
        synthesis_calls: Arc::new(AtomicU32::new(0)),
    }));
    registry.register(Arc::new(StallTool));

    let loop_specs = if with_stall_loop {
        vec![
            LoopSpec::from_json(
                r#"{
                    "name": "stalling",
                    "max_iterations": 1,
                    "phases": [{"name": "probe", "capability": "stall_probe", "prompt": "{query}"}]
                }"#,
            )
            .unwrap(),
        ]
    } else {
        Vec::new()
    };

    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let catalog =
        InstrumentCatalog::build(&registry, TerminationConfig::default(), &loop_specs).unwrap();

    Arc::new(Conductor::new(
        store.clone(),
        catalog,
        Arc::new(EventBus::default()),
        Arc::new(TaskManager::new()),
        Arc::new(TrustTracker::new(store)),
        Arc::new(ApprovalStore::new()),
        Arc::new(KeywordClassifier::default()),
        ConductorConfig::default(),
    ))
}

fn bare_ctx() -> TaskContext {
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

// ===========================================================================
// Sequential
// ===========================================================================

#[tokio::test]
async fn sequential_pipes_results_and_aggregates_metadata() {
    let synthesis_calls = Arc::new(AtomicU32::new(0));
    let conductor = build_conductor(0.9, None, Arc::clone(&synthesis_calls), false);

    let composition = SequentialComposition::new(vec![
        SequentialStep {
            instrument: "research".to_string(),
            config: None,
        },
        SequentialStep {
            instrument: "synthesis".to_string(),
            config: None,
        },
    ]);

    let result = composition
        .execute("pipeline question", &bare_ctx(), &conductor)
        .await
        .unwrap();

    // research (1 iteration at 0.9) + synthesis (1 iteration).
    assert_eq!(result.metadata.iterations, 2);
    assert_eq!(result.metadata.process_type, symphony_db::models::ProcessType::Conscious);
    assert_eq!(result.summary, "merged branches");
    assert!(!result.metadata.sources_consulted.is_empty());
    assert_eq!(synthesis_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sequential_halts_early_on_inconclusive() {
    let synthesis_calls = Arc::new(AtomicU32::new(0));
    // Low confidence + severe contradiction: research ends inconclusive.
    let conductor = build_conductor(0.4, Some("sources disagree"), Arc::clone(&synthesis_calls), false);

    let composition = SequentialComposition::new(vec![
        SequentialStep {
            instrument: "research".to_string(),
            config: None,
        },
        SequentialStep {
            instrument: "synthesis".to_string(),
            config: None,
        },
    ]);

    let result = composition
        .execute("contradictory question", &bare_ctx(), &conductor)
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Inconclusive);
    assert!(result.discrepancy.unwrap().contains("disagree"));
    // The pipeline halted before the synthesis step ran.
    assert_eq!(synthesis_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sequential_step_overrides_do_not_leak_to_siblings() {
    let synthesis_calls = Arc::new(AtomicU32::new(0));
    // 0.5 confidence: research never clears the default threshold, so
    // iteration counts expose the per-step override.
    let conductor = build_conductor(0.5, None, synthesis_calls, false);

    let composition = SequentialComposition::new(vec![
        SequentialStep {
            instrument: "research".to_string(),
            config: Some(StepConfig {
                max_iterations: Some(1),
                confidence_threshold: None,
            }),
        },
        SequentialStep {
            instrument: "research".to_string(),
            config: Some(StepConfig {
                max_iterations: Some(2),
                confidence_threshold: None,
            }),
        },
    ]);

    let result = composition
        .execute("bounded pipeline", &bare_ctx(), &conductor)
        .await
        .unwrap();

    // 1 + 2 iterations; each step saw only its own override.
    assert_eq!(result.metadata.iterations, 3);
    assert_eq!(result.outcome, Outcome::Bounded);
}

// ===========================================================================
// Parallel (scenario 5: partial failure)
// ===========================================================================

#[tokio::test]
async fn parallel_partial_failure_merges_survivors_and_names_the_dead() {
    let synthesis_calls = Arc::new(AtomicU32::new(0));
    let conductor = build_conductor(0.9, None, Arc::clone(&synthesis_calls), true);

    let composition = ParallelComposition::new(vec![
        "research".to_string(),
        "research".to_string(),
        "stalling".to_string(),
    ])
    .with_branch_timeout(Duration::from_millis(200));

    let result = composition
        .execute("fan out question", &bare_ctx(), &conductor)
        .await
        .unwrap();

    // Two research branches merged; the stalled branch is named.
    assert_eq!(result.summary, "merged branches");
    assert!(!result.metadata.sources_consulted.is_empty());
    let discrepancy = result.discrepancy.unwrap();
    assert!(discrepancy.contains("stalling"), "got {discrepancy:?}");
    assert!(discrepancy.contains("timed out"));
    assert_eq!(synthesis_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn parallel_all_fail_is_inconclusive() {
    let synthesis_calls = Arc::new(AtomicU32::new(0));
    let conductor = build_conductor(0.9, None, Arc::clone(&synthesis_calls), true);

    let composition = ParallelComposition::new(vec![
        "stalling".to_string(),
        "stalling".to_string(),
    ])
    .with_branch_timeout(Duration::from_millis(100));

    let result = composition
        .execute("doomed fan out", &bare_ctx(), &conductor)
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Inconclusive);
    let discrepancy = result.discrepancy.unwrap();
    assert_eq!(discrepancy.matches("stalling").count(), 2);
    // No survivors: the merge instrument never ran.
    assert_eq!(synthesis_calls.load(Ordering::SeqCst), 0);
}

// ===========================================================================
// Arrangement specs build runnable compositions
// ===========================================================================

#[tokio::test]
async fn arrangement_spec_executes_via_the_conductor() {
    let synthesis_calls = Arc::new(AtomicU32::new(0));
    let conductor = build_conductor(0.9, None, synthesis_calls, false);

    let spec: ArrangementSpec = serde_json::from_value(json!({
        "kind": "sequential",
        "steps": [
            {"instrument": "research"},
            {"instrument": "synthesis"}
        ]
    }))
    .unwrap();
    spec.validate().unwrap();

    let result = conductor
        .execute_arrangement(&spec, "saved arrangement", &bare_ctx())
        .await
        .unwrap();
    assert_eq!(result.summary, "merged branches");
}

#[tokio::test]
async fn unknown_branch_instrument_fails_the_branch_not_the_task() {
    let synthesis_calls = Arc::new(AtomicU32::new(0));
    let conductor = build_conductor(0.9, None, Arc::clone(&synthesis_calls), false);

    let composition = ParallelComposition::new(vec![
        "research".to_string(),
        "no-such-instrument".to_string(),
    ]);

    let result = composition
        .execute("mixed branches", &bare_ctx(), &conductor)
        .await
        .unwrap();

    assert!(result.discrepancy.unwrap().contains("no-such-instrument"));
    assert_eq!(synthesis_calls.load(Ordering::SeqCst), 1);
}
