//! Scheduler integration: cron-minute firing, duplicate suppression,
//! and run-outcome recording through the event bus watcher.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use symphony_db::mem::MemStore;
use symphony_db::models::{HeartbeatRunStatus, Outcome};
use symphony_db::store::{NewHeartbeat, Store};

use symphony_core::approval::ApprovalStore;
use symphony_core::bus::EventBus;
use symphony_core::conductor::{Conductor, ConductorConfig};
use symphony_core::error::LoopError;
use symphony_core::instrument::InstrumentCatalog;
use symphony_core::manager::TaskManager;
use symphony_core::rooms::KeywordClassifier;
use symphony_core::scheduler::{Scheduler, SchedulerConfig};
use symphony_core::termination::TerminationConfig;
use symphony_core::tools::{Tool, ToolRegistry, caps};
use symphony_core::trust::TrustTracker;

struct ConfidentTool;

#[async_trait]
impl Tool for ConfidentTool {
    fn name(&self) -> &str {
        "confident"
    }

    fn capabilities(&self) -> &[&'static str] {
        &[caps::REASONING, caps::WEB_SEARCH, caps::VISION, caps::SYNTHESIS]
    }

    async fn call(&self, capability: &str, _input: Value) -> Result<Value, LoopError> {
        if capability == caps::WEB_SEARCH {
            return Ok(json!({"results": []}));
        }
        Ok(json!({"text": "scheduled answer", "confidence": 0.95}))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

struct SchedulerHarness {
    store: Arc<MemStore>,
    scheduler: Arc<Scheduler>,
}

fn build() -> SchedulerHarness {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ConfidentTool));

    let store = Arc::new(MemStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();
    let catalog =
        InstrumentCatalog::build(&registry, TerminationConfig::default(), &[]).unwrap();
    let bus = Arc::new(EventBus::default());

    let conductor = Arc::new(Conductor::new(
        store_dyn.clone(),
        catalog,
        Arc::clone(&bus),
        Arc::new(TaskManager::new()),
        Arc::new(TrustTracker::new(store_dyn.clone())),
        Arc::new(ApprovalStore::new()),
        Arc::new(KeywordClassifier::default()),
        ConductorConfig::default(),
    ));

    let scheduler = Arc::new(
        Scheduler::new(store_dyn, conductor, bus, SchedulerConfig::default()).unwrap(),
    );

    SchedulerHarness { store, scheduler }
}

async fn seed_heartbeat(store: &MemStore, cron: &str) -> symphony_db::models::Heartbeat {
    store
        .insert_heartbeat(&NewHeartbeat {
            app_id: Uuid::new_v4(),
            user_id: Some("ada".to_string()),
            name: "digest".to_string(),
            query_template: "daily digest for {date}".to_string(),
            cron_expression: cron.to_string(),
            timezone: "UTC".to_string(),
            context_template: None,
            webhook_url: None,
            is_active: true,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn matching_minute_fires_exactly_once() {
    let harness = build();
    let heartbeat = seed_heartbeat(&harness.store, "0 9 * * *").await;
    let nine = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 5).unwrap();

    let fired = harness.scheduler.tick(nine).await.unwrap();
    assert_eq!(fired, 1);

    // A second tick inside the same cron minute is suppressed.
    let nine_again = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 40).unwrap();
    let fired = harness.scheduler.tick(nine_again).await.unwrap();
    assert_eq!(fired, 0);

    let runs = harness
        .store
        .list_heartbeat_runs(heartbeat.app_id, heartbeat.id, 10)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
}

#[tokio::test]
async fn non_matching_minute_does_not_fire() {
    let harness = build();
    seed_heartbeat(&harness.store, "0 9 * * *").await;
    let ten = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
    assert_eq!(harness.scheduler.tick(ten).await.unwrap(), 0);
}

#[tokio::test]
async fn inactive_heartbeats_are_skipped() {
    let harness = build();
    let heartbeat = seed_heartbeat(&harness.store, "* * * * *").await;
    harness
        .store
        .update_heartbeat(
            heartbeat.app_id,
            heartbeat.id,
            &symphony_db::store::HeartbeatUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(harness.scheduler.tick(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn run_records_the_task_outcome() {
    let harness = build();
    let heartbeat = seed_heartbeat(&harness.store, "* * * * *").await;

    let fired = harness.scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(fired, 1);

    // Wait for the submitted task and its watcher to finish.
    for _ in 0..400 {
        let runs = harness
            .store
            .list_heartbeat_runs(heartbeat.app_id, heartbeat.id, 10)
            .await
            .unwrap();
        if let Some(run) = runs.first() {
            if run.status == HeartbeatRunStatus::Complete {
                assert_eq!(run.outcome, Some(Outcome::Complete));
                assert!(run.task_id.is_some());
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("heartbeat run never completed");
}

#[tokio::test]
async fn materialized_task_substitutes_the_date() {
    let harness = build();
    let heartbeat = seed_heartbeat(&harness.store, "* * * * *").await;
    let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 30, 0).unwrap();

    harness.scheduler.tick(now).await.unwrap();

    let runs = harness
        .store
        .list_heartbeat_runs(heartbeat.app_id, heartbeat.id, 10)
        .await
        .unwrap();
    let task_id = runs[0].task_id.clone().expect("run should carry a task id");
    let task = harness
        .store
        .get_task(heartbeat.app_id, &task_id)
        .await
        .unwrap()
        .unwrap();
    assert!(
        task.request["query"]
            .as_str()
            .unwrap()
            .contains("2026-03-02")
    );
    assert_eq!(task.user_id.as_deref(), Some("ada"));
}
