//! The storage contract.
//!
//! The core depends on this trait only; backends are interchangeable
//! behind `Arc<dyn Store>`. Methods that touch app-scoped tables take
//! the owning `app_id` so the isolation predicate is part of the
//! signature, not a caller convention.
//!
//! Status transitions use optimistic locking: the update predicate
//! includes the expected current status and the method reports how many
//! rows matched. Zero rows means the task was missing or had already
//! moved on, which is how at-most-one terminal transition is enforced
//! under concurrency.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    App, Heartbeat, HeartbeatRun, HeartbeatRunStatus, KnowledgeEntry, Outcome, SavedArrangement,
    TaskIteration, TaskRow, TaskStats, TaskStatus, UserProfile,
};

/// Fields for a new task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub app_id: Uuid,
    pub user_id: Option<String>,
    pub request: Value,
    pub status: TaskStatus,
}

/// Fields for a new iteration checkpoint.
#[derive(Debug, Clone)]
pub struct NewIteration {
    pub task_id: String,
    pub app_id: Uuid,
    pub iteration_num: i32,
    pub phase: String,
    pub input: Value,
    pub output: Value,
    pub duration_ms: i64,
}

/// Fields for a new heartbeat.
#[derive(Debug, Clone)]
pub struct NewHeartbeat {
    pub app_id: Uuid,
    pub user_id: Option<String>,
    pub name: String,
    pub query_template: String,
    pub cron_expression: String,
    pub timezone: String,
    pub context_template: Option<Value>,
    pub webhook_url: Option<String>,
    pub is_active: bool,
}

/// Mutable heartbeat fields for `PUT /heartbeats/{id}`. `None` leaves
/// the stored value unchanged.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatUpdate {
    pub name: Option<String>,
    pub query_template: Option<String>,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub context_template: Option<Value>,
    pub webhook_url: Option<String>,
    pub is_active: Option<bool>,
}

/// Fields for a new heartbeat run.
#[derive(Debug, Clone)]
pub struct NewHeartbeatRun {
    pub heartbeat_id: Uuid,
    pub app_id: Uuid,
    pub task_id: Option<String>,
    pub fire_minute: DateTime<Utc>,
}

/// Fields for a new error-learning record.
#[derive(Debug, Clone)]
pub struct NewErrorRecord {
    pub app_id: Option<Uuid>,
    pub task_id: Option<String>,
    pub kind: String,
    pub message: String,
    pub context: Option<Value>,
}

/// The narrow persistence contract the core executes against.
#[async_trait]
pub trait Store: Send + Sync {
    // -- apps / users -------------------------------------------------------

    async fn insert_app(&self, name: &str, api_key: &str) -> Result<App>;

    async fn get_app_by_api_key(&self, api_key: &str) -> Result<Option<App>>;

    /// Fetch-or-create the profile row for (app, external user).
    async fn ensure_user_profile(&self, app_id: Uuid, external_user_id: &str)
    -> Result<UserProfile>;

    async fn get_user_profile(
        &self,
        app_id: Uuid,
        external_user_id: &str,
    ) -> Result<Option<UserProfile>>;

    /// Apply one terminal task outcome to the user's trust metrics.
    /// Success increments the consecutive counter; failure resets it.
    async fn record_trust_outcome(
        &self,
        app_id: Uuid,
        external_user_id: &str,
        success: bool,
    ) -> Result<UserProfile>;

    /// Set the trust level. The only mutation path for
    /// `current_trust_level`.
    async fn set_trust_level(
        &self,
        app_id: Uuid,
        external_user_id: &str,
        level: i16,
    ) -> Result<UserProfile>;

    // -- tasks --------------------------------------------------------------

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRow>;

    async fn get_task(&self, app_id: Uuid, task_id: &str) -> Result<Option<TaskRow>>;

    /// Move a task from `from` to `to`. Returns the number of rows that
    /// matched the optimistic predicate (0 or 1).
    async fn transition_task(
        &self,
        app_id: Uuid,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<u64>;

    /// Terminal transition carrying the outcome, the serialized response
    /// and/or the error detail. Sets `completed_at`.
    async fn finish_task(
        &self,
        app_id: Uuid,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        outcome: Option<Outcome>,
        response: Option<Value>,
        error: Option<String>,
    ) -> Result<u64>;

    async fn list_tasks_by_status(
        &self,
        app_id: Uuid,
        statuses: &[TaskStatus],
        limit: i64,
    ) -> Result<Vec<TaskRow>>;

    async fn list_recent_tasks(&self, app_id: Uuid, limit: i64) -> Result<Vec<TaskRow>>;

    async fn task_stats(&self, app_id: Uuid) -> Result<TaskStats>;

    /// Mark every `running` task (any app) as failed. Called once at
    /// startup: in-flight work does not survive a crash.
    async fn fail_orphaned_tasks(&self, error: &str) -> Result<u64>;

    // -- iteration checkpoints ---------------------------------------------

    async fn insert_iteration(&self, it: &NewIteration) -> Result<TaskIteration>;

    async fn list_iterations(&self, app_id: Uuid, task_id: &str) -> Result<Vec<TaskIteration>>;

    // -- heartbeats ---------------------------------------------------------

    async fn insert_heartbeat(&self, hb: &NewHeartbeat) -> Result<Heartbeat>;

    async fn get_heartbeat(&self, app_id: Uuid, id: Uuid) -> Result<Option<Heartbeat>>;

    async fn list_heartbeats(&self, app_id: Uuid) -> Result<Vec<Heartbeat>>;

    /// Active heartbeats across every app. Scheduler-only: the scheduler
    /// materializes per-app tasks and stamps each with its own app_id.
    async fn list_active_heartbeats(&self) -> Result<Vec<Heartbeat>>;

    async fn update_heartbeat(
        &self,
        app_id: Uuid,
        id: Uuid,
        update: &HeartbeatUpdate,
    ) -> Result<Option<Heartbeat>>;

    async fn delete_heartbeat(&self, app_id: Uuid, id: Uuid) -> Result<bool>;

    /// Insert a run for the given cron minute. Returns `None` when a run
    /// for (heartbeat_id, fire_minute) already exists -- the
    /// duplicate-fire guard.
    async fn insert_heartbeat_run(&self, run: &NewHeartbeatRun) -> Result<Option<HeartbeatRun>>;

    async fn complete_heartbeat_run(
        &self,
        id: Uuid,
        status: HeartbeatRunStatus,
        outcome: Option<Outcome>,
        error: Option<String>,
    ) -> Result<()>;

    async fn set_heartbeat_run_task(&self, id: Uuid, task_id: &str) -> Result<()>;

    async fn list_heartbeat_runs(
        &self,
        app_id: Uuid,
        heartbeat_id: Uuid,
        limit: i64,
    ) -> Result<Vec<HeartbeatRun>>;

    // -- arrangements -------------------------------------------------------

    async fn upsert_arrangement(
        &self,
        app_id: Uuid,
        name: &str,
        spec: &Value,
    ) -> Result<SavedArrangement>;

    async fn get_arrangement(&self, app_id: Uuid, name: &str) -> Result<Option<SavedArrangement>>;

    async fn list_arrangements(&self, app_id: Uuid) -> Result<Vec<SavedArrangement>>;

    // -- error learning -----------------------------------------------------

    /// Record a classified failure and bump its aggregate pattern.
    async fn record_error(&self, rec: &NewErrorRecord) -> Result<()>;

    // -- knowledge sync -----------------------------------------------------

    /// Entries newer than `version`, plus the latest version number.
    async fn knowledge_since(
        &self,
        app_id: Uuid,
        version: i64,
    ) -> Result<(Vec<KnowledgeEntry>, i64)>;

    // -- notifications ------------------------------------------------------

    async fn record_notification(
        &self,
        app_id: Uuid,
        task_id: &str,
        channel: &str,
        target: &str,
        status: &str,
    ) -> Result<()>;

    // -- health -------------------------------------------------------------

    async fn ping(&self) -> Result<()>;
}

// Compile-time assertion: Store must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Store) {}
};
