//! PostgreSQL storage backend: the [`Store`] impl over a connection
//! pool, delegating to the [`crate::queries`] functions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    App, Heartbeat, HeartbeatRun, HeartbeatRunStatus, KnowledgeEntry, Outcome, SavedArrangement,
    TaskIteration, TaskRow, TaskStats, TaskStatus, UserProfile,
};
use crate::queries::{arrangements, heartbeats, iterations, learning, profiles, tasks};
use crate::store::{
    HeartbeatUpdate, NewErrorRecord, NewHeartbeat, NewHeartbeatRun, NewIteration, NewTask, Store,
};

/// [`Store`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_app(&self, name: &str, api_key: &str) -> Result<App> {
        profiles::insert_app(&self.pool, name, api_key).await
    }

    async fn get_app_by_api_key(&self, api_key: &str) -> Result<Option<App>> {
        profiles::get_app_by_api_key(&self.pool, api_key).await
    }

    async fn ensure_user_profile(
        &self,
        app_id: Uuid,
        external_user_id: &str,
    ) -> Result<UserProfile> {
        profiles::ensure_user_profile(&self.pool, app_id, external_user_id).await
    }

    async fn get_user_profile(
        &self,
        app_id: Uuid,
        external_user_id: &str,
    ) -> Result<Option<UserProfile>> {
        profiles::get_user_profile(&self.pool, app_id, external_user_id).await
    }

    async fn record_trust_outcome(
        &self,
        app_id: Uuid,
        external_user_id: &str,
        success: bool,
    ) -> Result<UserProfile> {
        profiles::record_trust_outcome(&self.pool, app_id, external_user_id, success).await
    }

    async fn set_trust_level(
        &self,
        app_id: Uuid,
        external_user_id: &str,
        level: i16,
    ) -> Result<UserProfile> {
        profiles::set_trust_level(&self.pool, app_id, external_user_id, level).await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRow> {
        tasks::insert_task(&self.pool, task).await
    }

    async fn get_task(&self, app_id: Uuid, task_id: &str) -> Result<Option<TaskRow>> {
        tasks::get_task(&self.pool, app_id, task_id).await
    }

    async fn transition_task(
        &self,
        app_id: Uuid,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<u64> {
        tasks::transition_task(&self.pool, app_id, task_id, from, to).await
    }

    async fn finish_task(
        &self,
        app_id: Uuid,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        outcome: Option<Outcome>,
        response: Option<Value>,
        error: Option<String>,
    ) -> Result<u64> {
        tasks::finish_task(
            &self.pool, app_id, task_id, from, to, outcome, response, error,
        )
        .await
    }

    async fn list_tasks_by_status(
        &self,
        app_id: Uuid,
        statuses: &[TaskStatus],
        limit: i64,
    ) -> Result<Vec<TaskRow>> {
        tasks::list_tasks_by_status(&self.pool, app_id, statuses, limit).await
    }

    async fn list_recent_tasks(&self, app_id: Uuid, limit: i64) -> Result<Vec<TaskRow>> {
        tasks::list_recent_tasks(&self.pool, app_id, limit).await
    }

    async fn task_stats(&self, app_id: Uuid) -> Result<TaskStats> {
        tasks::task_stats(&self.pool, app_id).await
    }

    async fn fail_orphaned_tasks(&self, error: &str) -> Result<u64> {
        tasks::fail_orphaned_tasks(&self.pool, error).await
    }

    async fn insert_iteration(&self, it: &NewIteration) -> Result<TaskIteration> {
        iterations::insert_iteration(&self.pool, it).await
    }

    async fn list_iterations(&self, app_id: Uuid, task_id: &str) -> Result<Vec<TaskIteration>> {
        iterations::list_iterations(&self.pool, app_id, task_id).await
    }

    async fn insert_heartbeat(&self, hb: &NewHeartbeat) -> Result<Heartbeat> {
        heartbeats::insert_heartbeat(&self.pool, hb).await
    }

    async fn get_heartbeat(&self, app_id: Uuid, id: Uuid) -> Result<Option<Heartbeat>> {
        heartbeats::get_heartbeat(&self.pool, app_id, id).await
    }

    async fn list_heartbeats(&self, app_id: Uuid) -> Result<Vec<Heartbeat>> {
        heartbeats::list_heartbeats(&self.pool, app_id).await
    }

    async fn list_active_heartbeats(&self) -> Result<Vec<Heartbeat>> {
        heartbeats::list_active_heartbeats(&self.pool).await
    }

    async fn update_heartbeat(
        &self,
        app_id: Uuid,
        id: Uuid,
        update: &HeartbeatUpdate,
    ) -> Result<Option<Heartbeat>> {
        heartbeats::update_heartbeat(&self.pool, app_id, id, update).await
    }

    async fn delete_heartbeat(&self, app_id: Uuid, id: Uuid) -> Result<bool> {
        heartbeats::delete_heartbeat(&self.pool, app_id, id).await
    }

    async fn insert_heartbeat_run(&self, run: &NewHeartbeatRun) -> Result<Option<HeartbeatRun>> {
        heartbeats::insert_heartbeat_run(&self.pool, run).await
    }

    async fn complete_heartbeat_run(
        &self,
        id: Uuid,
        status: HeartbeatRunStatus,
        outcome: Option<Outcome>,
        error: Option<String>,
    ) -> Result<()> {
        heartbeats::complete_heartbeat_run(&self.pool, id, status, outcome, error).await
    }

    async fn set_heartbeat_run_task(&self, id: Uuid, task_id: &str) -> Result<()> {
        heartbeats::set_heartbeat_run_task(&self.pool, id, task_id).await
    }

    async fn list_heartbeat_runs(
        &self,
        app_id: Uuid,
        heartbeat_id: Uuid,
        limit: i64,
    ) -> Result<Vec<HeartbeatRun>> {
        heartbeats::list_heartbeat_runs(&self.pool, app_id, heartbeat_id, limit).await
    }

    async fn upsert_arrangement(
        &self,
        app_id: Uuid,
        name: &str,
        spec: &Value,
    ) -> Result<SavedArrangement> {
        arrangements::upsert_arrangement(&self.pool, app_id, name, spec).await
    }

    async fn get_arrangement(&self, app_id: Uuid, name: &str) -> Result<Option<SavedArrangement>> {
        arrangements::get_arrangement(&self.pool, app_id, name).await
    }

    async fn list_arrangements(&self, app_id: Uuid) -> Result<Vec<SavedArrangement>> {
        arrangements::list_arrangements(&self.pool, app_id).await
    }

    async fn record_error(&self, rec: &NewErrorRecord) -> Result<()> {
        learning::record_error(&self.pool, rec).await
    }

    async fn knowledge_since(
        &self,
        app_id: Uuid,
        version: i64,
    ) -> Result<(Vec<KnowledgeEntry>, i64)> {
        learning::knowledge_since(&self.pool, app_id, version).await
    }

    async fn record_notification(
        &self,
        app_id: Uuid,
        task_id: &str,
        channel: &str,
        target: &str,
        status: &str,
    ) -> Result<()> {
        learning::record_notification(&self.pool, app_id, task_id, channel, target, status).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database ping failed")?;
        Ok(())
    }
}
