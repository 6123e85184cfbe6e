//! In-memory storage backend.
//!
//! Used when no database URL is configured (state is ephemeral and lost
//! on restart) and by the core/server test suites. Semantics mirror the
//! PostgreSQL backend, including optimistic status transitions and the
//! duplicate heartbeat-run guard.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    App, ErrorRecord, Heartbeat, HeartbeatRun, HeartbeatRunStatus, KnowledgeEntry,
    NotificationRecord, Outcome, SavedArrangement, TaskIteration, TaskRow, TaskStats, TaskStatus,
    UserProfile,
};
use crate::store::{
    HeartbeatUpdate, NewErrorRecord, NewHeartbeat, NewHeartbeatRun, NewIteration, NewTask, Store,
};

#[derive(Default)]
struct Inner {
    apps: HashMap<Uuid, App>,
    profiles: HashMap<(Uuid, String), UserProfile>,
    tasks: HashMap<String, TaskRow>,
    task_order: Vec<String>,
    iterations: Vec<TaskIteration>,
    iteration_seq: i64,
    heartbeats: HashMap<Uuid, Heartbeat>,
    runs: Vec<HeartbeatRun>,
    arrangements: HashMap<(Uuid, String), SavedArrangement>,
    errors: Vec<ErrorRecord>,
    error_seq: i64,
    /// (kind, signature) -> occurrence count.
    error_patterns: HashMap<(String, String), i64>,
    knowledge: Vec<KnowledgeEntry>,
    notifications: Vec<NotificationRecord>,
    notification_seq: i64,
}

/// Process-local [`Store`] backend.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    // -- apps / users -------------------------------------------------------

    async fn insert_app(&self, name: &str, api_key: &str) -> Result<App> {
        let mut inner = self.inner.write().await;
        let app = App {
            id: Uuid::new_v4(),
            name: name.to_string(),
            api_key: api_key.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        inner.apps.insert(app.id, app.clone());
        Ok(app)
    }

    async fn get_app_by_api_key(&self, api_key: &str) -> Result<Option<App>> {
        let inner = self.inner.read().await;
        Ok(inner.apps.values().find(|a| a.api_key == api_key).cloned())
    }

    async fn ensure_user_profile(
        &self,
        app_id: Uuid,
        external_user_id: &str,
    ) -> Result<UserProfile> {
        let mut inner = self.inner.write().await;
        let key = (app_id, external_user_id.to_string());
        let profile = inner.profiles.entry(key).or_insert_with(|| UserProfile {
            id: Uuid::new_v4(),
            app_id,
            external_user_id: external_user_id.to_string(),
            display_name: None,
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            consecutive_successes: 0,
            current_trust_level: 1,
            last_task_at: None,
            created_at: Utc::now(),
        });
        Ok(profile.clone())
    }

    async fn get_user_profile(
        &self,
        app_id: Uuid,
        external_user_id: &str,
    ) -> Result<Option<UserProfile>> {
        let inner = self.inner.read().await;
        Ok(inner
            .profiles
            .get(&(app_id, external_user_id.to_string()))
            .cloned())
    }

    async fn record_trust_outcome(
        &self,
        app_id: Uuid,
        external_user_id: &str,
        success: bool,
    ) -> Result<UserProfile> {
        let mut inner = self.inner.write().await;
        let key = (app_id, external_user_id.to_string());
        let profile = inner
            .profiles
            .get_mut(&key)
            .ok_or_else(|| anyhow::anyhow!("no profile for user {external_user_id}"))?;
        profile.total_tasks += 1;
        if success {
            profile.successful_tasks += 1;
            profile.consecutive_successes += 1;
        } else {
            profile.failed_tasks += 1;
            profile.consecutive_successes = 0;
        }
        profile.last_task_at = Some(Utc::now());
        Ok(profile.clone())
    }

    async fn set_trust_level(
        &self,
        app_id: Uuid,
        external_user_id: &str,
        level: i16,
    ) -> Result<UserProfile> {
        let mut inner = self.inner.write().await;
        let key = (app_id, external_user_id.to_string());
        let profile = inner
            .profiles
            .get_mut(&key)
            .ok_or_else(|| anyhow::anyhow!("no profile for user {external_user_id}"))?;
        profile.current_trust_level = level;
        Ok(profile.clone())
    }

    // -- tasks --------------------------------------------------------------

    async fn insert_task(&self, task: &NewTask) -> Result<TaskRow> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task.id) {
            anyhow::bail!("task {} already exists", task.id);
        }
        let now = Utc::now();
        let row = TaskRow {
            id: task.id.clone(),
            app_id: task.app_id,
            user_id: task.user_id.clone(),
            request: task.request.clone(),
            status: task.status,
            outcome: None,
            response: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        inner.tasks.insert(row.id.clone(), row.clone());
        inner.task_order.push(row.id.clone());
        Ok(row)
    }

    async fn get_task(&self, app_id: Uuid, task_id: &str) -> Result<Option<TaskRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .get(task_id)
            .filter(|t| t.app_id == app_id)
            .cloned())
    }

    async fn transition_task(
        &self,
        app_id: Uuid,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return Ok(0);
        };
        if task.app_id != app_id || task.status != from {
            return Ok(0);
        }
        task.status = to;
        task.updated_at = Utc::now();
        if to.is_terminal() {
            task.completed_at = Some(task.updated_at);
        }
        Ok(1)
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
        let mut inner = self.inner.write().await;
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return Ok(0);
        };
        if task.app_id != app_id || task.status != from {
            return Ok(0);
        }
        let now = Utc::now();
        task.status = to;
        task.outcome = outcome;
        task.response = response;
        task.error = error;
        task.updated_at = now;
        task.completed_at = Some(now);
        Ok(1)
    }

    async fn list_tasks_by_status(
        &self,
        app_id: Uuid,
        statuses: &[TaskStatus],
        limit: i64,
    ) -> Result<Vec<TaskRow>> {
        let inner = self.inner.read().await;
        let rows = inner
            .task_order
            .iter()
            .rev()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|t| t.app_id == app_id && statuses.contains(&t.status))
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn list_recent_tasks(&self, app_id: Uuid, limit: i64) -> Result<Vec<TaskRow>> {
        let inner = self.inner.read().await;
        let rows = inner
            .task_order
            .iter()
            .rev()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|t| t.app_id == app_id)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn task_stats(&self, app_id: Uuid) -> Result<TaskStats> {
        let inner = self.inner.read().await;
        let mut stats = TaskStats::default();
        for task in inner.tasks.values().filter(|t| t.app_id == app_id) {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::AwaitingApproval => stats.awaiting_approval += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Complete => stats.complete += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    async fn fail_orphaned_tasks(&self, error: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut count = 0;
        for task in inner.tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Failed;
                task.error = Some(error.to_string());
                task.updated_at = now;
                task.completed_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    // -- iteration checkpoints ---------------------------------------------

    async fn insert_iteration(&self, it: &NewIteration) -> Result<TaskIteration> {
        let mut inner = self.inner.write().await;
        inner.iteration_seq += 1;
        let row = TaskIteration {
            id: inner.iteration_seq,
            task_id: it.task_id.clone(),
            app_id: it.app_id,
            iteration_num: it.iteration_num,
            phase: it.phase.clone(),
            input: it.input.clone(),
            output: it.output.clone(),
            duration_ms: it.duration_ms,
            created_at: Utc::now(),
        };
        inner.iterations.push(row.clone());
        Ok(row)
    }

    async fn list_iterations(&self, app_id: Uuid, task_id: &str) -> Result<Vec<TaskIteration>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<TaskIteration> = inner
            .iterations
            .iter()
            .filter(|i| i.app_id == app_id && i.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by_key(|i| i.iteration_num);
        Ok(rows)
    }

    // -- heartbeats ---------------------------------------------------------

    async fn insert_heartbeat(&self, hb: &NewHeartbeat) -> Result<Heartbeat> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let row = Heartbeat {
            id: Uuid::new_v4(),
            app_id: hb.app_id,
            user_id: hb.user_id.clone(),
            name: hb.name.clone(),
            query_template: hb.query_template.clone(),
            cron_expression: hb.cron_expression.clone(),
            timezone: hb.timezone.clone(),
            context_template: hb.context_template.clone(),
            webhook_url: hb.webhook_url.clone(),
            is_active: hb.is_active,
            created_at: now,
            updated_at: now,
        };
        inner.heartbeats.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_heartbeat(&self, app_id: Uuid, id: Uuid) -> Result<Option<Heartbeat>> {
        let inner = self.inner.read().await;
        Ok(inner
            .heartbeats
            .get(&id)
            .filter(|h| h.app_id == app_id)
            .cloned())
    }

    async fn list_heartbeats(&self, app_id: Uuid) -> Result<Vec<Heartbeat>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Heartbeat> = inner
            .heartbeats
            .values()
            .filter(|h| h.app_id == app_id)
            .cloned()
            .collect();
        rows.sort_by_key(|h| h.created_at);
        Ok(rows)
    }

    async fn list_active_heartbeats(&self) -> Result<Vec<Heartbeat>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Heartbeat> = inner
            .heartbeats
            .values()
            .filter(|h| h.is_active)
            .cloned()
            .collect();
        rows.sort_by_key(|h| h.created_at);
        Ok(rows)
    }

    async fn update_heartbeat(
        &self,
        app_id: Uuid,
        id: Uuid,
        update: &HeartbeatUpdate,
    ) -> Result<Option<Heartbeat>> {
        let mut inner = self.inner.write().await;
        let Some(hb) = inner.heartbeats.get_mut(&id) else {
            return Ok(None);
        };
        if hb.app_id != app_id {
            return Ok(None);
        }
        if let Some(name) = &update.name {
            hb.name = name.clone();
        }
        if let Some(q) = &update.query_template {
            hb.query_template = q.clone();
        }
        if let Some(c) = &update.cron_expression {
            hb.cron_expression = c.clone();
        }
        if let Some(tz) = &update.timezone {
            hb.timezone = tz.clone();
        }
        if let Some(ctx) = &update.context_template {
            hb.context_template = Some(ctx.clone());
        }
        if let Some(url) = &update.webhook_url {
            hb.webhook_url = Some(url.clone());
        }
        if let Some(active) = update.is_active {
            hb.is_active = active;
        }
        hb.updated_at = Utc::now();
        Ok(Some(hb.clone()))
    }

    async fn delete_heartbeat(&self, app_id: Uuid, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let matches = inner
            .heartbeats
            .get(&id)
            .is_some_and(|h| h.app_id == app_id);
        if matches {
            inner.heartbeats.remove(&id);
        }
        Ok(matches)
    }

    async fn insert_heartbeat_run(&self, run: &NewHeartbeatRun) -> Result<Option<HeartbeatRun>> {
        let mut inner = self.inner.write().await;
        let duplicate = inner
            .runs
            .iter()
            .any(|r| r.heartbeat_id == run.heartbeat_id && r.fire_minute == run.fire_minute);
        if duplicate {
            return Ok(None);
        }
        let row = HeartbeatRun {
            id: Uuid::new_v4(),
            heartbeat_id: run.heartbeat_id,
            app_id: run.app_id,
            task_id: run.task_id.clone(),
            fire_minute: run.fire_minute,
            status: HeartbeatRunStatus::Pending,
            outcome: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        inner.runs.push(row.clone());
        Ok(Some(row))
    }

    async fn complete_heartbeat_run(
        &self,
        id: Uuid,
        status: HeartbeatRunStatus,
        outcome: Option<Outcome>,
        error: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(run) = inner.runs.iter_mut().find(|r| r.id == id) {
            run.status = status;
            run.outcome = outcome;
            run.error = error;
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_heartbeat_run_task(&self, id: Uuid, task_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(run) = inner.runs.iter_mut().find(|r| r.id == id) {
            run.task_id = Some(task_id.to_string());
            run.status = HeartbeatRunStatus::Running;
        }
        Ok(())
    }

    async fn list_heartbeat_runs(
        &self,
        app_id: Uuid,
        heartbeat_id: Uuid,
        limit: i64,
    ) -> Result<Vec<HeartbeatRun>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<HeartbeatRun> = inner
            .runs
            .iter()
            .filter(|r| r.app_id == app_id && r.heartbeat_id == heartbeat_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    // -- arrangements -------------------------------------------------------

    async fn upsert_arrangement(
        &self,
        app_id: Uuid,
        name: &str,
        spec: &Value,
    ) -> Result<SavedArrangement> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let key = (app_id, name.to_string());
        let row = inner
            .arrangements
            .entry(key)
            .and_modify(|a| {
                a.spec = spec.clone();
                a.updated_at = now;
            })
            .or_insert_with(|| SavedArrangement {
                id: Uuid::new_v4(),
                app_id,
                name: name.to_string(),
                spec: spec.clone(),
                created_at: now,
                updated_at: now,
            });
        Ok(row.clone())
    }

    async fn get_arrangement(&self, app_id: Uuid, name: &str) -> Result<Option<SavedArrangement>> {
        let inner = self.inner.read().await;
        Ok(inner.arrangements.get(&(app_id, name.to_string())).cloned())
    }

    async fn list_arrangements(&self, app_id: Uuid) -> Result<Vec<SavedArrangement>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<SavedArrangement> = inner
            .arrangements
            .values()
            .filter(|a| a.app_id == app_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    // -- error learning -----------------------------------------------------

    async fn record_error(&self, rec: &NewErrorRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.error_seq += 1;
        let row = ErrorRecord {
            id: inner.error_seq,
            app_id: rec.app_id,
            task_id: rec.task_id.clone(),
            kind: rec.kind.clone(),
            message: rec.message.clone(),
            context: rec.context.clone(),
            created_at: Utc::now(),
        };
        // Pattern signature: the kind plus the first line of the message.
        let signature = rec.message.lines().next().unwrap_or("").to_string();
        *inner
            .error_patterns
            .entry((rec.kind.clone(), signature))
            .or_insert(0) += 1;
        inner.errors.push(row);
        Ok(())
    }

    // -- knowledge sync -----------------------------------------------------

    async fn knowledge_since(
        &self,
        app_id: Uuid,
        version: i64,
    ) -> Result<(Vec<KnowledgeEntry>, i64)> {
        let inner = self.inner.read().await;
        let latest = inner
            .knowledge
            .iter()
            .filter(|k| k.app_id == app_id)
            .map(|k| k.version)
            .max()
            .unwrap_or(0);
        let mut delta: Vec<KnowledgeEntry> = inner
            .knowledge
            .iter()
            .filter(|k| k.app_id == app_id && k.version > version)
            .cloned()
            .collect();
        delta.sort_by_key(|k| k.version);
        Ok((delta, latest))
    }

    // -- notifications ------------------------------------------------------

    async fn record_notification(
        &self,
        app_id: Uuid,
        task_id: &str,
        channel: &str,
        target: &str,
        status: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.notification_seq += 1;
        let row = NotificationRecord {
            id: inner.notification_seq,
            app_id,
            task_id: task_id.to_string(),
            channel: channel.to_string(),
            target: target.to_string(),
            status: status.to_string(),
            created_at: Utc::now(),
        };
        inner.notifications.push(row);
        Ok(())
    }

    // -- health -------------------------------------------------------------

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_task(app_id: Uuid, id: &str) -> NewTask {
        NewTask {
            id: id.to_string(),
            app_id,
            user_id: Some("u1".to_string()),
            request: json!({"query": "q"}),
            status: TaskStatus::Pending,
        }
    }

    #[tokio::test]
    async fn task_insert_and_get_scoped_by_app() {
        let store = MemStore::new();
        let app_a = Uuid::new_v4();
        let app_b = Uuid::new_v4();
        store.insert_task(&new_task(app_a, "t1")).await.unwrap();

        assert!(store.get_task(app_a, "t1").await.unwrap().is_some());
        // Another app never sees the row, even with the right id.
        assert!(store.get_task(app_b, "t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_is_optimistic() {
        let store = MemStore::new();
        let app = Uuid::new_v4();
        store.insert_task(&new_task(app, "t1")).await.unwrap();

        let rows = store
            .transition_task(app, "t1", TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap();
        assert_eq!(rows, 1);

        // Second transition from pending no longer matches.
        let rows = store
            .transition_task(app, "t1", TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn finish_task_is_terminal_once() {
        let store = MemStore::new();
        let app = Uuid::new_v4();
        store.insert_task(&new_task(app, "t1")).await.unwrap();
        store
            .transition_task(app, "t1", TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap();

        let rows = store
            .finish_task(
                app,
                "t1",
                TaskStatus::Running,
                TaskStatus::Complete,
                Some(Outcome::Complete),
                Some(json!({"summary": "done"})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(rows, 1);

        // A competing terminal write must not match.
        let rows = store
            .finish_task(
                app,
                "t1",
                TaskStatus::Running,
                TaskStatus::Failed,
                None,
                None,
                Some("late".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(rows, 0);

        let task = store.get_task(app, "t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.outcome, Some(Outcome::Complete));
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn trust_outcome_updates_counters() {
        let store = MemStore::new();
        let app = Uuid::new_v4();
        store.ensure_user_profile(app, "u1").await.unwrap();

        store.record_trust_outcome(app, "u1", true).await.unwrap();
        store.record_trust_outcome(app, "u1", true).await.unwrap();
        let p = store.record_trust_outcome(app, "u1", false).await.unwrap();

        assert_eq!(p.total_tasks, 3);
        assert_eq!(p.successful_tasks, 2);
        assert_eq!(p.failed_tasks, 1);
        assert_eq!(p.consecutive_successes, 0);
    }

    #[tokio::test]
    async fn heartbeat_run_duplicate_minute_suppressed() {
        let store = MemStore::new();
        let app = Uuid::new_v4();
        let hb = store
            .insert_heartbeat(&NewHeartbeat {
                app_id: app,
                user_id: None,
                name: "daily".to_string(),
                query_template: "q".to_string(),
                cron_expression: "0 9 * * *".to_string(),
                timezone: "UTC".to_string(),
                context_template: None,
                webhook_url: None,
                is_active: true,
            })
            .await
            .unwrap();

        let minute = Utc::now();
        let run = NewHeartbeatRun {
            heartbeat_id: hb.id,
            app_id: app,
            task_id: None,
            fire_minute: minute,
        };
        assert!(store.insert_heartbeat_run(&run).await.unwrap().is_some());
        assert!(store.insert_heartbeat_run(&run).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_tasks_never_cross_apps() {
        let store = MemStore::new();
        let app_a = Uuid::new_v4();
        let app_b = Uuid::new_v4();
        store.insert_task(&new_task(app_a, "a1")).await.unwrap();
        store.insert_task(&new_task(app_b, "b1")).await.unwrap();

        let rows = store.list_recent_tasks(app_b, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.iter().all(|t| t.app_id == app_b));
    }

    #[tokio::test]
    async fn orphaned_running_tasks_failed_on_recovery() {
        let store = MemStore::new();
        let app = Uuid::new_v4();
        store.insert_task(&new_task(app, "t1")).await.unwrap();
        store
            .transition_task(app, "t1", TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap();

        let count = store.fail_orphaned_tasks("server restarted").await.unwrap();
        assert_eq!(count, 1);
        let task = store.get_task(app, "t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("server restarted"));
    }
}
