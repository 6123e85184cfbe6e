//! Query functions for the `tasks` table.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Outcome, TaskRow, TaskStats, TaskStatus};
use crate::store::NewTask;

/// Insert a new task row.
pub async fn insert_task(pool: &PgPool, task: &NewTask) -> Result<TaskRow> {
    let row = sqlx::query_as::<_, TaskRow>(
        "INSERT INTO tasks (id, app_id, user_id, request, status) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(&task.id)
    .bind(task.app_id)
    .bind(&task.user_id)
    .bind(&task.request)
    .bind(task.status)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(row)
}

/// Fetch a single task, scoped to its owning app.
pub async fn get_task(pool: &PgPool, app_id: Uuid, task_id: &str) -> Result<Option<TaskRow>> {
    let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1 AND app_id = $2")
        .bind(task_id)
        .bind(app_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(row)
}

/// Optimistic status transition. Returns rows affected (0 when the task
/// is missing, owned by another app, or no longer in `from`).
pub async fn transition_task(
    pool: &PgPool,
    app_id: Uuid,
    task_id: &str,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<u64> {
    let completed_at = if to.is_terminal() {
        Some(Utc::now())
    } else {
        None
    };

    let result = sqlx::query(
        "UPDATE tasks SET status = $1, updated_at = now(), \
         completed_at = COALESCE($2, completed_at) \
         WHERE id = $3 AND app_id = $4 AND status = $5",
    )
    .bind(to)
    .bind(completed_at)
    .bind(task_id)
    .bind(app_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Terminal transition carrying outcome / response / error.
#[allow(clippy::too_many_arguments)]
pub async fn finish_task(
    pool: &PgPool,
    app_id: Uuid,
    task_id: &str,
    from: TaskStatus,
    to: TaskStatus,
    outcome: Option<Outcome>,
    response: Option<Value>,
    error: Option<String>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = $1, outcome = $2, response = $3, error = $4, \
         updated_at = now(), completed_at = now() \
         WHERE id = $5 AND app_id = $6 AND status = $7",
    )
    .bind(to)
    .bind(outcome)
    .bind(response)
    .bind(error)
    .bind(task_id)
    .bind(app_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to finish task")?;

    Ok(result.rows_affected())
}

/// Most recent tasks in the given statuses, newest first.
pub async fn list_tasks_by_status(
    pool: &PgPool,
    app_id: Uuid,
    statuses: &[TaskStatus],
    limit: i64,
) -> Result<Vec<TaskRow>> {
    let status_strs: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
    let rows = sqlx::query_as::<_, TaskRow>(
        "SELECT * FROM tasks WHERE app_id = $1 AND status = ANY($2) \
         ORDER BY created_at DESC LIMIT $3",
    )
    .bind(app_id)
    .bind(&status_strs)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list tasks by status")?;

    Ok(rows)
}

/// Most recent tasks regardless of status, newest first.
pub async fn list_recent_tasks(pool: &PgPool, app_id: Uuid, limit: i64) -> Result<Vec<TaskRow>> {
    let rows = sqlx::query_as::<_, TaskRow>(
        "SELECT * FROM tasks WHERE app_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(app_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list recent tasks")?;

    Ok(rows)
}

/// Task counts by status for one app.
pub async fn task_stats(pool: &PgPool, app_id: Uuid) -> Result<TaskStats> {
    let rows: Vec<(TaskStatus, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM tasks WHERE app_id = $1 GROUP BY status",
    )
    .bind(app_id)
    .fetch_all(pool)
    .await
    .context("failed to compute task stats")?;

    let mut stats = TaskStats::default();
    for (status, count) in rows {
        stats.total += count;
        match status {
            TaskStatus::Pending => stats.pending = count,
            TaskStatus::AwaitingApproval => stats.awaiting_approval = count,
            TaskStatus::Running => stats.running = count,
            TaskStatus::Complete => stats.complete = count,
            TaskStatus::Failed => stats.failed = count,
            TaskStatus::Cancelled => stats.cancelled = count,
        }
    }
    Ok(stats)
}

/// Fail every `running` task across all apps. Startup recovery only.
pub async fn fail_orphaned_tasks(pool: &PgPool, error: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'failed', error = $1, \
         updated_at = now(), completed_at = now() \
         WHERE status = 'running'",
    )
    .bind(error)
    .execute(pool)
    .await
    .context("failed to fail orphaned tasks")?;

    Ok(result.rows_affected())
}
