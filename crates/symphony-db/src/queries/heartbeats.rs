//! Query functions for the `heartbeats` and `heartbeat_runs` tables.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Heartbeat, HeartbeatRun, HeartbeatRunStatus, Outcome};
use crate::store::{HeartbeatUpdate, NewHeartbeat, NewHeartbeatRun};

pub async fn insert_heartbeat(pool: &PgPool, hb: &NewHeartbeat) -> Result<Heartbeat> {
    let row = sqlx::query_as::<_, Heartbeat>(
        "INSERT INTO heartbeats \
         (app_id, user_id, name, query_template, cron_expression, timezone, \
          context_template, webhook_url, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(hb.app_id)
    .bind(&hb.user_id)
    .bind(&hb.name)
    .bind(&hb.query_template)
    .bind(&hb.cron_expression)
    .bind(&hb.timezone)
    .bind(&hb.context_template)
    .bind(&hb.webhook_url)
    .bind(hb.is_active)
    .fetch_one(pool)
    .await
    .context("failed to insert heartbeat")?;

    Ok(row)
}

pub async fn get_heartbeat(pool: &PgPool, app_id: Uuid, id: Uuid) -> Result<Option<Heartbeat>> {
    let row =
        sqlx::query_as::<_, Heartbeat>("SELECT * FROM heartbeats WHERE id = $1 AND app_id = $2")
            .bind(id)
            .bind(app_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch heartbeat")?;

    Ok(row)
}

pub async fn list_heartbeats(pool: &PgPool, app_id: Uuid) -> Result<Vec<Heartbeat>> {
    let rows = sqlx::query_as::<_, Heartbeat>(
        "SELECT * FROM heartbeats WHERE app_id = $1 ORDER BY created_at ASC",
    )
    .bind(app_id)
    .fetch_all(pool)
    .await
    .context("failed to list heartbeats")?;

    Ok(rows)
}

/// Active heartbeats across all apps, for the scheduler tick.
pub async fn list_active_heartbeats(pool: &PgPool) -> Result<Vec<Heartbeat>> {
    let rows = sqlx::query_as::<_, Heartbeat>(
        "SELECT * FROM heartbeats WHERE is_active ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list active heartbeats")?;

    Ok(rows)
}

pub async fn update_heartbeat(
    pool: &PgPool,
    app_id: Uuid,
    id: Uuid,
    update: &HeartbeatUpdate,
) -> Result<Option<Heartbeat>> {
    let row = sqlx::query_as::<_, Heartbeat>(
        "UPDATE heartbeats SET \
           name = COALESCE($3, name), \
           query_template = COALESCE($4, query_template), \
           cron_expression = COALESCE($5, cron_expression), \
           timezone = COALESCE($6, timezone), \
           context_template = COALESCE($7, context_template), \
           webhook_url = COALESCE($8, webhook_url), \
           is_active = COALESCE($9, is_active), \
           updated_at = now() \
         WHERE id = $1 AND app_id = $2 \
         RETURNING *",
    )
    .bind(id)
    .bind(app_id)
    .bind(&update.name)
    .bind(&update.query_template)
    .bind(&update.cron_expression)
    .bind(&update.timezone)
    .bind(&update.context_template)
    .bind(&update.webhook_url)
    .bind(update.is_active)
    .fetch_optional(pool)
    .await
    .context("failed to update heartbeat")?;

    Ok(row)
}

pub async fn delete_heartbeat(pool: &PgPool, app_id: Uuid, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM heartbeats WHERE id = $1 AND app_id = $2")
        .bind(id)
        .bind(app_id)
        .execute(pool)
        .await
        .context("failed to delete heartbeat")?;

    Ok(result.rows_affected() > 0)
}

/// Insert a run for one cron minute. The unique (heartbeat_id,
/// fire_minute) index plus `ON CONFLICT DO NOTHING` is the
/// duplicate-fire guard; a suppressed fire returns `None`.
pub async fn insert_heartbeat_run(
    pool: &PgPool,
    run: &NewHeartbeatRun,
) -> Result<Option<HeartbeatRun>> {
    let row = sqlx::query_as::<_, HeartbeatRun>(
        "INSERT INTO heartbeat_runs (heartbeat_id, app_id, task_id, fire_minute) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (heartbeat_id, fire_minute) DO NOTHING \
         RETURNING *",
    )
    .bind(run.heartbeat_id)
    .bind(run.app_id)
    .bind(&run.task_id)
    .bind(run.fire_minute)
    .fetch_optional(pool)
    .await
    .context("failed to insert heartbeat run")?;

    Ok(row)
}

pub async fn complete_heartbeat_run(
    pool: &PgPool,
    id: Uuid,
    status: HeartbeatRunStatus,
    outcome: Option<Outcome>,
    error: Option<String>,
) -> Result<()> {
    sqlx::query(
        "UPDATE heartbeat_runs SET status = $2, outcome = $3, error = $4, \
         completed_at = now() WHERE id = $1",
    )
    .bind(id)
    .bind(status)
    .bind(outcome)
    .bind(error)
    .execute(pool)
    .await
    .context("failed to complete heartbeat run")?;

    Ok(())
}

pub async fn set_heartbeat_run_task(pool: &PgPool, id: Uuid, task_id: &str) -> Result<()> {
    sqlx::query("UPDATE heartbeat_runs SET task_id = $2, status = 'running' WHERE id = $1")
        .bind(id)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to attach task to heartbeat run")?;

    Ok(())
}

pub async fn list_heartbeat_runs(
    pool: &PgPool,
    app_id: Uuid,
    heartbeat_id: Uuid,
    limit: i64,
) -> Result<Vec<HeartbeatRun>> {
    let rows = sqlx::query_as::<_, HeartbeatRun>(
        "SELECT * FROM heartbeat_runs \
         WHERE heartbeat_id = $1 AND app_id = $2 \
         ORDER BY created_at DESC LIMIT $3",
    )
    .bind(heartbeat_id)
    .bind(app_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list heartbeat runs")?;

    Ok(rows)
}
