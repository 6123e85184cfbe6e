//! Query functions for the `task_iterations` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TaskIteration;
use crate::store::NewIteration;

pub async fn insert_iteration(pool: &PgPool, it: &NewIteration) -> Result<TaskIteration> {
    let row = sqlx::query_as::<_, TaskIteration>(
        "INSERT INTO task_iterations \
         (task_id, app_id, iteration_num, phase, input, output, duration_ms) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&it.task_id)
    .bind(it.app_id)
    .bind(it.iteration_num)
    .bind(&it.phase)
    .bind(&it.input)
    .bind(&it.output)
    .bind(it.duration_ms)
    .fetch_one(pool)
    .await
    .context("failed to insert iteration checkpoint")?;

    Ok(row)
}

/// Checkpoints for a task in iteration order.
pub async fn list_iterations(
    pool: &PgPool,
    app_id: Uuid,
    task_id: &str,
) -> Result<Vec<TaskIteration>> {
    let rows = sqlx::query_as::<_, TaskIteration>(
        "SELECT * FROM task_iterations WHERE task_id = $1 AND app_id = $2 \
         ORDER BY iteration_num ASC",
    )
    .bind(task_id)
    .bind(app_id)
    .fetch_all(pool)
    .await
    .context("failed to list iteration checkpoints")?;

    Ok(rows)
}
