//! Query functions for the error-learning, knowledge and notification
//! tables.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::KnowledgeEntry;
use crate::store::NewErrorRecord;

/// Record a classified failure and bump its aggregate pattern row.
pub async fn record_error(pool: &PgPool, rec: &NewErrorRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO error_records (app_id, task_id, kind, message, context) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(rec.app_id)
    .bind(&rec.task_id)
    .bind(&rec.kind)
    .bind(&rec.message)
    .bind(&rec.context)
    .execute(pool)
    .await
    .context("failed to insert error record")?;

    let signature = rec.message.lines().next().unwrap_or("");
    sqlx::query(
        "INSERT INTO error_patterns (kind, signature) VALUES ($1, $2) \
         ON CONFLICT (kind, signature) \
         DO UPDATE SET occurrences = error_patterns.occurrences + 1, last_seen_at = now()",
    )
    .bind(&rec.kind)
    .bind(signature)
    .execute(pool)
    .await
    .context("failed to bump error pattern")?;

    Ok(())
}

/// Knowledge entries newer than `version`, plus the latest version.
pub async fn knowledge_since(
    pool: &PgPool,
    app_id: Uuid,
    version: i64,
) -> Result<(Vec<KnowledgeEntry>, i64)> {
    let rows = sqlx::query_as::<_, KnowledgeEntry>(
        "SELECT * FROM knowledge_entries WHERE app_id = $1 AND version > $2 \
         ORDER BY version ASC",
    )
    .bind(app_id)
    .bind(version)
    .fetch_all(pool)
    .await
    .context("failed to fetch knowledge delta")?;

    let (latest,): (Option<i64>,) = sqlx::query_as(
        "SELECT MAX(version) FROM knowledge_entries WHERE app_id = $1",
    )
    .bind(app_id)
    .fetch_one(pool)
    .await
    .context("failed to fetch latest knowledge version")?;

    Ok((rows, latest.unwrap_or(0)))
}

pub async fn record_notification(
    pool: &PgPool,
    app_id: Uuid,
    task_id: &str,
    channel: &str,
    target: &str,
    status: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO notification_history (app_id, task_id, channel, target, status) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(app_id)
    .bind(task_id)
    .bind(channel)
    .bind(target)
    .bind(status)
    .execute(pool)
    .await
    .context("failed to record notification")?;

    Ok(())
}
