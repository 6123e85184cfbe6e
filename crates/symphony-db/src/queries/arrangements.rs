//! Query functions for the `saved_arrangements` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::SavedArrangement;

pub async fn upsert_arrangement(
    pool: &PgPool,
    app_id: Uuid,
    name: &str,
    spec: &Value,
) -> Result<SavedArrangement> {
    let row = sqlx::query_as::<_, SavedArrangement>(
        "INSERT INTO saved_arrangements (app_id, name, spec) VALUES ($1, $2, $3) \
         ON CONFLICT (app_id, name) \
         DO UPDATE SET spec = EXCLUDED.spec, updated_at = now() \
         RETURNING *",
    )
    .bind(app_id)
    .bind(name)
    .bind(spec)
    .fetch_one(pool)
    .await
    .context("failed to upsert arrangement")?;

    Ok(row)
}

pub async fn get_arrangement(
    pool: &PgPool,
    app_id: Uuid,
    name: &str,
) -> Result<Option<SavedArrangement>> {
    let row = sqlx::query_as::<_, SavedArrangement>(
        "SELECT * FROM saved_arrangements WHERE app_id = $1 AND name = $2",
    )
    .bind(app_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("failed to fetch arrangement")?;

    Ok(row)
}

pub async fn list_arrangements(pool: &PgPool, app_id: Uuid) -> Result<Vec<SavedArrangement>> {
    let rows = sqlx::query_as::<_, SavedArrangement>(
        "SELECT * FROM saved_arrangements WHERE app_id = $1 ORDER BY name ASC",
    )
    .bind(app_id)
    .fetch_all(pool)
    .await
    .context("failed to list arrangements")?;

    Ok(rows)
}
