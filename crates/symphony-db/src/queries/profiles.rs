//! Query functions for the `apps` and `user_profiles` tables.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{App, UserProfile};

pub async fn insert_app(pool: &PgPool, name: &str, api_key: &str) -> Result<App> {
    let app = sqlx::query_as::<_, App>(
        "INSERT INTO apps (name, api_key) VALUES ($1, $2) RETURNING *",
    )
    .bind(name)
    .bind(api_key)
    .fetch_one(pool)
    .await
    .context("failed to insert app")?;

    Ok(app)
}

pub async fn get_app_by_api_key(pool: &PgPool, api_key: &str) -> Result<Option<App>> {
    let app = sqlx::query_as::<_, App>("SELECT * FROM apps WHERE api_key = $1")
        .bind(api_key)
        .fetch_optional(pool)
        .await
        .context("failed to fetch app by api key")?;

    Ok(app)
}

/// Fetch-or-create the profile for (app, external user).
///
/// `ON CONFLICT DO UPDATE` makes the insert a no-op upsert so the row is
/// always returned, even under concurrent first use.
pub async fn ensure_user_profile(
    pool: &PgPool,
    app_id: Uuid,
    external_user_id: &str,
) -> Result<UserProfile> {
    let profile = sqlx::query_as::<_, UserProfile>(
        "INSERT INTO user_profiles (app_id, external_user_id) VALUES ($1, $2) \
         ON CONFLICT (app_id, external_user_id) \
         DO UPDATE SET external_user_id = EXCLUDED.external_user_id \
         RETURNING *",
    )
    .bind(app_id)
    .bind(external_user_id)
    .fetch_one(pool)
    .await
    .context("failed to ensure user profile")?;

    Ok(profile)
}

pub async fn get_user_profile(
    pool: &PgPool,
    app_id: Uuid,
    external_user_id: &str,
) -> Result<Option<UserProfile>> {
    let profile = sqlx::query_as::<_, UserProfile>(
        "SELECT * FROM user_profiles WHERE app_id = $1 AND external_user_id = $2",
    )
    .bind(app_id)
    .bind(external_user_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch user profile")?;

    Ok(profile)
}

/// Apply one terminal outcome to the trust counters in a single UPDATE
/// so concurrent recordings cannot lose increments.
pub async fn record_trust_outcome(
    pool: &PgPool,
    app_id: Uuid,
    external_user_id: &str,
    success: bool,
) -> Result<UserProfile> {
    let profile = sqlx::query_as::<_, UserProfile>(
        "UPDATE user_profiles SET \
           total_tasks = total_tasks + 1, \
           successful_tasks = successful_tasks + CASE WHEN $3 THEN 1 ELSE 0 END, \
           failed_tasks = failed_tasks + CASE WHEN $3 THEN 0 ELSE 1 END, \
           consecutive_successes = CASE WHEN $3 THEN consecutive_successes + 1 ELSE 0 END, \
           last_task_at = now() \
         WHERE app_id = $1 AND external_user_id = $2 \
         RETURNING *",
    )
    .bind(app_id)
    .bind(external_user_id)
    .bind(success)
    .fetch_one(pool)
    .await
    .context("failed to record trust outcome")?;

    Ok(profile)
}

pub async fn set_trust_level(
    pool: &PgPool,
    app_id: Uuid,
    external_user_id: &str,
    level: i16,
) -> Result<UserProfile> {
    let profile = sqlx::query_as::<_, UserProfile>(
        "UPDATE user_profiles SET current_trust_level = $3 \
         WHERE app_id = $1 AND external_user_id = $2 \
         RETURNING *",
    )
    .bind(app_id)
    .bind(external_user_id)
    .bind(level)
    .fetch_one(pool)
    .await
    .context("failed to set trust level")?;

    Ok(profile)
}
