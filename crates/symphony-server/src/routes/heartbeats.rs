//! Heartbeat CRUD and the forced scheduler tick.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use symphony_core::scheduler::{validate_cron_expression, validate_timezone};
use symphony_db::store::{HeartbeatUpdate, NewHeartbeat};

use crate::auth::AuthedApp;
use crate::error::ApiError;
use crate::routes::tasks::created;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateHeartbeatBody {
    pub name: String,
    pub query_template: String,
    pub cron_expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub context_template: Option<Value>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_active() -> bool {
    true
}

pub async fn create_heartbeat(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
    Json(body): Json<CreateHeartbeatBody>,
) -> Result<impl IntoResponse, ApiError> {
    validate_cron_expression(&body.cron_expression)?;
    validate_timezone(&body.timezone)?;

    let heartbeat = state
        .store
        .insert_heartbeat(&NewHeartbeat {
            app_id: auth.app.id,
            user_id: auth.user_id,
            name: body.name,
            query_template: body.query_template,
            cron_expression: body.cron_expression,
            timezone: body.timezone,
            context_template: body.context_template,
            webhook_url: body.webhook_url,
            is_active: body.is_active,
        })
        .await
        .map_err(ApiError::internal)?;
    Ok(created(heartbeat))
}

pub async fn list_heartbeats(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
) -> Result<impl IntoResponse, ApiError> {
    let heartbeats = state
        .store
        .list_heartbeats(auth.app.id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(heartbeats))
}

pub async fn get_heartbeat(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let heartbeat = state
        .store
        .get_heartbeat(auth.app.id, id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("heartbeat {id} not found")))?;
    Ok(Json(heartbeat))
}

#[derive(Debug, Deserialize)]
pub struct UpdateHeartbeatBody {
    pub name: Option<String>,
    pub query_template: Option<String>,
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub context_template: Option<Value>,
    pub webhook_url: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn update_heartbeat(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateHeartbeatBody>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(expression) = &body.cron_expression {
        validate_cron_expression(expression)?;
    }
    if let Some(timezone) = &body.timezone {
        validate_timezone(timezone)?;
    }

    let heartbeat = state
        .store
        .update_heartbeat(
            auth.app.id,
            id,
            &HeartbeatUpdate {
                name: body.name,
                query_template: body.query_template,
                cron_expression: body.cron_expression,
                timezone: body.timezone,
                context_template: body.context_template,
                webhook_url: body.webhook_url,
                is_active: body.is_active,
            },
        )
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("heartbeat {id} not found")))?;
    Ok(Json(heartbeat))
}

pub async fn delete_heartbeat(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .store
        .delete_heartbeat(auth.app.id, id)
        .await
        .map_err(ApiError::internal)?;
    if !deleted {
        return Err(ApiError::not_found(format!("heartbeat {id} not found")));
    }
    Ok(Json(json!({"deleted": id})))
}

#[derive(Debug, Deserialize)]
pub struct RunsParams {
    #[serde(default = "default_runs_limit")]
    limit: i64,
}

fn default_runs_limit() -> i64 {
    20
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
    Path(id): Path<Uuid>,
    Query(params): Query<RunsParams>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_heartbeat(auth.app.id, id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("heartbeat {id} not found")))?;

    let runs = state
        .store
        .list_heartbeat_runs(auth.app.id, id, params.limit.clamp(1, 200))
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(runs))
}

/// Force one scheduler pass right now.
pub async fn force_tick(
    State(state): State<Arc<AppState>>,
    _auth: AuthedApp,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let fired = state
        .scheduler
        .tick(now)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"fired": fired, "at": now})))
}
