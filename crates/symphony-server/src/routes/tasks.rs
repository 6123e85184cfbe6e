//! Task submission, polling, approval, cancellation and listings.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value, json};

use symphony_core::types::TaskRequest;
use symphony_db::models::{TaskRow, TaskStatus};

use crate::auth::MaybeAuthedApp;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthedApp,
    Json(request): Json<TaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .conductor
        .submit(auth.app.id, auth.user_id, request)
        .await?;
    Ok(Json(outcome))
}

pub async fn approve_task(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthedApp,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .conductor
        .approve(auth.app.id, &id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))?;
    Ok(Json(outcome))
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthedApp,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .conductor
        .cancel(auth.app.id, &id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))?;
    Ok(Json(json!({"task_id": id, "status": status})))
}

#[derive(Debug, Deserialize)]
pub struct PollParams {
    /// Trust-level-2 tasks elide findings and metadata from the default
    /// poll response; `full=true` asks for everything.
    #[serde(default)]
    full: bool,
}

pub async fn poll_task(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthedApp,
    Path(id): Path<String>,
    Query(params): Query<PollParams>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .store
        .get_task(auth.app.id, &id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))?;

    Ok(Json(poll_body(&task, params.full)))
}

fn poll_body(task: &TaskRow, full: bool) -> Value {
    match task.status {
        TaskStatus::Complete => {
            let mut body = task.response.clone().unwrap_or_else(|| json!({}));
            if minimal_surface(task) && !full {
                body = json!({
                    "request_id": task.id,
                    "summary": body["summary"],
                    "confidence": body["confidence"],
                    "outcome": task.outcome,
                });
            }
            body["status"] = json!(task.status);
            body
        }
        TaskStatus::Failed => json!({
            "task_id": task.id,
            "status": task.status,
            "error": task.error,
        }),
        TaskStatus::Cancelled => json!({
            "task_id": task.id,
            "status": task.status,
        }),
        _ => json!({
            "task_id": task.id,
            "status": task.status,
            "created_at": task.created_at,
            "updated_at": task.updated_at,
            "request": task.request,
        }),
    }
}

/// Whether the task was submitted at trust level 2 (minimal surface).
fn minimal_surface(task: &TaskRow) -> bool {
    task.request["preferences"]["trust_level"].as_i64() == Some(2)
}

pub async fn task_checkpoints(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthedApp,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_task(auth.app.id, &id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))?;

    let checkpoints = state
        .store
        .list_iterations(auth.app.id, &id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(checkpoints))
}

pub async fn active_tasks(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthedApp,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .store
        .list_tasks_by_status(
            auth.app.id,
            &[
                TaskStatus::Pending,
                TaskStatus::AwaitingApproval,
                TaskStatus::Running,
            ],
            100,
        )
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(tasks))
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

pub async fn recent_tasks(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthedApp,
    Query(params): Query<RecentParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.clamp(1, 500);
    let tasks = state
        .store
        .list_recent_tasks(auth.app.id, limit)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(tasks))
}

pub async fn task_stats(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthedApp,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state
        .store
        .task_stats(auth.app.id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(stats))
}

/// 201 helper for the heartbeat routes; kept here so the status-code
/// mapping lives in one crate-local place.
pub fn created<T: serde::Serialize>(body: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(body))
}
