//! Liveness and diagnostics.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health_system(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let manager = state.manager.stats();
    let tools = state.tools.health_check_all().await;
    let tool_report: serde_json::Map<String, serde_json::Value> = tools
        .into_iter()
        .map(|(name, result)| {
            let value = match result {
                Ok(()) => json!("ok"),
                Err(detail) => json!({"error": detail}),
            };
            (name, value)
        })
        .collect();

    Ok(Json(json!({
        "status": "ok",
        "started_at": state.started_at,
        "workers": manager,
        "event_topics": state.bus.topic_count(),
        "rooms": state.rooms.list().len(),
        "tools": tool_report,
    })))
}

pub async fn health_database(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "detail": format!("{e:#}")})),
        ),
    }
}
