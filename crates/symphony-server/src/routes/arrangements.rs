//! Saved-arrangement CRUD: persisted, reusable composition specs.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::Value;

use symphony_core::composition::ArrangementSpec;

use crate::auth::AuthedApp;
use crate::error::ApiError;
use crate::routes::tasks::created;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SaveArrangementBody {
    pub name: String,
    pub spec: Value,
}

pub async fn save_arrangement(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
    Json(body): Json<SaveArrangementBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("arrangement name must not be empty"));
    }
    // Persist only specs that would build.
    let spec: ArrangementSpec = serde_json::from_value(body.spec.clone())
        .map_err(|e| ApiError::bad_request(format!("invalid arrangement spec: {e}")))?;
    spec.validate()?;

    let saved = state
        .store
        .upsert_arrangement(auth.app.id, &body.name, &body.spec)
        .await
        .map_err(ApiError::internal)?;
    Ok(created(saved))
}

pub async fn list_arrangements(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
) -> Result<impl IntoResponse, ApiError> {
    let arrangements = state
        .store
        .list_arrangements(auth.app.id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(arrangements))
}

pub async fn get_arrangement(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let arrangement = state
        .store
        .get_arrangement(auth.app.id, &name)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("arrangement {name:?} not found")))?;
    Ok(Json(arrangement))
}
