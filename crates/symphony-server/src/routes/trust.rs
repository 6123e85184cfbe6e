//! Trust metrics, suggestions and the one mutation path for the level.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthedApp;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth.require_user()?;
    let metrics = state
        .trust
        .metrics(auth.app.id, user_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(metrics))
}

pub async fn get_suggestion(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth.require_user()?;
    let suggestion = state
        .trust
        .suggestion(auth.app.id, user_id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({"suggestion": suggestion})))
}

#[derive(Debug, Deserialize)]
pub struct PutLevelBody {
    trust_level: i16,
}

pub async fn put_level(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
    Json(body): Json<PutLevelBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = auth.require_user()?;
    let profile = state
        .trust
        .set_level(auth.app.id, user_id, body.trust_level)
        .await?;
    Ok(Json(json!({
        "trust_level": profile.current_trust_level,
        "user_id": profile.external_user_id,
    })))
}
