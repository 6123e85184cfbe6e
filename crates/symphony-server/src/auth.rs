//! Request authentication.
//!
//! `X-Api-Key` identifies the app (validated against active `apps`
//! rows); `X-User-Id` is the external user id, creating a profile row
//! on first use. [`AuthedApp`] requires the api key; [`MaybeAuthedApp`]
//! falls back to the shared anonymous app for the endpoints where auth
//! is optional.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use symphony_db::models::App;

use crate::error::ApiError;
use crate::state::AppState;

pub struct AuthedApp {
    pub app: App,
    pub user_id: Option<String>,
}

impl AuthedApp {
    /// Endpoints that are meaningless without a user reject requests
    /// missing the header.
    pub fn require_user(&self) -> Result<&str, ApiError> {
        self.user_id
            .as_deref()
            .ok_or_else(|| ApiError::bad_request("X-User-Id header is required"))
    }
}

pub struct MaybeAuthedApp {
    pub app: App,
    pub user_id: Option<String>,
}

fn header_string(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .filter(|v| !v.is_empty())
}

async fn resolve_app(state: &Arc<AppState>, api_key: &str) -> Result<App, ApiError> {
    let app = state
        .store
        .get_app_by_api_key(api_key)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::unauthorized("invalid api key"))?;
    if !app.active {
        return Err(ApiError::forbidden("app is deactivated"));
    }
    Ok(app)
}

async fn ensure_profile(
    state: &Arc<AppState>,
    app: &App,
    user_id: Option<&str>,
) -> Result<(), ApiError> {
    if let Some(user_id) = user_id {
        state
            .store
            .ensure_user_profile(app.id, user_id)
            .await
            .map_err(ApiError::internal)?;
    }
    Ok(())
}

impl FromRequestParts<Arc<AppState>> for AuthedApp {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = header_string(parts, "x-api-key")
            .ok_or_else(|| ApiError::unauthorized("missing X-Api-Key header"))?;
        let app = resolve_app(state, &api_key).await?;
        let user_id = header_string(parts, "x-user-id");
        ensure_profile(state, &app, user_id.as_deref()).await?;
        Ok(Self { app, user_id })
    }
}

impl FromRequestParts<Arc<AppState>> for MaybeAuthedApp {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let (app, user_id) = match header_string(parts, "x-api-key") {
            Some(api_key) => {
                let app = resolve_app(state, &api_key).await?;
                (app, header_string(parts, "x-user-id"))
            }
            None => (
                state.anonymous_app.clone(),
                header_string(parts, "x-user-id"),
            ),
        };
        ensure_profile(state, &app, user_id.as_deref()).await?;
        Ok(Self { app, user_id })
    }
}
