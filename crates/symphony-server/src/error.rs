//! HTTP error mapping.
//!
//! All error bodies carry a `detail` field. Core errors map onto the
//! status ranges of the API contract: validation -> 400, auth -> 401 or
//! 403, missing resources -> 404, everything else -> 500 (recorded,
//! minimally surfaced).

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use symphony_core::error::LoopError;

pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            detail: detail.into(),
        }
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        error!(error = %format!("{err:#}"), "internal error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: "internal error".to_string(),
        }
    }
}

impl From<LoopError> for ApiError {
    fn from(err: LoopError) -> Self {
        match err {
            LoopError::Validation(detail) => Self::bad_request(detail),
            LoopError::Cancelled => Self::bad_request("task cancelled"),
            LoopError::Capability { missing } => Self::internal(anyhow::anyhow!(
                "required capabilities unsatisfied: {missing:?}"
            )),
            other => Self::internal(anyhow::anyhow!(other)),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({ "detail": self.detail });
        (self.status, Json(body)).into_response()
    }
}
