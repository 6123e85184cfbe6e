//! Room registration, heartbeats (with knowledge-sync piggyback) and
//! discovery.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;

use symphony_core::rooms::{RoomHeartbeat, RoomRegistration, RoomStatus};

use crate::auth::AuthedApp;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn register_room(
    State(state): State<Arc<AppState>>,
    _auth: AuthedApp,
    Json(registration): Json<RoomRegistration>,
) -> Result<impl IntoResponse, ApiError> {
    if registration.room_id.trim().is_empty() {
        return Err(ApiError::bad_request("room_id must not be empty"));
    }
    let room = state.rooms.register(registration);
    Ok(Json(room))
}

/// Refresh liveness and piggyback the knowledge delta since the
/// caller's last synced version.
pub async fn room_heartbeat(
    State(state): State<Arc<AppState>>,
    auth: AuthedApp,
    Json(beat): Json<RoomHeartbeat>,
) -> Result<impl IntoResponse, ApiError> {
    let known = state.rooms.heartbeat(&beat);
    if !known {
        return Err(ApiError::not_found(format!(
            "room {} is not registered",
            beat.room_id
        )));
    }

    let (entries, latest_version) = state
        .store
        .knowledge_since(auth.app.id, beat.last_knowledge_version)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "room_id": beat.room_id,
        "knowledge": {
            "entries": entries,
            "latest_version": latest_version,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeregisterBody {
    room_id: String,
}

pub async fn deregister_room(
    State(state): State<Arc<AppState>>,
    _auth: AuthedApp,
    Json(body): Json<DeregisterBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.rooms.deregister(&body.room_id) {
        return Err(ApiError::not_found(format!(
            "room {} is not registered",
            body.room_id
        )));
    }
    Ok(Json(json!({"deregistered": body.room_id})))
}

pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    _auth: AuthedApp,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.rooms.list()))
}

pub async fn get_room(
    State(state): State<Arc<AppState>>,
    _auth: AuthedApp,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let room = state
        .rooms
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("room {id} is not registered")))?;
    Ok(Json(room))
}

pub async fn rooms_status(
    State(state): State<Arc<AppState>>,
    _auth: AuthedApp,
) -> Result<impl IntoResponse, ApiError> {
    let rooms = state.rooms.list();
    let online = rooms.iter().filter(|r| r.status == RoomStatus::Online).count();
    let offline = rooms.iter().filter(|r| r.status == RoomStatus::Offline).count();
    let degraded = rooms
        .iter()
        .filter(|r| r.status == RoomStatus::Degraded)
        .count();
    Ok(Json(json!({
        "total": rooms.len(),
        "online": online,
        "offline": offline,
        "degraded": degraded,
    })))
}
