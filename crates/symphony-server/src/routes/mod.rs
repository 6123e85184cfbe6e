//! Router assembly.

pub mod arrangements;
pub mod health;
pub mod heartbeats;
pub mod rooms;
pub mod stream;
pub mod tasks;
pub mod trust;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Tasks
        .route("/task", post(tasks::submit_task))
        .route("/task/{id}", get(tasks::poll_task))
        .route("/task/{id}/approve", post(tasks::approve_task))
        .route("/task/{id}/cancel", post(tasks::cancel_task))
        .route("/task/{id}/checkpoints", get(tasks::task_checkpoints))
        .route("/task/{id}/stream", get(stream::stream_task))
        .route("/tasks/active", get(tasks::active_tasks))
        .route("/tasks/recent", get(tasks::recent_tasks))
        .route("/tasks/stats", get(tasks::task_stats))
        // Trust
        .route("/trust/metrics", get(trust::get_metrics))
        .route("/trust/suggestion", get(trust::get_suggestion))
        .route("/trust/level", put(trust::put_level))
        // Heartbeats
        .route(
            "/heartbeats",
            get(heartbeats::list_heartbeats).post(heartbeats::create_heartbeat),
        )
        .route(
            "/heartbeats/{id}",
            get(heartbeats::get_heartbeat)
                .put(heartbeats::update_heartbeat)
                .delete(heartbeats::delete_heartbeat),
        )
        .route("/heartbeats/{id}/runs", get(heartbeats::list_runs))
        .route("/heartbeats/tick", post(heartbeats::force_tick))
        // Arrangements
        .route(
            "/arrangements",
            get(arrangements::list_arrangements).post(arrangements::save_arrangement),
        )
        .route("/arrangements/{name}", get(arrangements::get_arrangement))
        // Rooms
        .route("/rooms", get(rooms::list_rooms))
        .route("/rooms/register", post(rooms::register_room))
        .route("/rooms/heartbeat", post(rooms::room_heartbeat))
        .route("/rooms/deregister", post(rooms::deregister_room))
        .route("/rooms/status", get(rooms::rooms_status))
        .route("/rooms/{id}", get(rooms::get_room))
        // Health
        .route("/health", get(health::health))
        .route("/health/system", get(health::health_system))
        .route("/health/database", get(health::health_database))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
