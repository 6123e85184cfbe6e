//! Server-Sent Events for a task's topic.
//!
//! Late joiners get the full history replayed before live events; the
//! terminal event is the last thing on the wire and the stream closes
//! after it. A no-op keepalive comment goes out every 30 seconds.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};

use symphony_core::bus::TaskEvent;

use crate::auth::MaybeAuthedApp;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn stream_task(
    State(state): State<Arc<AppState>>,
    auth: MaybeAuthedApp,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Topic access is app-scoped through the task row.
    state
        .store
        .get_task(auth.app.id, &id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found(format!("task {id} not found")))?;

    let events = state.bus.subscribe(&id).map(|event| Ok(to_sse(&event)));

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    ))
}

fn to_sse(event: &TaskEvent) -> Event {
    let name = match event {
        TaskEvent::Started { .. } => "started",
        TaskEvent::Iteration { .. } => "iteration",
        TaskEvent::Complete { .. } => "complete",
        TaskEvent::Error { .. } => "error",
        TaskEvent::Cancelled { .. } => "cancelled",
    };
    match Event::default().event(name).json_data(event) {
        Ok(sse_event) => sse_event,
        Err(_) => Event::default().event(name).data("{}"),
    }
}
