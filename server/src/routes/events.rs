//! Event stream routes.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;

use crate::broadcast::{BroadcastEvent, BroadcasterStats};
use crate::error::Result;
use crate::handlers::{handle_publish, open_stream, PublishResponse, StreamQuery};
use crate::AppState;

/// Header browsers send when an `EventSource` reconnects on its own.
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Create event routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(stream_handler).post(publish_handler))
        .route("/events/clients", get(clients_handler))
        .route("/subjects/{subject_id}/events", post(publish_subject_handler))
}

/// GET /events - Open an SSE stream.
async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let header_id = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    open_stream(state.broadcaster.clone(), &state.config, query, header_id)
}

/// POST /events - Broadcast an event.
async fn publish_handler(
    State(state): State<AppState>,
    Json(event): Json<BroadcastEvent>,
) -> Result<Json<PublishResponse>> {
    let response = handle_publish(&state.broadcaster, None, event)?;
    Ok(Json(response))
}

/// POST /subjects/{subject_id}/events - Broadcast an event for one subject.
async fn publish_subject_handler(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Json(event): Json<BroadcastEvent>,
) -> Result<Json<PublishResponse>> {
    let response = handle_publish(&state.broadcaster, Some(subject_id), event)?;
    Ok(Json(response))
}

/// GET /events/clients - Connected client statistics.
async fn clients_handler(State(state): State<AppState>) -> Json<BroadcasterStats> {
    Json(state.broadcaster.stats())
}
