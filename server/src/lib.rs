//! Beacon Server - real-time event push over Server-Sent Events.
//!
//! Domain services publish order events over HTTP (or call the
//! [`Broadcaster`] directly when embedded); browsers and tools subscribe to
//! `GET /events`, optionally filtered by subject and event type.

pub mod broadcast;
pub mod config;
mod error;
mod handlers;
mod routes;

pub use broadcast::{BroadcastEvent, BroadcastReport, Broadcaster, BroadcasterSettings};
pub use config::Config;
pub use error::AppError;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub broadcaster: Arc<Broadcaster>,
}

impl AppState {
    /// State with a fresh (non-global) broadcaster.
    pub fn new(config: Config) -> Self {
        let broadcaster = Broadcaster::new_shared(BroadcasterSettings::from(&config));
        Self {
            config: Arc::new(config),
            broadcaster,
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
