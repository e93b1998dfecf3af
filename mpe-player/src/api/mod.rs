//! HTTP/SSE surface
//!
//! One playback session per client; every session route is nested under
//! `/sessions/:id`.

pub mod handlers;
pub mod server;
pub mod sse;

use crate::session::SessionManager;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub sessions: Arc<SessionManager>,
}

/// Build the router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", get(handlers::list_sessions).post(handlers::create_session))
        .route("/sessions/:id", axum::routing::delete(handlers::delete_session))
        // Transport
        .route("/sessions/:id/prepare", post(handlers::prepare))
        .route("/sessions/:id/start", post(handlers::start))
        .route("/sessions/:id/pause", post(handlers::pause))
        .route("/sessions/:id/resume", post(handlers::resume))
        .route("/sessions/:id/reset", post(handlers::reset))
        .route("/sessions/:id/seek", post(handlers::seek))
        // Queries
        .route("/sessions/:id/position", get(handlers::get_position))
        .route("/sessions/:id/status", get(handlers::get_status))
        // Settings
        .route(
            "/sessions/:id/playback_settings",
            get(handlers::get_playback_settings).post(handlers::set_playback_settings),
        )
        .route(
            "/sessions/:id/sync_settings",
            get(handlers::get_sync_settings).post(handlers::set_sync_settings),
        )
        // Tracks
        .route("/sessions/:id/tracks", get(handlers::get_tracks))
        .route("/sessions/:id/tracks/select", post(handlers::select_track))
        .route("/sessions/:id/tracks/selected", get(handlers::get_selected_track))
        // SSE event stream
        .route("/sessions/:id/events", get(sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}
