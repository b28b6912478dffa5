//! Parley server library logic.

pub mod api_calls;
pub mod api_media;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use parley_session::SessionManager;
use parley_voice::MediaBridge;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Every live call.
    pub sessions: SessionManager,
    /// Media links that workers attach to at `/media/{roomName}`.
    pub bridge: MediaBridge,
}

/// Maximum request body size (64 KiB). Call requests are small JSON documents.
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeCalls": state.sessions.active_count(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/calls", get(api_calls::list_calls_handler))
        .route("/api/calls/inbound", post(api_calls::inbound_call_handler))
        .route("/api/calls/outbound", post(api_calls::outbound_call_handler))
        .route("/api/calls/{callId}", get(api_calls::get_call_handler))
        .route("/api/calls/{callId}/end", post(api_calls::end_call_handler))
        .route("/media/{roomName}", get(api_media::media_ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
