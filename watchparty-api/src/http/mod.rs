// Module: http
// JSON catch-up API plus the session and legacy WebSocket endpoints

pub mod error;
pub mod health;
pub mod legacy_socket;
pub mod state;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::impls::SyncService;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sync_service: SyncService,
    /// Largest inbound WebSocket frame accepted
    pub max_message_bytes: usize,
}

impl AppState {
    #[must_use]
    pub const fn new(sync_service: SyncService, max_message_bytes: usize) -> Self {
        Self {
            sync_service,
            max_message_bytes,
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::create_health_router())
        .merge(state::create_state_router())
        .route(
            "/ws/sessions/{session_id}",
            get(websocket::session_socket_handler),
        )
        .route(
            "/socket/{session_id}",
            get(legacy_socket::legacy_socket_handler),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
