//! Health check endpoints
//!
//! Provides a simple liveness check for monitoring.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/sessions", get(session_stats))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Live session counters
pub async fn session_stats(State(state): State<AppState>) -> impl IntoResponse {
    let service = &state.sync_service;
    Json(json!({
        "sessions": service.store().len(),
        "activeSessions": service.hub().session_count(),
        "connections": service.hub().connection_count(),
    }))
}
