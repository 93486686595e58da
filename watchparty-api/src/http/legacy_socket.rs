//! `GET /socket/{session_id}`: legacy per-session socket.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
};
use tracing::debug;
use watchparty_core::models::{ClientId, SessionId};

use super::websocket::serve_socket;
use crate::http::{AppError, AppState};
use crate::impls::{ConnectionContext, LegacyBridge};

pub async fn legacy_socket_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    if session_id.trim().is_empty() {
        return Err(AppError::bad_request("session id is required"));
    }

    // Legacy clients have no sender id of their own
    let sender_id = ClientId::legacy();
    let ctx = ConnectionContext {
        session_id: SessionId::from_string(session_id),
        connection_id: sender_id.as_str().to_string(),
        sender_id,
        service: state.sync_service.clone(),
    };
    debug!(
        session_id = %ctx.session_id,
        connection_id = %ctx.connection_id,
        "Upgrading legacy socket"
    );

    Ok(ws
        .max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| serve_socket(socket, ctx, LegacyBridge, None)))
}
