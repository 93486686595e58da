//! Catch-up endpoints.
//!
//! `GET /api/state?sessionId=X` returns the extrapolated snapshot a late
//! joiner starts from. `POST /api/state` applies one mutation with the
//! server as sender and returns the updated state.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use watchparty_core::models::{
    ClientId, PlaybackAction, QueueAction, QueueEvent, SessionId, SessionState, Video,
};
use watchparty_core::service::QueueOutcome;

use super::{AppError, AppResult, AppState};

pub fn create_state_router() -> Router<AppState> {
    Router::new().route("/api/state", get(get_state).post(post_state))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Body of `POST /api/state`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMutation {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub current_time: Option<f64>,
    #[serde(default)]
    pub video: Option<Video>,
    #[serde(default)]
    pub videos: Option<Vec<Video>>,
    #[serde(default)]
    pub video_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    #[serde(flatten)]
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<&'static str>,
}

fn require_session_id(session_id: Option<String>) -> AppResult<SessionId> {
    match session_id {
        Some(id) if !id.trim().is_empty() => Ok(SessionId::from_string(id)),
        _ => Err(AppError::bad_request("sessionId is required")),
    }
}

pub async fn get_state(
    State(state): State<AppState>,
    query: Result<Query<StateQuery>, QueryRejection>,
) -> AppResult<Json<SessionState>> {
    let Query(query) = query?;
    let session_id = require_session_id(query.session_id)?;
    Ok(Json(state.sync_service.snapshot(&session_id)))
}

pub async fn post_state(
    State(state): State<AppState>,
    body: Result<Json<StateMutation>, JsonRejection>,
) -> AppResult<Json<StateResponse>> {
    let Json(body) = body?;
    let session_id = require_session_id(body.session_id)?;
    let event_type = body
        .event_type
        .ok_or_else(|| AppError::bad_request("type is required"))?;
    let service = &state.sync_service;

    if let Some(action) = PlaybackAction::parse(&event_type) {
        // A bare play/pause keeps the stored playhead
        let current_time = body
            .current_time
            .unwrap_or_else(|| service.snapshot(&session_id).current_time);
        service.apply_playback(&session_id, action, current_time, ClientId::server())?;
        info!(session_id = %session_id, action = %action, current_time, "Playback updated over HTTP");
        return Ok(Json(StateResponse {
            state: service.snapshot(&session_id),
            notice: None,
        }));
    }

    let action = QueueAction::parse(&event_type)
        .ok_or_else(|| AppError::bad_request(format!("unknown event type: {event_type}")))?;
    let change = service.apply_queue(
        &session_id,
        QueueEvent {
            action,
            video: body.video,
            videos: body.videos,
            video_id: body.video_id,
            sender_id: ClientId::server(),
        },
    )?;
    let notice = (change.outcome == QueueOutcome::AlreadyQueued).then_some("already-queued");
    Ok(Json(StateResponse {
        state: change.state,
        notice,
    }))
}
