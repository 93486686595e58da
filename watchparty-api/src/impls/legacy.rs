//! Legacy socket protocol bridge.
//!
//! Older clients talk `{"event": ..., "data": ...}` frames over a direct
//! per-session socket. The bridge translates those frames onto the same
//! [`SyncService`](super::sync_service::SyncService) calls the current
//! protocol uses and renders hub events back into legacy frames. It keeps no
//! state of its own.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use watchparty_cluster::HubEvent;
use watchparty_core::models::{
    ChannelMessage, PlaybackAction, QueueAction, QueueEvent, SessionState, SyncEvent, Video,
};
use watchparty_core::service::QueueOutcome;
use watchparty_core::{Error, Result};

use super::messaging::{ConnectionContext, FrameProtocol};

pub const EVENT: &str = "event";
pub const REQUEST_VIDEO_STATE: &str = "request-video-state";
pub const VIDEO_STATE_SYNC: &str = "video-state-sync";
pub const VIDEO_LIST_EVENT: &str = "video_list_event";
pub const UPDATE_VIDEO_LIST: &str = "update_video_list";
pub const ERROR: &str = "error";

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a, T> {
    event: &'a str,
    data: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayerState {
    LoadVideo,
    Play,
    Pause,
    Seek,
}

/// Payload of the generic `event` message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEvent {
    pub state: PlayerState,
    #[serde(default)]
    pub current_time: Option<f64>,
    #[serde(default)]
    pub video: Option<Video>,
    #[serde(default)]
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListAction {
    Add,
    Remove,
    Set,
}

/// Payload of `video_list_event`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEvent {
    pub action: ListAction,
    #[serde(default)]
    pub video: Option<Video>,
    #[serde(default)]
    pub videos: Option<Vec<Video>>,
    #[serde(default)]
    pub video_id: Option<String>,
}

/// Outbound `event` payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerUpdate<'a> {
    state: PlaybackAction,
    current_time: f64,
    timestamp: i64,
    sender_id: &'a str,
}

/// Outbound `update_video_list` payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoList {
    videos: Vec<Video>,
    current_video: Option<Video>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<&'static str>,
}

impl VideoList {
    fn from_state(state: SessionState) -> Self {
        Self {
            videos: state.queue,
            current_video: state.current_video,
            notice: None,
        }
    }
}

/// Stateless translator between legacy frames and the sync service
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyBridge;

impl LegacyBridge {
    fn encode<T: Serialize>(event: &str, data: T) -> Option<String> {
        serde_json::to_string(&OutboundFrame { event, data })
            .map_err(|e| warn!(event, error = %e, "Failed to encode legacy frame"))
            .ok()
    }

    fn error_frame(message: &str) -> Option<String> {
        Self::encode(ERROR, serde_json::json!({ "error": message, "status": 400 }))
    }

    /// Translate a list event into a queue event.
    ///
    /// Payload presence is checked later by the queue manager.
    #[must_use]
    pub fn queue_event(ctx: &ConnectionContext, event: ListEvent) -> QueueEvent {
        QueueEvent {
            action: match event.action {
                ListAction::Add => QueueAction::AddVideo,
                ListAction::Remove => QueueAction::RemoveVideo,
                ListAction::Set => QueueAction::SetVideos,
            },
            video: event.video,
            videos: event.videos,
            video_id: event.video_id,
            sender_id: ctx.sender_id.clone(),
        }
    }

    fn handle_player_event(
        &self,
        ctx: &ConnectionContext,
        event: PlayerEvent,
    ) -> Result<Option<String>> {
        let action = match event.state {
            PlayerState::LoadVideo => {
                let video = match (event.video, event.video_id) {
                    (Some(video), _) if video.has_valid_id() => video,
                    (_, Some(video_id)) => ctx
                        .service
                        .snapshot(&ctx.session_id)
                        .queue
                        .into_iter()
                        .find(|v| v.video_id == video_id)
                        .ok_or_else(|| {
                            Error::InvalidInput(format!("video {video_id} is not queued"))
                        })?,
                    _ => return Err(Error::InvalidInput("load-video requires a video".to_string())),
                };
                ctx.service
                    .load_video(&ctx.session_id, video, ctx.sender_id.clone());
                return Ok(None);
            }
            PlayerState::Play => PlaybackAction::Play,
            PlayerState::Pause => PlaybackAction::Pause,
            PlayerState::Seek => PlaybackAction::Seek,
        };

        let current_time = event
            .current_time
            .unwrap_or_else(|| ctx.service.snapshot(&ctx.session_id).current_time);
        ctx.service
            .apply_playback(&ctx.session_id, action, current_time, ctx.sender_id.clone())?;
        Ok(None)
    }

    fn handle_list_event(
        &self,
        ctx: &ConnectionContext,
        event: ListEvent,
    ) -> Result<Option<String>> {
        let change = ctx
            .service
            .apply_queue(&ctx.session_id, Self::queue_event(ctx, event))?;
        if change.outcome.is_applied() {
            // Everyone, the requester included, gets the list via broadcast
            return Ok(None);
        }
        let mut list = VideoList::from_state(change.state);
        list.notice = (change.outcome == QueueOutcome::AlreadyQueued).then_some("already-queued");
        Ok(Self::encode(UPDATE_VIDEO_LIST, list))
    }

    fn dispatch(&self, ctx: &ConnectionContext, frame: InboundFrame) -> Result<Option<String>> {
        match frame.event.as_str() {
            EVENT => {
                let event: PlayerEvent = serde_json::from_value(frame.data)?;
                self.handle_player_event(ctx, event)
            }
            REQUEST_VIDEO_STATE => {
                let snapshot = ctx.service.snapshot(&ctx.session_id);
                Ok(Self::encode(VIDEO_STATE_SYNC, snapshot))
            }
            VIDEO_LIST_EVENT => {
                let event: ListEvent = serde_json::from_value(frame.data)?;
                self.handle_list_event(ctx, event)
            }
            other => Err(Error::InvalidInput(format!("unknown event: {other}"))),
        }
    }
}

impl FrameProtocol for LegacyBridge {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn handle_frame(&self, ctx: &ConnectionContext, frame: &str) -> Vec<String> {
        let result = serde_json::from_str::<InboundFrame>(frame)
            .map_err(Error::from)
            .and_then(|frame| {
                debug!(
                    session_id = %ctx.session_id,
                    sender_id = %ctx.sender_id,
                    event = %frame.event,
                    "Legacy frame received"
                );
                self.dispatch(ctx, frame)
            });

        match result {
            Ok(reply) => reply.into_iter().collect(),
            Err(e) => {
                warn!(
                    session_id = %ctx.session_id,
                    sender_id = %ctx.sender_id,
                    error = %e,
                    "Rejected legacy frame"
                );
                Self::error_frame(&e.to_string()).into_iter().collect()
            }
        }
    }

    fn render(&self, ctx: &ConnectionContext, event: &HubEvent) -> Option<String> {
        match event {
            HubEvent::Message(ChannelMessage::VideoSync(sync)) => {
                // Legacy clients do not filter their own echoes
                if sync.sender_id == ctx.sender_id {
                    return None;
                }
                Self::encode(EVENT, player_update(sync))
            }
            HubEvent::Message(ChannelMessage::VideoListUpdate(_)) => Self::encode(
                UPDATE_VIDEO_LIST,
                VideoList::from_state(ctx.service.snapshot(&ctx.session_id)),
            ),
            HubEvent::Presence(_) => None,
        }
    }
}

fn player_update(event: &SyncEvent) -> PlayerUpdate<'_> {
    PlayerUpdate {
        state: event.action,
        current_time: event.current_time,
        timestamp: event.server_timestamp,
        sender_id: event.sender_id.as_str(),
    }
}
