//! Current wire protocol: `{"name": ..., "data": ...}` JSON text frames.
//!
//! Inbound `video-sync` / `video-list-update` frames are applied and then
//! broadcast to every subscriber, the sender included. Presence changes are
//! pushed as the full roster.

use serde::Serialize;
use tracing::warn;
use watchparty_cluster::HubEvent;
use watchparty_core::models::{ChannelMessage, PresenceEntry};

use super::messaging::{ConnectionContext, FrameProtocol};

#[derive(Debug, Serialize)]
pub struct PresenceFrame {
    pub count: usize,
    pub roster: Vec<PresenceEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeFrame {
    pub notice: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorFrame {
    pub error: String,
    pub status: u16,
}

/// Frames only the server emits
#[derive(Debug, Serialize)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum ServerFrame {
    Presence(PresenceFrame),
    Notice(NoticeFrame),
    Error(ErrorFrame),
}

impl ServerFrame {
    fn encode(&self) -> Option<String> {
        serde_json::to_string(self)
            .map_err(|e| warn!(error = %e, "Failed to encode server frame"))
            .ok()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionProtocol;

impl FrameProtocol for SessionProtocol {
    fn name(&self) -> &'static str {
        "session"
    }

    fn handle_frame(&self, ctx: &ConnectionContext, frame: &str) -> Vec<String> {
        let message: ChannelMessage = match serde_json::from_str(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    session_id = %ctx.session_id,
                    connection_id = %ctx.connection_id,
                    error = %e,
                    "Malformed frame"
                );
                return ServerFrame::Error(ErrorFrame {
                    error: format!("malformed frame: {e}"),
                    status: 400,
                })
                .encode()
                .into_iter()
                .collect();
            }
        };

        let video_id = match &message {
            ChannelMessage::VideoListUpdate(event) => event.target_video_id().map(str::to_string),
            ChannelMessage::VideoSync(_) => None,
        };

        let reply = match ctx.service.handle(&ctx.session_id, message) {
            Ok(applied) if applied.already_queued() => Some(ServerFrame::Notice(NoticeFrame {
                notice: "already-queued",
                video_id,
            })),
            Ok(_) => None,
            Err(e) => {
                warn!(
                    session_id = %ctx.session_id,
                    connection_id = %ctx.connection_id,
                    error = %e,
                    "Rejected event"
                );
                Some(ServerFrame::Error(ErrorFrame {
                    error: e.to_string(),
                    status: 400,
                }))
            }
        };

        reply.and_then(|frame| frame.encode()).into_iter().collect()
    }

    fn render(&self, ctx: &ConnectionContext, event: &HubEvent) -> Option<String> {
        match event {
            HubEvent::Message(message) => serde_json::to_string(message)
                .map_err(|e| warn!(error = %e, "Failed to encode channel message"))
                .ok(),
            HubEvent::Presence(_) => {
                let roster = ctx.service.members(&ctx.session_id);
                ServerFrame::Presence(PresenceFrame {
                    count: roster.len(),
                    roster,
                })
                .encode()
            }
        }
    }
}
