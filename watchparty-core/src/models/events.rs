//! Wire events exchanged on a session's channel.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::id::ClientId;
use super::video::Video;
use crate::{Error, Result};

/// Playback transition carried by a `video-sync` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackAction {
    Play,
    Pause,
    Seek,
}

impl PlaybackAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Seek => "seek",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "play" => Some(Self::Play),
            "pause" => Some(Self::Pause),
            "seek" => Some(Self::Seek),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlaybackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `video-sync` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub action: PlaybackAction,
    pub current_time: f64,
    /// Wall-clock milliseconds at which the event was issued
    #[serde(rename = "timestamp", alias = "serverTimestamp", default)]
    pub server_timestamp: i64,
    pub sender_id: ClientId,
}

impl SyncEvent {
    #[must_use]
    pub fn new(action: PlaybackAction, current_time: f64, sender_id: ClientId) -> Self {
        Self {
            action,
            current_time,
            server_timestamp: Utc::now().timestamp_millis(),
            sender_id,
        }
    }

    /// Reject playheads that are negative or not a number
    pub fn validate(&self) -> Result<()> {
        if self.current_time.is_finite() && self.current_time >= 0.0 {
            Ok(())
        } else {
            Err(Error::InvalidInput(
                "currentTime must be a non-negative number".to_string(),
            ))
        }
    }
}

/// Queue mutation carried by a `video-list-update` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueAction {
    AddVideo,
    RemoveVideo,
    SetVideos,
}

impl QueueAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddVideo => "add-video",
            Self::RemoveVideo => "remove-video",
            Self::SetVideos => "set-videos",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add-video" => Some(Self::AddVideo),
            "remove-video" => Some(Self::RemoveVideo),
            "set-videos" => Some(Self::SetVideos),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `video-list-update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    #[serde(rename = "type")]
    pub action: QueueAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos: Option<Vec<Video>>,
    /// Removal target when no full `video` is supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    pub sender_id: ClientId,
}

impl QueueEvent {
    #[must_use]
    pub fn add(video: Video, sender_id: ClientId) -> Self {
        Self {
            action: QueueAction::AddVideo,
            video: Some(video),
            videos: None,
            video_id: None,
            sender_id,
        }
    }

    #[must_use]
    pub fn remove(video_id: impl Into<String>, sender_id: ClientId) -> Self {
        Self {
            action: QueueAction::RemoveVideo,
            video: None,
            videos: None,
            video_id: Some(video_id.into()),
            sender_id,
        }
    }

    #[must_use]
    pub fn set(videos: Vec<Video>, sender_id: ClientId) -> Self {
        Self {
            action: QueueAction::SetVideos,
            video: None,
            videos: Some(videos),
            video_id: None,
            sender_id,
        }
    }

    /// Video id targeted by a removal, preferring the explicit `videoId`
    #[must_use]
    pub fn target_video_id(&self) -> Option<&str> {
        self.video_id
            .as_deref()
            .or_else(|| self.video.as_ref().map(|v| v.video_id.as_str()))
    }
}

/// Messages published on a session's topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum ChannelMessage {
    VideoSync(SyncEvent),
    VideoListUpdate(QueueEvent),
}

impl ChannelMessage {
    #[must_use]
    pub const fn sender_id(&self) -> &ClientId {
        match self {
            Self::VideoSync(event) => &event.sender_id,
            Self::VideoListUpdate(event) => &event.sender_id,
        }
    }

    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::VideoSync(_) => "video-sync",
            Self::VideoListUpdate(_) => "video-list-update",
        }
    }

    /// Short description of the event type, e.g. `video-sync:play`
    #[must_use]
    pub fn event_type(&self) -> String {
        match self {
            Self::VideoSync(event) => format!("video-sync:{}", event.action),
            Self::VideoListUpdate(event) => format!("video-list-update:{}", event.action),
        }
    }
}

/// One identity in a session's presence set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub identity: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PresenceEntry {
    #[must_use]
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            avatar: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_event_wire_shape() {
        let event = SyncEvent {
            action: PlaybackAction::Play,
            current_time: 12.5,
            server_timestamp: 1_700_000_000_000,
            sender_id: ClientId::from("alice"),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "play");
        assert_eq!(json["currentTime"], 12.5);
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(json["senderId"], "alice");
    }

    #[test]
    fn test_sync_event_accepts_server_timestamp_alias() {
        let event: SyncEvent = serde_json::from_str(
            r#"{"type":"seek","currentTime":3.0,"serverTimestamp":42,"senderId":"bob"}"#,
        )
        .unwrap();
        assert_eq!(event.action, PlaybackAction::Seek);
        assert_eq!(event.server_timestamp, 42);
    }

    #[test]
    fn test_sync_event_playhead_validation() {
        let sender = ClientId::from("alice");
        assert!(SyncEvent::new(PlaybackAction::Seek, 0.0, sender.clone()).validate().is_ok());
        assert!(SyncEvent::new(PlaybackAction::Seek, 95.5, sender.clone()).validate().is_ok());
        for bad in [-5.0, f64::NAN, f64::INFINITY] {
            let err = SyncEvent::new(PlaybackAction::Seek, bad, sender.clone())
                .validate()
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));
        }
    }

    #[test]
    fn test_channel_message_is_adjacently_tagged() {
        let msg = ChannelMessage::VideoListUpdate(QueueEvent::remove("v1", ClientId::from("c")));
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["name"], "video-list-update");
        assert_eq!(json["data"]["type"], "remove-video");
        assert_eq!(json["data"]["videoId"], "v1");
        assert_eq!(msg.event_type(), "video-list-update:remove-video");
    }

    #[test]
    fn test_removal_target_falls_back_to_video() {
        let mut event = QueueEvent::add(Video::new("v9", "u", "t"), ClientId::from("c"));
        event.action = QueueAction::RemoveVideo;
        assert_eq!(event.target_video_id(), Some("v9"));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(PlaybackAction::parse("pause"), Some(PlaybackAction::Pause));
        assert_eq!(QueueAction::parse("set-videos"), Some(QueueAction::SetVideos));
        assert_eq!(PlaybackAction::parse("rewind"), None);
        assert_eq!(QueueAction::parse("shuffle"), None);
    }
}
