use serde::{Deserialize, Serialize};
use watchparty_core::models::{ChannelMessage, SessionId};

/// Presence sub-channel action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Enter,
    Leave,
    Update,
}

/// Presence change announced to a session's subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub session_id: SessionId,
    pub action: PresenceAction,
    pub identity: String,
}

/// Everything delivered to a session subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Message(ChannelMessage),
    Presence(PresenceUpdate),
}

impl HubEvent {
    /// Get a short description of the event type
    #[must_use]
    pub fn event_type(&self) -> String {
        match self {
            Self::Message(message) => message.event_type(),
            Self::Presence(update) => format!("presence:{:?}", update.action).to_lowercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchparty_core::models::{ClientId, PlaybackAction, SyncEvent};

    #[test]
    fn test_event_type() {
        let message = HubEvent::Message(ChannelMessage::VideoSync(SyncEvent::new(
            PlaybackAction::Pause,
            1.0,
            ClientId::from("c"),
        )));
        assert_eq!(message.event_type(), "video-sync:pause");

        let presence = HubEvent::Presence(PresenceUpdate {
            session_id: SessionId::from("s"),
            action: PresenceAction::Leave,
            identity: "alice".to_string(),
        });
        assert_eq!(presence.event_type(), "presence:leave");
    }
}
