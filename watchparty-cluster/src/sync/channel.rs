//! Transport contract between a client handler and its session topic.

use async_trait::async_trait;
use nanoid::nanoid;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use watchparty_core::models::{ChannelMessage, PresenceEntry, SessionId};

use super::events::HubEvent;
use super::hub::{ConnectionId, SessionHub};
use crate::error::{Error, Result};

/// A live subscription to one session's topic
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<HubEvent>,
}

impl Subscription {
    #[must_use]
    pub const fn new(id: u64, receiver: mpsc::UnboundedReceiver<HubEvent>) -> Self {
        Self { id, receiver }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event; `None` once the topic is gone
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.receiver.recv().await
    }

    /// Take an already delivered event without waiting
    pub fn try_recv(&mut self) -> Option<HubEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Publish/subscribe channel scoped to one session, with presence.
///
/// Delivery is at-least-once and in order per publisher. Publishers receive
/// their own messages back and must discard them by `senderId`.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    fn session_id(&self) -> &SessionId;

    async fn publish(&self, message: ChannelMessage) -> Result<()>;

    async fn subscribe(&self) -> Result<Subscription>;

    async fn enter_presence(&self, entry: PresenceEntry) -> Result<()>;

    async fn leave_presence(&self) -> Result<()>;

    /// Authoritative member list, re-read on every call
    async fn presence_members(&self) -> Result<Vec<PresenceEntry>>;
}

/// One connection's view of a [`SessionHub`] topic.
///
/// Pure relay: messages are fanned out without touching session state.
/// Dropping the channel is treated as a disconnect.
pub struct HubChannel {
    hub: SessionHub,
    session_id: SessionId,
    connection_id: ConnectionId,
    closed: AtomicBool,
}

impl HubChannel {
    #[must_use]
    pub fn new(hub: SessionHub, session_id: SessionId) -> Self {
        Self::with_connection_id(hub, session_id, nanoid!())
    }

    #[must_use]
    pub fn with_connection_id(
        hub: SessionHub,
        session_id: SessionId,
        connection_id: impl Into<ConnectionId>,
    ) -> Self {
        let connection_id = connection_id.into();
        hub.connect(&session_id, &connection_id);
        Self {
            hub,
            session_id,
            connection_id,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detach from the hub; presence is left implicitly
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.disconnect(&self.connection_id);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed(self.connection_id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionChannel for HubChannel {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn publish(&self, message: ChannelMessage) -> Result<()> {
        self.ensure_open()?;
        self.hub.publish(&self.session_id, message);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        self.ensure_open()?;
        let (id, receiver) = self.hub.subscribe(&self.session_id, &self.connection_id);
        Ok(Subscription::new(id, receiver))
    }

    async fn enter_presence(&self, entry: PresenceEntry) -> Result<()> {
        self.ensure_open()?;
        self.hub.enter(&self.session_id, &self.connection_id, entry);
        Ok(())
    }

    async fn leave_presence(&self) -> Result<()> {
        self.ensure_open()?;
        self.hub.leave(&self.session_id, &self.connection_id);
        Ok(())
    }

    async fn presence_members(&self) -> Result<Vec<PresenceEntry>> {
        self.ensure_open()?;
        Ok(self.hub.members(&self.session_id))
    }
}

impl Drop for HubChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::events::PresenceAction;
    use watchparty_core::models::{ClientId, PlaybackAction, SyncEvent};

    #[tokio::test]
    async fn test_publish_reaches_other_channel() {
        let hub = SessionHub::new();
        let session = SessionId::from("movie-night");
        let alice = HubChannel::new(hub.clone(), session.clone());
        let bob = HubChannel::new(hub.clone(), session.clone());

        let mut bob_sub = bob.subscribe().await.unwrap();
        let message = ChannelMessage::VideoSync(SyncEvent::new(
            PlaybackAction::Play,
            4.0,
            ClientId::from("alice"),
        ));
        alice.publish(message.clone()).await.unwrap();

        assert_eq!(bob_sub.recv().await, Some(HubEvent::Message(message)));
    }

    #[tokio::test]
    async fn test_publisher_receives_own_echo() {
        let hub = SessionHub::new();
        let channel = HubChannel::new(hub, SessionId::from("s"));
        let mut sub = channel.subscribe().await.unwrap();

        let message = ChannelMessage::VideoSync(SyncEvent::new(
            PlaybackAction::Pause,
            0.0,
            ClientId::from("me"),
        ));
        channel.publish(message).await.unwrap();

        let echoed = sub.recv().await.unwrap();
        assert!(matches!(echoed, HubEvent::Message(m) if m.sender_id().as_str() == "me"));
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_operations() {
        let hub = SessionHub::new();
        let channel = HubChannel::new(hub, SessionId::from("s"));
        channel.close();

        assert!(channel.subscribe().await.is_err());
        assert!(matches!(
            channel.presence_members().await,
            Err(Error::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_drop_is_implicit_leave() {
        let hub = SessionHub::new();
        let session = SessionId::from("s");
        let watcher = HubChannel::new(hub.clone(), session.clone());
        let mut sub = watcher.subscribe().await.unwrap();

        {
            let guest = HubChannel::new(hub.clone(), session.clone());
            guest
                .enter_presence(PresenceEntry::new("guest", "Guest"))
                .await
                .unwrap();
            assert_eq!(watcher.presence_members().await.unwrap().len(), 1);
        }

        assert!(watcher.presence_members().await.unwrap().is_empty());
        let mut actions = Vec::new();
        while let Some(HubEvent::Presence(update)) = sub.try_recv() {
            actions.push(update.action);
        }
        assert_eq!(actions, vec![PresenceAction::Enter, PresenceAction::Leave]);
    }
}
