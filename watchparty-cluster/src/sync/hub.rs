use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use watchparty_core::models::{ChannelMessage, PresenceEntry, SessionId};

use super::events::{HubEvent, PresenceAction, PresenceUpdate};

/// Handle for one client connection to a session
pub type ConnectionId = String;

/// Message sender for a subscriber
pub type EventSender = mpsc::UnboundedSender<HubEvent>;

#[derive(Debug, Clone)]
struct Subscriber {
    subscription_id: u64,
    connection_id: ConnectionId,
    sender: EventSender,
}

#[derive(Debug, Clone)]
struct PresenceMember {
    entry: PresenceEntry,
    connections: HashSet<ConnectionId>,
}

/// In-memory per-session topic hub with a presence roster.
///
/// Delivery is in order per publisher; there is no ordering across publishers.
#[derive(Clone, Default)]
pub struct SessionHub {
    /// Map of session_id -> subscribers
    sessions: Arc<DashMap<SessionId, Vec<Subscriber>>>,

    /// Map of connection_id -> session_id for cleanup
    connections: Arc<DashMap<ConnectionId, SessionId>>,

    /// Map of session_id -> presence roster, in entry order
    presence: Arc<DashMap<SessionId, Vec<PresenceMember>>>,

    next_subscription: Arc<AtomicU64>,
}

impl SessionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to a session without subscribing it yet
    pub fn connect(&self, session_id: &SessionId, connection_id: &str) {
        self.connections
            .insert(connection_id.to_string(), session_id.clone());
    }

    /// Subscribe a connection to session events.
    ///
    /// Returns the subscription id and a receiver for events.
    pub fn subscribe(
        &self,
        session_id: &SessionId,
        connection_id: &str,
    ) -> (u64, mpsc::UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription_id = self.next_subscription.fetch_add(1, Ordering::Relaxed);

        self.sessions
            .entry(session_id.clone())
            .or_default()
            .push(Subscriber {
                subscription_id,
                connection_id: connection_id.to_string(),
                sender: tx,
            });
        self.connect(session_id, connection_id);

        info!(
            session_id = %session_id,
            connection_id = %connection_id,
            subscription_id,
            "Client subscribed to session"
        );

        (subscription_id, rx)
    }

    /// Drop a single subscription
    pub fn unsubscribe(&self, session_id: &SessionId, subscription_id: u64) {
        self.remove_subscribers(session_id, |sub| sub.subscription_id == subscription_id);
    }

    /// Tear down a connection: its subscriptions and its presence.
    ///
    /// This is the implicit leave for transport-detected disconnects.
    pub fn disconnect(&self, connection_id: &str) -> Option<PresenceUpdate> {
        let Some((_, session_id)) = self.connections.remove(connection_id) else {
            debug!(connection_id = %connection_id, "Disconnect for unknown connection");
            return None;
        };

        let left = self.leave(&session_id, connection_id);
        self.remove_subscribers(&session_id, |sub| sub.connection_id == connection_id);

        info!(
            session_id = %session_id,
            connection_id = %connection_id,
            "Client disconnected from session"
        );
        left
    }

    fn remove_subscribers(&self, session_id: &SessionId, matches: impl Fn(&Subscriber) -> bool) {
        let now_empty = match self.sessions.get_mut(session_id) {
            Some(mut subscribers) => {
                subscribers.retain(|sub| !matches(sub));
                subscribers.is_empty()
            }
            None => return,
        };
        if now_empty {
            self.sessions.remove_if(session_id, |_, subs| subs.is_empty());
            debug!(session_id = %session_id, "Session has no more subscribers, removed");
        }
    }

    /// Broadcast a channel message to every subscriber of the session.
    ///
    /// The sender's own subscriptions receive it too; clients discard echoes.
    pub fn publish(&self, session_id: &SessionId, message: ChannelMessage) -> usize {
        let event_type = message.event_type();
        let sent = self.broadcast(session_id, &HubEvent::Message(message));
        debug!(
            session_id = %session_id,
            sent_count = sent,
            event_type = %event_type,
            "Event broadcast complete"
        );
        sent
    }

    fn broadcast(&self, session_id: &SessionId, event: &HubEvent) -> usize {
        let mut sent_count = 0;
        let mut failed = Vec::new();

        if let Some(subscribers) = self.sessions.get(session_id) {
            for subscriber in subscribers.iter() {
                match subscriber.sender.send(event.clone()) {
                    Ok(()) => sent_count += 1,
                    Err(err) => {
                        warn!(
                            session_id = %session_id,
                            connection_id = %subscriber.connection_id,
                            error = %err,
                            "Failed to send event to subscriber, marking for cleanup"
                        );
                        failed.push(subscriber.subscription_id);
                    }
                }
            }
        }

        for subscription_id in failed {
            self.unsubscribe(session_id, subscription_id);
        }

        sent_count
    }

    /// Enter presence for a connection.
    ///
    /// The roster is keyed by identity, so entering twice never adds a
    /// second member.
    pub fn enter(
        &self,
        session_id: &SessionId,
        connection_id: &str,
        entry: PresenceEntry,
    ) -> PresenceUpdate {
        self.connect(session_id, connection_id);
        let identity = entry.identity.clone();

        let action = {
            let mut roster = self.presence.entry(session_id.clone()).or_default();
            if let Some(member) = roster.iter_mut().find(|m| m.entry.identity == identity) {
                member.connections.insert(connection_id.to_string());
                member.entry = entry;
                PresenceAction::Update
            } else {
                roster.push(PresenceMember {
                    entry,
                    connections: HashSet::from([connection_id.to_string()]),
                });
                PresenceAction::Enter
            }
        };

        let update = PresenceUpdate {
            session_id: session_id.clone(),
            action,
            identity,
        };
        self.broadcast(session_id, &HubEvent::Presence(update.clone()));
        update
    }

    /// Leave presence for a connection.
    ///
    /// The identity leaves the roster once its last connection is gone; a
    /// repeated leave is a no-op and announces nothing.
    pub fn leave(&self, session_id: &SessionId, connection_id: &str) -> Option<PresenceUpdate> {
        let (identity, gone, roster_empty) = {
            let mut roster = self.presence.get_mut(session_id)?;
            let index = roster
                .iter()
                .position(|m| m.connections.contains(connection_id))?;
            let member = &mut roster[index];
            member.connections.remove(connection_id);
            let identity = member.entry.identity.clone();
            let gone = member.connections.is_empty();
            if gone {
                roster.remove(index);
            }
            (identity, gone, roster.is_empty())
        };

        if roster_empty {
            self.presence.remove_if(session_id, |_, roster| roster.is_empty());
        }
        if !gone {
            return None;
        }

        let update = PresenceUpdate {
            session_id: session_id.clone(),
            action: PresenceAction::Leave,
            identity,
        };
        self.broadcast(session_id, &HubEvent::Presence(update.clone()));
        Some(update)
    }

    /// Authoritative member list of a session
    #[must_use]
    pub fn members(&self, session_id: &SessionId) -> Vec<PresenceEntry> {
        self.presence
            .get(session_id)
            .map(|roster| roster.iter().map(|m| m.entry.clone()).collect())
            .unwrap_or_default()
    }

    /// Get the number of subscribers in a session
    #[must_use]
    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.sessions.get(session_id).map_or(0, |subs| subs.len())
    }

    /// Whether anyone is still attached to the session
    #[must_use]
    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.subscriber_count(session_id) > 0 || self.presence.contains_key(session_id)
    }

    /// Get the number of sessions with subscribers
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Get total number of attached connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
