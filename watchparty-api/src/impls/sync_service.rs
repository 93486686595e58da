//! Server-side sync service.
//!
//! Single internal state-transition API shared by every transport: events are
//! applied to the [`SessionStore`] first and then fanned out through the
//! [`SessionHub`]. Neither wire protocol keeps state of its own.
//!
//! Fan-out happens while the session is still locked, so subscribers see
//! events in the order the store applied them and `video-sync` timestamps
//! only move forward.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};
use watchparty_cluster::sync::{PresenceAction, PresenceUpdate};
use watchparty_cluster::SessionHub;
use watchparty_core::models::{
    ChannelMessage, ClientId, PlaybackAction, PresenceEntry, QueueAction, QueueEvent, SessionId,
    SessionRecord, SessionState, SyncEvent, Video,
};
use watchparty_core::service::{
    QueueChange, QueueOutcome, SessionActivity, SessionObserver, SessionStore, TracingObserver,
};
use watchparty_core::Result;

/// What a channel message did to the session
#[derive(Debug, Clone)]
pub enum Applied {
    Playback(SessionState),
    Queue(QueueChange),
}

impl Applied {
    #[must_use]
    pub fn state(&self) -> &SessionState {
        match self {
            Self::Playback(state) => state,
            Self::Queue(change) => &change.state,
        }
    }

    /// Whether the message was a duplicate add
    #[must_use]
    pub fn already_queued(&self) -> bool {
        matches!(self, Self::Queue(change) if change.outcome == QueueOutcome::AlreadyQueued)
    }
}

#[derive(Clone)]
pub struct SyncService {
    store: SessionStore,
    hub: SessionHub,
    observer: Arc<dyn SessionObserver>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("sessions", &self.store.len())
            .field("hub_sessions", &self.hub.session_count())
            .finish()
    }
}

impl Default for SyncService {
    fn default() -> Self {
        Self::new(SessionStore::new(), SessionHub::new(), Arc::new(TracingObserver))
    }
}

impl SyncService {
    pub fn new(store: SessionStore, hub: SessionHub, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            store,
            hub,
            observer,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub const fn hub(&self) -> &SessionHub {
        &self.hub
    }

    /// Extrapolated state for catch-up
    #[must_use]
    pub fn snapshot(&self, session_id: &SessionId) -> SessionState {
        self.store.snapshot_with_extrapolation(session_id)
    }

    /// Apply any channel message and broadcast it
    pub fn handle(&self, session_id: &SessionId, message: ChannelMessage) -> Result<Applied> {
        match message {
            ChannelMessage::VideoSync(event) => {
                self.apply_sync(session_id, event).map(Applied::Playback)
            }
            ChannelMessage::VideoListUpdate(event) => {
                self.apply_queue(session_id, event).map(Applied::Queue)
            }
        }
    }

    /// Apply play/pause/seek, stamp the server time and broadcast.
    ///
    /// Negative or non-finite playheads are rejected before the store sees
    /// them.
    pub fn apply_sync(&self, session_id: &SessionId, event: SyncEvent) -> Result<SessionState> {
        event.validate()?;
        let state = self.store.apply_sync_event_then(session_id, &event, |state| {
            let stamped = SyncEvent {
                server_timestamp: state.last_updated,
                ..event.clone()
            };
            self.broadcast(session_id, ChannelMessage::VideoSync(stamped));
        });
        Ok(state)
    }

    pub fn apply_playback(
        &self,
        session_id: &SessionId,
        action: PlaybackAction,
        current_time: f64,
        sender_id: ClientId,
    ) -> Result<SessionState> {
        self.apply_sync(session_id, SyncEvent::new(action, current_time, sender_id))
    }

    /// Apply a queue event.
    ///
    /// Duplicate adds and removals of absent ids are not broadcast.
    pub fn apply_queue(&self, session_id: &SessionId, event: QueueEvent) -> Result<QueueChange> {
        let change = self.store.apply_queue_event_then(session_id, &event, |change| {
            let broadcast = match change.outcome {
                QueueOutcome::Applied => true,
                QueueOutcome::AlreadyQueued => false,
                QueueOutcome::Unchanged => event.action == QueueAction::SetVideos,
            };
            if broadcast {
                self.broadcast(session_id, ChannelMessage::VideoListUpdate(event.clone()));
            }
        })?;
        self.notify_video_change(session_id, &change);
        Ok(change)
    }

    /// Make `video` now playing, keeping the rest of the queue.
    ///
    /// Subscribers receive the resulting order as a `set-videos`.
    pub fn load_video(
        &self,
        session_id: &SessionId,
        video: Video,
        sender_id: ClientId,
    ) -> QueueChange {
        let change = self.store.load_video_then(session_id, video, |change| {
            self.broadcast(
                session_id,
                ChannelMessage::VideoListUpdate(QueueEvent::set(change.state.queue.clone(), sender_id)),
            );
        });
        self.notify_video_change(session_id, &change);
        change
    }

    /// Adopt a persisted record and bring every subscriber in line with it.
    ///
    /// The record may be older than what subscribers last saw, so the
    /// playback event carries the playhead extrapolated to now and a fresh
    /// stamp.
    pub fn reconcile(&self, session_id: &SessionId, record: SessionRecord) -> SessionState {
        self.store.reconcile_then(session_id, record, |state| {
            let action = if state.is_playing {
                PlaybackAction::Play
            } else {
                PlaybackAction::Pause
            };
            self.broadcast(
                session_id,
                ChannelMessage::VideoListUpdate(QueueEvent::set(
                    state.queue.clone(),
                    ClientId::server(),
                )),
            );
            let now = Utc::now().timestamp_millis().max(state.last_updated);
            let event = SyncEvent {
                server_timestamp: now,
                ..SyncEvent::new(action, state.extrapolated_time(now), ClientId::server())
            };
            self.broadcast(session_id, ChannelMessage::VideoSync(event));
        })
    }

    fn broadcast(&self, session_id: &SessionId, message: ChannelMessage) {
        let sent = self.hub.publish(session_id, message);
        debug!(session_id = %session_id, sent_count = sent, "Broadcast applied event");
    }

    fn notify_video_change(&self, session_id: &SessionId, change: &QueueChange) {
        if change.video_changed() {
            self.observer.on_activity(&SessionActivity::VideoChanged {
                session_id: session_id.clone(),
                video: change.state.current_video.clone(),
            });
        }
    }

    /// Enter presence for a connection
    pub fn join(
        &self,
        session_id: &SessionId,
        connection_id: &str,
        entry: PresenceEntry,
    ) -> PresenceUpdate {
        let update = self.hub.enter(session_id, connection_id, entry);
        if update.action == PresenceAction::Enter {
            self.observer.on_activity(&SessionActivity::Joined {
                session_id: session_id.clone(),
                identity: update.identity.clone(),
            });
        }
        update
    }

    /// Explicit presence leave
    pub fn leave(&self, session_id: &SessionId, connection_id: &str) -> Option<PresenceUpdate> {
        let update = self.hub.leave(session_id, connection_id)?;
        self.report_left(&update);
        Some(update)
    }

    /// Transport-detected disconnect; leaves presence implicitly
    pub fn disconnect(&self, connection_id: &str) -> Option<PresenceUpdate> {
        let update = self.hub.disconnect(connection_id)?;
        self.report_left(&update);
        Some(update)
    }

    fn report_left(&self, update: &PresenceUpdate) {
        self.observer.on_activity(&SessionActivity::Left {
            session_id: update.session_id.clone(),
            identity: update.identity.clone(),
        });
    }

    #[must_use]
    pub fn members(&self, session_id: &SessionId) -> Vec<PresenceEntry> {
        self.hub.members(session_id)
    }

    /// Drop sessions that have been idle for `max_idle` and have nobody attached
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let evicted = self
            .store
            .evict_idle(max_idle, |session_id| self.hub.is_active(session_id));
        if evicted > 0 {
            info!(
                evicted,
                remaining = self.store.len(),
                "Idle sessions evicted"
            );
        }
        evicted
    }
}
