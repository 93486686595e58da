//! Per-client sync protocol handler.
//!
//! One handler runs per connected client on a single event loop, so it holds
//! its local view by value and needs no locking. Local actions are applied
//! optimistically, tagged with the handler's own sender id and published;
//! incoming events carrying that id are echoes and are dropped.
//!
//! Playback conflicts resolve last-write-wins on the event timestamp: a
//! `video-sync` stamped earlier than one already applied is stale and
//! dropped. Unstamped (zero) events are always applied.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use watchparty_cluster::{HubEvent, SessionChannel, Subscription};
use watchparty_core::config::SyncConfig;
use watchparty_core::models::{
    ChannelMessage, ClientId, PlaybackAction, QueueAction, QueueEvent, SessionId, SessionRecord,
    SessionState, SyncEvent, Video,
};
use watchparty_core::service::{QueueManager, QueueOutcome};

use crate::catchup::{SessionRecordSource, SnapshotFetcher};
use crate::error::{Error, Result};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Connection lifecycle of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { synced: bool },
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Transient feedback for the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// A transport or catch-up failure; the next action retries
    SyncIssue(String),
    /// A duplicate add was ignored
    AlreadyQueued(String),
    /// Playback started muted; a one-tap unmute is available
    UnmuteAvailable,
}

/// What happened to a local action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Applied locally and published
    Published,
    /// Seek dropped by the debounce window
    Suppressed,
    /// Duplicate add, nothing changed
    AlreadyQueued,
    /// No-op, nothing published
    Unchanged,
    /// Applied locally but the publish failed
    LocalOnly,
}

/// What happened to an incoming event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IncomingOutcome {
    /// Our own event came back and was dropped
    Echo,
    Applied,
    /// Drift on `play` exceeded the tolerance; the player must seek here
    ForcedSeek(f64),
    /// Older than the playback state already applied
    Stale,
    /// Not for this handler (presence) or rejected as malformed
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatchUpSource {
    Persistent,
    Transient,
}

/// Sync protocol state machine for one client in one session
pub struct SyncHandler<C: SessionChannel + ?Sized> {
    channel: Arc<C>,
    records: Arc<dyn SessionRecordSource>,
    snapshots: Arc<dyn SnapshotFetcher>,
    config: SyncConfig,
    client_id: ClientId,
    connection: ConnectionState,
    state: SessionState,
    muted: bool,
    record_consumed: bool,
    last_seek: Option<Instant>,
    /// Newest playback timestamp applied, in server milliseconds
    applied_through: i64,
    notices: VecDeque<SyncNotice>,
    subscription: Option<Subscription>,
}

impl<C: SessionChannel + ?Sized> SyncHandler<C> {
    pub fn new(
        channel: Arc<C>,
        records: Arc<dyn SessionRecordSource>,
        snapshots: Arc<dyn SnapshotFetcher>,
        config: SyncConfig,
    ) -> Self {
        Self {
            channel,
            records,
            snapshots,
            config,
            client_id: ClientId::new(),
            connection: ConnectionState::Disconnected,
            state: SessionState::new(),
            muted: false,
            record_consumed: false,
            last_seek: None,
            applied_through: 0,
            notices: VecDeque::new(),
            subscription: None,
        }
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        self.channel.session_id()
    }

    pub const fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub const fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub const fn is_synced(&self) -> bool {
        matches!(self.connection, ConnectionState::Connected { synced: true })
    }

    /// Local view of the session
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    pub const fn is_muted(&self) -> bool {
        self.muted
    }

    /// Local playhead, extrapolated to now
    pub fn current_time(&self) -> f64 {
        self.state.extrapolated_time(now_ms())
    }

    pub fn take_notice(&mut self) -> Option<SyncNotice> {
        self.notices.pop_front()
    }

    fn notify(&mut self, notice: SyncNotice) {
        self.notices.push_back(notice);
    }

    fn report_issue(&mut self, context: &str, err: &Error) {
        warn!(
            session_id = %self.session_id(),
            sender_id = %self.client_id,
            error = %err,
            "{context}"
        );
        self.notify(SyncNotice::SyncIssue(format!("{context}: {err}")));
    }

    /// Subscribe to the session topic, then catch up.
    ///
    /// A catch-up failure leaves the handler connected but unsynced.
    pub async fn connect(&mut self) -> Result<()> {
        self.connection = ConnectionState::Connecting;
        match self.channel.subscribe().await {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(err) => {
                let err = Error::from(err);
                self.report_issue("Failed to subscribe", &err);
                self.connection = ConnectionState::Disconnected;
                return Err(err);
            }
        }

        self.connection = ConnectionState::Connected { synced: false };
        info!(
            session_id = %self.session_id(),
            sender_id = %self.client_id,
            "Connected to session"
        );
        self.catch_up().await;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.subscription = None;
        self.connection = ConnectionState::Disconnected;
        info!(
            session_id = %self.session_id(),
            sender_id = %self.client_id,
            "Disconnected from session"
        );
    }

    /// Fetch the current session state.
    ///
    /// An unconsumed persistent record takes priority; the transient snapshot
    /// is only used when none exists. Returns whether the handler is synced.
    pub async fn catch_up(&mut self) -> bool {
        if !self.connection.is_connected() {
            return false;
        }

        if !self.record_consumed {
            let session_id = self.session_id().clone();
            match self.records.fetch_record(&session_id).await {
                Ok(Some(record)) => {
                    self.record_consumed = true;
                    self.apply_catch_up(record.into_state(), CatchUpSource::Persistent);
                    return true;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        session_id = %session_id,
                        error = %err,
                        "Persistent record lookup failed, falling back to snapshot"
                    );
                }
            }
        }

        let session_id = self.session_id().clone();
        match self.snapshots.fetch_snapshot(&session_id).await {
            Ok(snapshot) => {
                self.apply_catch_up(snapshot, CatchUpSource::Transient);
                true
            }
            Err(err) => {
                self.report_issue("Catch-up failed", &err);
                false
            }
        }
    }

    /// Apply a persistent record that arrived late.
    ///
    /// It overrides whatever transient data was applied, but only once.
    pub fn on_persistent_record(&mut self, record: SessionRecord) -> bool {
        if self.record_consumed {
            debug!(session_id = %self.session_id(), "Persistent record already consumed");
            return false;
        }
        self.record_consumed = true;
        self.apply_catch_up(record.into_state(), CatchUpSource::Persistent);
        true
    }

    fn apply_catch_up(&mut self, snapshot: SessionState, source: CatchUpSource) {
        self.applied_through = self.applied_through.max(snapshot.last_updated);
        let now = now_ms();
        // Re-anchor on the local clock so server clock skew does not leak in
        let current_time = snapshot.extrapolated_time(now);
        self.state = SessionState {
            current_time,
            last_updated: now,
            ..snapshot
        };
        if self.connection.is_connected() {
            self.connection = ConnectionState::Connected { synced: true };
        }

        // Autoplay policies block unmuted playback on join
        if self.state.is_playing && !self.muted {
            self.muted = true;
            self.notify(SyncNotice::UnmuteAvailable);
        }

        info!(
            session_id = %self.session_id(),
            source = ?source,
            is_playing = self.state.is_playing,
            current_time = self.state.current_time,
            "Caught up with session"
        );
    }

    pub fn unmute(&mut self) {
        self.muted = false;
    }

    pub async fn play(&mut self, current_time: f64) -> ActionOutcome {
        self.playback(PlaybackAction::Play, current_time).await
    }

    pub async fn pause(&mut self, current_time: f64) -> ActionOutcome {
        self.playback(PlaybackAction::Pause, current_time).await
    }

    /// Seek, unless another seek was published within the debounce window
    pub async fn seek(&mut self, current_time: f64) -> ActionOutcome {
        let now = Instant::now();
        if let Some(last) = self.last_seek {
            if now.duration_since(last) < self.config.seek_debounce() {
                debug!(
                    session_id = %self.session_id(),
                    current_time,
                    "Seek suppressed by debounce"
                );
                return ActionOutcome::Suppressed;
            }
        }
        self.last_seek = Some(now);
        self.playback(PlaybackAction::Seek, current_time).await
    }

    async fn playback(&mut self, action: PlaybackAction, current_time: f64) -> ActionOutcome {
        self.state.apply_playback(action, current_time, now_ms());
        let event = SyncEvent::new(action, current_time, self.client_id.clone());
        self.publish(ChannelMessage::VideoSync(event)).await
    }

    pub async fn add_video(&mut self, video: Video) -> ActionOutcome {
        let event = QueueEvent::add(video, self.client_id.clone());
        self.queue_action(event).await
    }

    pub async fn remove_video(&mut self, video_id: &str) -> ActionOutcome {
        let event = QueueEvent::remove(video_id, self.client_id.clone());
        self.queue_action(event).await
    }

    /// Replace the whole queue (explicit reorder)
    pub async fn set_videos(&mut self, videos: Vec<Video>) -> ActionOutcome {
        let event = QueueEvent::set(videos, self.client_id.clone());
        self.queue_action(event).await
    }

    /// Skip to the next queued video
    pub async fn play_next(&mut self) -> ActionOutcome {
        match self.state.now_playing().map(|v| v.video_id.clone()) {
            Some(head) => self.remove_video(&head).await,
            None => ActionOutcome::Unchanged,
        }
    }

    async fn queue_action(&mut self, event: QueueEvent) -> ActionOutcome {
        let outcome = match QueueManager::apply(&mut self.state, &event, now_ms()) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    session_id = %self.session_id(),
                    error = %err,
                    "Rejected local queue action"
                );
                return ActionOutcome::Unchanged;
            }
        };

        match outcome {
            QueueOutcome::AlreadyQueued => {
                let video_id = event.target_video_id().unwrap_or_default().to_string();
                self.notify(SyncNotice::AlreadyQueued(video_id));
                ActionOutcome::AlreadyQueued
            }
            // set-videos is still published so metadata changes propagate
            QueueOutcome::Unchanged if event.action != QueueAction::SetVideos => {
                ActionOutcome::Unchanged
            }
            _ => self.publish(ChannelMessage::VideoListUpdate(event)).await,
        }
    }

    async fn publish(&mut self, message: ChannelMessage) -> ActionOutcome {
        if !self.connection.is_connected() {
            self.report_issue("Not published", &Error::NotConnected);
            return ActionOutcome::LocalOnly;
        }

        let event_type = message.event_type();
        match self.channel.publish(message).await {
            Ok(()) => {
                debug!(
                    session_id = %self.session_id(),
                    sender_id = %self.client_id,
                    event_type = %event_type,
                    "Published local action"
                );
                ActionOutcome::Published
            }
            Err(err) => {
                self.report_issue("Publish failed", &Error::from(err));
                ActionOutcome::LocalOnly
            }
        }
    }

    /// Wait for the next event on the subscription and apply it.
    ///
    /// Returns `None` when not subscribed or the topic closed.
    pub async fn next_event(&mut self) -> Option<IncomingOutcome> {
        let event = self.subscription.as_mut()?.recv().await?;
        Some(self.handle_event(event))
    }

    /// Apply every event already delivered, without waiting
    pub fn drain_events(&mut self) -> Vec<IncomingOutcome> {
        let mut outcomes = Vec::new();
        while let Some(event) = self.subscription.as_mut().and_then(Subscription::try_recv) {
            outcomes.push(self.handle_event(event));
        }
        outcomes
    }

    /// Apply one incoming event to the local view
    pub fn handle_event(&mut self, event: HubEvent) -> IncomingOutcome {
        let HubEvent::Message(message) = event else {
            return IncomingOutcome::Ignored;
        };

        if let ChannelMessage::VideoSync(event) = &message {
            if event.server_timestamp != 0 {
                if event.server_timestamp < self.applied_through {
                    debug!(
                        session_id = %self.session_id(),
                        sender_id = %event.sender_id,
                        timestamp = event.server_timestamp,
                        applied_through = self.applied_through,
                        "Dropped stale playback event"
                    );
                    return IncomingOutcome::Stale;
                }
                self.applied_through = event.server_timestamp;
            }
        }

        if message.sender_id() == &self.client_id {
            return IncomingOutcome::Echo;
        }

        match message {
            ChannelMessage::VideoSync(event) => self.apply_remote_playback(&event),
            ChannelMessage::VideoListUpdate(event) => self.apply_remote_queue(&event),
        }
    }

    fn apply_remote_playback(&mut self, event: &SyncEvent) -> IncomingOutcome {
        let now = now_ms();
        let outcome = if event.action == PlaybackAction::Play {
            let local = self.state.extrapolated_time(now);
            let drift = (event.current_time - local).abs();
            if drift > self.config.drift_tolerance_secs {
                self.state.apply_playback(PlaybackAction::Play, event.current_time, now);
                IncomingOutcome::ForcedSeek(event.current_time)
            } else {
                // Small drift is tolerated; keep the local playhead
                self.state.apply_playback(PlaybackAction::Play, local, now);
                IncomingOutcome::Applied
            }
        } else {
            self.state.apply_playback(event.action, event.current_time, now);
            IncomingOutcome::Applied
        };

        if self.connection.is_connected() {
            self.connection = ConnectionState::Connected { synced: true };
        }
        debug!(
            session_id = %self.session_id(),
            sender_id = %event.sender_id,
            action = %event.action,
            outcome = ?outcome,
            "Applied remote playback event"
        );
        outcome
    }

    fn apply_remote_queue(&mut self, event: &QueueEvent) -> IncomingOutcome {
        match QueueManager::apply(&mut self.state, event, now_ms()) {
            Ok(_) => IncomingOutcome::Applied,
            Err(err) => {
                warn!(
                    session_id = %self.session_id(),
                    sender_id = %event.sender_id,
                    error = %err,
                    "Dropped malformed queue event"
                );
                IncomingOutcome::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catchup::{MockSessionRecordSource, MockSnapshotFetcher, NoRecordSource};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use watchparty_cluster::{HubChannel, SessionHub};
    use watchparty_core::models::PresenceEntry;

    fn video(id: &str) -> Video {
        Video::new(id, format!("https://videos.example/{id}"), format!("Video {id}"))
    }

    fn paused_at(time: f64) -> SessionState {
        SessionState {
            current_time: time,
            ..SessionState::new()
        }
    }

    fn fetcher_returning(state: SessionState) -> Arc<MockSnapshotFetcher> {
        let mut fetcher = MockSnapshotFetcher::new();
        fetcher
            .expect_fetch_snapshot()
            .returning(move |_| Ok(state.clone()));
        Arc::new(fetcher)
    }

    fn handler_on(
        hub: &SessionHub,
        snapshots: Arc<dyn SnapshotFetcher>,
    ) -> SyncHandler<HubChannel> {
        let channel = Arc::new(HubChannel::new(hub.clone(), SessionId::from("movie-night")));
        SyncHandler::new(
            channel,
            Arc::new(NoRecordSource),
            snapshots,
            SyncConfig::default(),
        )
    }

    async fn watcher(hub: &SessionHub) -> (HubChannel, Subscription) {
        let channel = HubChannel::new(hub.clone(), SessionId::from("movie-night"));
        let sub = channel.subscribe().await.unwrap();
        (channel, sub)
    }

    fn count_messages(sub: &mut Subscription) -> usize {
        let mut count = 0;
        while let Some(event) = sub.try_recv() {
            if matches!(event, HubEvent::Message(_)) {
                count += 1;
            }
        }
        count
    }

    /// Channel whose publishes fail while `failing` is set
    struct FlakyChannel {
        inner: HubChannel,
        failing: AtomicBool,
    }

    #[async_trait]
    impl SessionChannel for FlakyChannel {
        fn session_id(&self) -> &SessionId {
            self.inner.session_id()
        }

        async fn publish(&self, message: ChannelMessage) -> watchparty_cluster::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(watchparty_cluster::Error::Publish("network down".to_string()));
            }
            self.inner.publish(message).await
        }

        async fn subscribe(&self) -> watchparty_cluster::Result<Subscription> {
            self.inner.subscribe().await
        }

        async fn enter_presence(&self, entry: PresenceEntry) -> watchparty_cluster::Result<()> {
            self.inner.enter_presence(entry).await
        }

        async fn leave_presence(&self) -> watchparty_cluster::Result<()> {
            self.inner.leave_presence().await
        }

        async fn presence_members(&self) -> watchparty_cluster::Result<Vec<PresenceEntry>> {
            self.inner.presence_members().await
        }
    }

    #[tokio::test]
    async fn test_connect_moves_through_states() {
        let hub = SessionHub::new();
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(0.0)));
        assert_eq!(handler.connection_state(), ConnectionState::Disconnected);

        handler.connect().await.unwrap();
        assert_eq!(
            handler.connection_state(),
            ConnectionState::Connected { synced: true }
        );

        handler.disconnect();
        assert_eq!(handler.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_own_echo_is_never_reapplied() {
        let hub = SessionHub::new();
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(0.0)));
        handler.connect().await.unwrap();

        assert_eq!(handler.pause(10.0).await, ActionOutcome::Published);
        assert_eq!(handler.drain_events(), vec![IncomingOutcome::Echo]);
        assert_eq!(handler.state().current_time, 10.0);

        // A stale event tagged with our id must not move the playhead
        let stale = SyncEvent::new(PlaybackAction::Seek, 99.0, handler.client_id().clone());
        let outcome = handler.handle_event(HubEvent::Message(ChannelMessage::VideoSync(stale)));
        assert_eq!(outcome, IncomingOutcome::Echo);
        assert_eq!(handler.state().current_time, 10.0);
    }

    fn remote_sync(action: PlaybackAction, time: f64, timestamp: i64) -> HubEvent {
        let event = SyncEvent {
            server_timestamp: timestamp,
            ..SyncEvent::new(action, time, ClientId::from("bob"))
        };
        HubEvent::Message(ChannelMessage::VideoSync(event))
    }

    #[tokio::test]
    async fn test_older_playback_event_loses_to_newer() {
        let hub = SessionHub::new();
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(0.0)));
        handler.connect().await.unwrap();
        let base = now_ms();

        let newer = remote_sync(PlaybackAction::Pause, 50.0, base + 2_000);
        assert_eq!(handler.handle_event(newer), IncomingOutcome::Applied);
        let older = remote_sync(PlaybackAction::Seek, 10.0, base + 1_000);
        assert_eq!(handler.handle_event(older), IncomingOutcome::Stale);
        assert_eq!(handler.state().current_time, 50.0);
        assert!(!handler.state().is_playing);

        // Equal stamps are not stale
        let same = remote_sync(PlaybackAction::Seek, 55.0, base + 2_000);
        assert_eq!(handler.handle_event(same), IncomingOutcome::Applied);
        assert_eq!(handler.state().current_time, 55.0);
    }

    #[tokio::test]
    async fn test_events_older_than_catch_up_are_stale() {
        let hub = SessionHub::new();
        let snapshot = SessionState {
            last_updated: now_ms(),
            ..paused_at(40.0)
        };
        let mut handler = handler_on(&hub, fetcher_returning(snapshot.clone()));
        handler.connect().await.unwrap();

        let queued = remote_sync(PlaybackAction::Play, 5.0, snapshot.last_updated - 500);
        assert_eq!(handler.handle_event(queued), IncomingOutcome::Stale);
        assert_eq!(handler.current_time(), 40.0);

        let unstamped = remote_sync(PlaybackAction::Seek, 12.0, 0);
        assert_eq!(handler.handle_event(unstamped), IncomingOutcome::Applied);
        assert_eq!(handler.state().current_time, 12.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeks_within_debounce_publish_once() {
        let hub = SessionHub::new();
        let (_watcher, mut sub) = watcher(&hub).await;
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(0.0)));
        handler.connect().await.unwrap();

        assert_eq!(handler.seek(10.0).await, ActionOutcome::Published);
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(handler.seek(20.0).await, ActionOutcome::Suppressed);
        assert_eq!(count_messages(&mut sub), 1);
        assert_eq!(handler.state().current_time, 10.0);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(handler.seek(30.0).await, ActionOutcome::Published);
        assert_eq!(count_messages(&mut sub), 1);
    }

    #[tokio::test]
    async fn test_join_while_playing_starts_muted() {
        let hub = SessionHub::new();
        let playing = SessionState {
            is_playing: true,
            current_time: 30.0,
            ..SessionState::new()
        };
        let mut handler = handler_on(&hub, fetcher_returning(playing));
        handler.connect().await.unwrap();

        assert!(handler.is_muted());
        assert_eq!(handler.take_notice(), Some(SyncNotice::UnmuteAvailable));
        assert!(handler.current_time() >= 30.0);

        handler.unmute();
        assert!(!handler.is_muted());
    }

    #[tokio::test]
    async fn test_join_while_paused_is_not_muted() {
        let hub = SessionHub::new();
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(12.0)));
        handler.connect().await.unwrap();

        assert!(!handler.is_muted());
        assert_eq!(handler.take_notice(), None);
        assert_eq!(handler.current_time(), 12.0);
    }

    #[tokio::test]
    async fn test_remote_play_forces_seek_beyond_tolerance() {
        let hub = SessionHub::new();
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(5.0)));
        handler.connect().await.unwrap();

        let near = SyncEvent::new(PlaybackAction::Play, 6.5, ClientId::from("bob"));
        let outcome = handler.handle_event(HubEvent::Message(ChannelMessage::VideoSync(near)));
        assert_eq!(outcome, IncomingOutcome::Applied);
        assert!(handler.state().is_playing);
        assert_eq!(handler.state().current_time, 5.0);

        handler.state.apply_playback(PlaybackAction::Pause, 5.0, now_ms());
        let far = SyncEvent::new(PlaybackAction::Play, 40.0, ClientId::from("bob"));
        let outcome = handler.handle_event(HubEvent::Message(ChannelMessage::VideoSync(far)));
        assert_eq!(outcome, IncomingOutcome::ForcedSeek(40.0));
        assert_eq!(handler.state().current_time, 40.0);
    }

    #[tokio::test]
    async fn test_remote_queue_events_are_applied() {
        let hub = SessionHub::new();
        let (bob, _sub) = watcher(&hub).await;
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(0.0)));
        handler.connect().await.unwrap();

        for id in ["v1", "v2"] {
            bob.publish(ChannelMessage::VideoListUpdate(QueueEvent::add(
                video(id),
                ClientId::from("bob"),
            )))
            .await
            .unwrap();
        }
        let outcome = handler.next_event().await;
        assert_eq!(outcome, Some(IncomingOutcome::Applied));
        handler.drain_events();

        let ids: Vec<_> = handler.state().queue.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2"]);
        assert_eq!(handler.state().current_video_id(), Some("v1"));
    }

    #[tokio::test]
    async fn test_duplicate_add_notice_without_publish() {
        let hub = SessionHub::new();
        let (_watcher, mut sub) = watcher(&hub).await;
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(0.0)));
        handler.connect().await.unwrap();

        assert_eq!(handler.add_video(video("v1")).await, ActionOutcome::Published);
        assert_eq!(handler.add_video(video("v1")).await, ActionOutcome::AlreadyQueued);
        assert_eq!(
            handler.take_notice(),
            Some(SyncNotice::AlreadyQueued("v1".to_string()))
        );
        assert_eq!(handler.state().queue.len(), 1);
        assert_eq!(count_messages(&mut sub), 1);
    }

    #[tokio::test]
    async fn test_queue_scenario_keeps_order() {
        let hub = SessionHub::new();
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(0.0)));
        handler.connect().await.unwrap();

        for id in ["v1", "v2", "v3"] {
            handler.add_video(video(id)).await;
        }
        handler.remove_video("v2").await;
        handler.add_video(video("v4")).await;
        assert_eq!(handler.remove_video("missing").await, ActionOutcome::Unchanged);

        let ids: Vec<_> = handler.state().queue.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v3", "v4"]);

        assert_eq!(handler.play_next().await, ActionOutcome::Published);
        assert_eq!(handler.state().current_video_id(), Some("v3"));
    }

    #[tokio::test]
    async fn test_persistent_record_takes_priority() {
        let hub = SessionHub::new();
        let record = SessionRecord {
            current_video: Some(video("persisted")),
            video_queue: vec![video("persisted")],
            is_playing: false,
            current_time: 77.0,
            last_sync_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        };

        let mut records = MockSessionRecordSource::new();
        records
            .expect_fetch_record()
            .times(1)
            .returning(move |_| Ok(Some(record.clone())));
        let mut snapshots = MockSnapshotFetcher::new();
        snapshots.expect_fetch_snapshot().times(0);

        let channel = Arc::new(HubChannel::new(hub, SessionId::from("s")));
        let mut handler = SyncHandler::new(
            channel,
            Arc::new(records),
            Arc::new(snapshots),
            SyncConfig::default(),
        );
        handler.connect().await.unwrap();

        assert!(handler.is_synced());
        assert_eq!(handler.state().current_video_id(), Some("persisted"));
        assert_eq!(handler.state().current_time, 77.0);
    }

    #[tokio::test]
    async fn test_late_persistent_record_overrides_transient_once() {
        let hub = SessionHub::new();
        let mut records = MockSessionRecordSource::new();
        records.expect_fetch_record().returning(|_| Ok(None));

        let transient = SessionState {
            queue: vec![video("transient")],
            current_video: Some(video("transient")),
            ..paused_at(3.0)
        };
        let channel = Arc::new(HubChannel::new(hub, SessionId::from("s")));
        let mut handler = SyncHandler::new(
            channel,
            Arc::new(records),
            fetcher_returning(transient),
            SyncConfig::default(),
        );
        handler.connect().await.unwrap();
        assert_eq!(handler.state().current_video_id(), Some("transient"));

        let record = SessionRecord {
            current_video: Some(video("persisted")),
            video_queue: vec![],
            is_playing: false,
            current_time: 50.0,
            last_sync_at: Utc::now(),
        };
        assert!(handler.on_persistent_record(record.clone()));
        assert_eq!(handler.state().current_video_id(), Some("persisted"));
        assert_eq!(handler.state().current_time, 50.0);

        // Re-delivery of the record is ignored
        handler.pause(60.0).await;
        assert!(!handler.on_persistent_record(record));
        assert_eq!(handler.state().current_time, 60.0);
    }

    #[tokio::test]
    async fn test_catch_up_failure_leaves_unsynced_until_playback_event() {
        let hub = SessionHub::new();
        let mut snapshots = MockSnapshotFetcher::new();
        snapshots
            .expect_fetch_snapshot()
            .returning(|_| Err(Error::CatchUp("503: unavailable".to_string())));
        let mut handler = handler_on(&hub, Arc::new(snapshots));

        handler.connect().await.unwrap();
        assert_eq!(
            handler.connection_state(),
            ConnectionState::Connected { synced: false }
        );
        assert!(matches!(handler.take_notice(), Some(SyncNotice::SyncIssue(_))));

        let event = SyncEvent::new(PlaybackAction::Pause, 8.0, ClientId::from("bob"));
        handler.handle_event(HubEvent::Message(ChannelMessage::VideoSync(event)));
        assert!(handler.is_synced());
        assert_eq!(handler.state().current_time, 8.0);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_local_state_and_notifies() {
        let hub = SessionHub::new();
        let channel = Arc::new(FlakyChannel {
            inner: HubChannel::new(hub.clone(), SessionId::from("movie-night")),
            failing: AtomicBool::new(false),
        });
        let mut handler = SyncHandler::new(
            Arc::clone(&channel),
            Arc::new(NoRecordSource),
            fetcher_returning(paused_at(0.0)),
            SyncConfig::default(),
        );
        handler.connect().await.unwrap();

        channel.failing.store(true, Ordering::SeqCst);
        assert_eq!(handler.play(15.0).await, ActionOutcome::LocalOnly);
        assert!(handler.state().is_playing);
        assert!(matches!(handler.take_notice(), Some(SyncNotice::SyncIssue(_))));

        // The next user action is the retry
        channel.failing.store(false, Ordering::SeqCst);
        assert_eq!(handler.pause(16.0).await, ActionOutcome::Published);
    }

    #[tokio::test]
    async fn test_actions_before_connect_stay_local() {
        let hub = SessionHub::new();
        let mut handler = handler_on(&hub, fetcher_returning(paused_at(0.0)));

        assert_eq!(handler.play(1.0).await, ActionOutcome::LocalOnly);
        assert!(matches!(handler.take_notice(), Some(SyncNotice::SyncIssue(_))));
    }
}
