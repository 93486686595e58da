//! In-memory session state store
//!
//! Holds one authoritative [`SessionState`] per session id. Sessions are
//! created lazily on first reference and are fully independent: each one sits
//! behind its own mutex, and no operation ever locks two sessions.
//!
//! The `*_then` variants run a hook while the session is still locked, so
//! anything the hook emits is ordered exactly like the writes themselves.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    models::{PlaybackAction, QueueEvent, SessionId, SessionRecord, SessionState, SyncEvent, Video},
    service::queue::{QueueManager, QueueOp, QueueOutcome},
    Result,
};

struct SessionEntry {
    state: SessionState,
    last_access: Instant,
    /// Set once the entry has left the map; writers must re-resolve
    evicted: bool,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            state: SessionState::new(),
            last_access: Instant::now(),
            evicted: false,
        }
    }
}

/// Result of a queue mutation against the store
#[derive(Debug, Clone)]
pub struct QueueChange {
    pub state: SessionState,
    pub outcome: QueueOutcome,
    pub previous_video_id: Option<String>,
}

impl QueueChange {
    /// Whether "now playing" switched to a different video
    #[must_use]
    pub fn video_changed(&self) -> bool {
        self.previous_video_id.as_deref() != self.state.current_video_id()
    }
}

/// Store of per-session state, keyed by session id
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<SessionId, Arc<Mutex<SessionEntry>>>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, session_id: &SessionId) -> Arc<Mutex<SessionEntry>> {
        if let Some(entry) = self.sessions.get(session_id) {
            return Arc::clone(entry.value());
        }
        let entry = self.sessions.entry(session_id.clone()).or_insert_with(|| {
            debug!(session_id = %session_id, "Session state created");
            Arc::new(Mutex::new(SessionEntry::new()))
        });
        Arc::clone(entry.value())
    }

    fn with_state<R>(&self, session_id: &SessionId, f: impl FnOnce(&mut SessionState) -> R) -> R {
        self.with_entry(session_id, self.entry(session_id), f)
    }

    /// Run `f` against `entry`, or against its replacement if eviction won
    /// the race between resolving the entry and locking it.
    fn with_entry<R>(
        &self,
        session_id: &SessionId,
        mut entry: Arc<Mutex<SessionEntry>>,
        f: impl FnOnce(&mut SessionState) -> R,
    ) -> R {
        loop {
            let mut guard = entry.lock();
            if !guard.evicted {
                guard.last_access = Instant::now();
                return f(&mut guard.state);
            }
            drop(guard);
            debug!(session_id = %session_id, "Session entry evicted while waiting, retrying");
            entry = self.entry(session_id);
        }
    }

    /// Current state, creating the default one for unknown ids
    #[must_use]
    pub fn get(&self, session_id: &SessionId) -> SessionState {
        self.with_state(session_id, |state| state.clone())
    }

    /// Apply play/pause/seek and stamp `last_updated` with the current time
    pub fn apply_playback_event(
        &self,
        session_id: &SessionId,
        action: PlaybackAction,
        current_time: f64,
    ) -> SessionState {
        self.apply_playback_event_then(session_id, action, current_time, |_| {})
    }

    pub fn apply_playback_event_then(
        &self,
        session_id: &SessionId,
        action: PlaybackAction,
        current_time: f64,
        then: impl FnOnce(&SessionState),
    ) -> SessionState {
        let state = self.with_state(session_id, |state| {
            // Read under the lock so stamps never run backwards
            let now_ms = Utc::now().timestamp_millis().max(state.last_updated);
            state.apply_playback(action, current_time, now_ms);
            then(state);
            state.clone()
        });
        debug!(
            session_id = %session_id,
            action = %action,
            current_time,
            "Playback event applied"
        );
        state
    }

    pub fn apply_sync_event_then(
        &self,
        session_id: &SessionId,
        event: &SyncEvent,
        then: impl FnOnce(&SessionState),
    ) -> SessionState {
        self.apply_playback_event_then(session_id, event.action, event.current_time, then)
    }

    /// Apply a queue event through the queue manager.
    ///
    /// Malformed events fail without mutating or creating the session.
    pub fn apply_queue_event(&self, session_id: &SessionId, event: &QueueEvent) -> Result<QueueChange> {
        self.apply_queue_event_then(session_id, event, |_| {})
    }

    pub fn apply_queue_event_then(
        &self,
        session_id: &SessionId,
        event: &QueueEvent,
        then: impl FnOnce(&QueueChange),
    ) -> Result<QueueChange> {
        let op = QueueOp::from_event(event)?;
        let now_ms = Utc::now().timestamp_millis();
        Ok(self.with_state(session_id, |state| {
            let previous_video_id = state.current_video_id().map(str::to_string);
            let outcome = QueueManager::apply_op(state, op, now_ms);
            let change = QueueChange {
                state: state.clone(),
                outcome,
                previous_video_id,
            };
            then(&change);
            change
        }))
    }

    /// Make `video` the head of the queue
    pub fn load_video(&self, session_id: &SessionId, video: Video) -> QueueChange {
        self.load_video_then(session_id, video, |_| {})
    }

    pub fn load_video_then(
        &self,
        session_id: &SessionId,
        video: Video,
        then: impl FnOnce(&QueueChange),
    ) -> QueueChange {
        let now_ms = Utc::now().timestamp_millis();
        self.with_state(session_id, |state| {
            let previous_video_id = state.current_video_id().map(str::to_string);
            let outcome = QueueManager::load(state, video, now_ms);
            let change = QueueChange {
                state: state.clone(),
                outcome,
                previous_video_id,
            };
            then(&change);
            change
        })
    }

    pub fn play_next(&self, session_id: &SessionId) -> QueueChange {
        let now_ms = Utc::now().timestamp_millis();
        self.with_state(session_id, |state| {
            let previous_video_id = state.current_video_id().map(str::to_string);
            let outcome = QueueManager::play_next(state, now_ms);
            QueueChange {
                state: state.clone(),
                outcome,
                previous_video_id,
            }
        })
    }

    /// State with `current_time` advanced to now if the session is playing.
    ///
    /// This is what joiners and explicit sync requests receive.
    #[must_use]
    pub fn snapshot_with_extrapolation(&self, session_id: &SessionId) -> SessionState {
        self.snapshot_at(session_id, Utc::now().timestamp_millis())
    }

    #[must_use]
    pub fn snapshot_at(&self, session_id: &SessionId, now_ms: i64) -> SessionState {
        self.with_state(session_id, |state| state.extrapolated(now_ms))
    }

    /// Replace the in-memory state with the persisted record
    pub fn reconcile(&self, session_id: &SessionId, record: SessionRecord) -> SessionState {
        self.reconcile_then(session_id, record, |_| {})
    }

    pub fn reconcile_then(
        &self,
        session_id: &SessionId,
        record: SessionRecord,
        then: impl FnOnce(&SessionState),
    ) -> SessionState {
        let restored = record.into_state();
        let state = self.with_state(session_id, |state| {
            *state = restored;
            then(state);
            state.clone()
        });
        info!(
            session_id = %session_id,
            queue_len = state.queue.len(),
            "Session state reconciled from persisted record"
        );
        state
    }

    /// Drop sessions idle for at least `max_idle` unless `keep` says otherwise.
    ///
    /// Sessions locked by a writer are in use and always kept. Returns the
    /// number of evicted sessions.
    pub fn evict_idle(&self, max_idle: Duration, keep: impl Fn(&SessionId) -> bool) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|session_id, entry| {
            let Some(mut guard) = entry.try_lock() else {
                return true;
            };
            let idle = guard.last_access.elapsed();
            if idle < max_idle || keep(session_id) {
                return true;
            }
            guard.evicted = true;
            debug!(
                session_id = %session_id,
                idle_secs = idle.as_secs(),
                "Evicting idle session"
            );
            false
        });
        before.saturating_sub(self.sessions.len())
    }

    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
