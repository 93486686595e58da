//! Hooks for collaborators outside the sync engine (social graph, analytics).
//!
//! The engine only reports high-level activity; it never waits on observers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::{SessionId, Video};

/// High-level session activity reported to observers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionActivity {
    Joined {
        session_id: SessionId,
        identity: String,
    },
    Left {
        session_id: SessionId,
        identity: String,
    },
    VideoChanged {
        session_id: SessionId,
        video: Option<Video>,
    },
}

impl SessionActivity {
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        match self {
            Self::Joined { session_id, .. }
            | Self::Left { session_id, .. }
            | Self::VideoChanged { session_id, .. } => session_id,
        }
    }

    #[must_use]
    pub const fn activity_type(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "session_joined",
            Self::Left { .. } => "session_left",
            Self::VideoChanged { .. } => "video_changed",
        }
    }
}

/// Receiver of session activity.
///
/// Implementations must not block; anything slow belongs on a spawned task.
pub trait SessionObserver: Send + Sync {
    fn on_activity(&self, activity: &SessionActivity);
}

/// Default observer: records activity in the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_activity(&self, activity: &SessionActivity) {
        match activity {
            SessionActivity::VideoChanged { session_id, video } => tracing::info!(
                session_id = %session_id,
                video_id = video.as_ref().map_or("", |v| v.video_id.as_str()),
                "Video changed"
            ),
            SessionActivity::Joined { session_id, identity }
            | SessionActivity::Left { session_id, identity } => tracing::info!(
                session_id = %session_id,
                identity = %identity,
                activity = activity.activity_type(),
                "Session membership changed"
            ),
        }
    }
}

/// Observer that keeps every activity in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    activities: Arc<Mutex<Vec<SessionActivity>>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn activities(&self) -> Vec<SessionActivity> {
        self.activities.lock().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_activity(&self, activity: &SessionActivity) {
        self.activities.lock().push(activity.clone());
    }
}
