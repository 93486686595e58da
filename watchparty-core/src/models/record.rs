//! Persisted session record kept by the external reactive document store.
//!
//! The in-memory [`SessionState`] must be derivable from this record and
//! reconcilable with it; when both exist the record wins.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionState;
use super::video::Video;
use crate::service::queue::QueueManager;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub current_video: Option<Video>,
    #[serde(default)]
    pub video_queue: Vec<Video>,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub current_time: f64,
    pub last_sync_at: DateTime<Utc>,
}

impl From<&SessionState> for SessionRecord {
    fn from(state: &SessionState) -> Self {
        Self {
            current_video: state.current_video.clone(),
            video_queue: state.queue.clone(),
            is_playing: state.is_playing,
            current_time: state.current_time,
            last_sync_at: Utc
                .timestamp_millis_opt(state.last_updated)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

impl SessionRecord {
    /// Rebuild the in-memory state from this record.
    ///
    /// A `current_video` missing from (or not heading) the queue is moved to
    /// the head so that "now playing" stays the queue head.
    #[must_use]
    pub fn into_state(self) -> SessionState {
        let last_updated = self.last_sync_at.timestamp_millis();
        let mut ordered = Vec::with_capacity(self.video_queue.len() + 1);
        if let Some(current) = self.current_video {
            ordered.push(current);
        }
        ordered.extend(self.video_queue);

        let mut state = SessionState {
            is_playing: self.is_playing,
            current_time: 0.0,
            current_video: None,
            queue: Vec::new(),
            last_updated,
        };
        QueueManager::reorder(&mut state, ordered, last_updated);
        state.current_time = self.current_time;
        state.last_updated = last_updated;
        state
    }
}
