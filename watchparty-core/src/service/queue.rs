//! Queue state transitions.
//!
//! Every mutation of `SessionState::queue` goes through here so the
//! no-duplicate invariant holds on every path. After each operation
//! `current_video` is re-derived from the queue head; when the head changes
//! the playhead restarts at zero.

use std::collections::HashSet;

use crate::{
    models::{QueueAction, QueueEvent, SessionState, Video},
    Error, Result,
};

/// Result of a queue operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// The queue changed
    Applied,
    /// Duplicate add ignored; surfaced to the UI as "already queued"
    AlreadyQueued,
    /// Nothing to do (absent id, empty queue, identical order)
    Unchanged,
}

impl QueueOutcome {
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// A queue event whose payload has been checked against its type
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOp {
    Add(Video),
    Remove(String),
    Set(Vec<Video>),
}

impl QueueOp {
    pub fn from_event(event: &QueueEvent) -> Result<Self> {
        match event.action {
            QueueAction::AddVideo => {
                let video = event
                    .video
                    .clone()
                    .ok_or_else(|| Error::InvalidInput("add-video requires a video".to_string()))?;
                if !video.has_valid_id() {
                    return Err(Error::InvalidInput("video must have a videoId".to_string()));
                }
                Ok(Self::Add(video))
            }
            QueueAction::RemoveVideo => event
                .target_video_id()
                .map(|id| Self::Remove(id.to_string()))
                .ok_or_else(|| Error::InvalidInput("remove-video requires a videoId".to_string())),
            QueueAction::SetVideos => {
                let videos = event
                    .videos
                    .clone()
                    .ok_or_else(|| Error::InvalidInput("set-videos requires videos".to_string()))?;
                if videos.iter().any(|v| !v.has_valid_id()) {
                    return Err(Error::InvalidInput("every video must have a videoId".to_string()));
                }
                Ok(Self::Set(videos))
            }
        }
    }
}

/// Pure queue operations over a [`SessionState`]
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueManager;

impl QueueManager {
    /// Append `video` unless an entry with the same `video_id` is queued.
    pub fn add(state: &mut SessionState, video: Video, now_ms: i64) -> QueueOutcome {
        if state.contains(&video.video_id) {
            return QueueOutcome::AlreadyQueued;
        }
        state.queue.push(video);
        Self::sync_now_playing(state, now_ms);
        QueueOutcome::Applied
    }

    /// Remove the entry with `video_id`; absent ids are a no-op.
    pub fn remove(state: &mut SessionState, video_id: &str, now_ms: i64) -> QueueOutcome {
        let before = state.queue.len();
        state.queue.retain(|v| v.video_id != video_id);
        if state.queue.len() == before {
            return QueueOutcome::Unchanged;
        }
        Self::sync_now_playing(state, now_ms);
        QueueOutcome::Applied
    }

    /// Replace the whole queue. Later duplicates in `videos` are dropped.
    pub fn reorder(state: &mut SessionState, videos: Vec<Video>, now_ms: i64) -> QueueOutcome {
        let mut seen = HashSet::with_capacity(videos.len());
        let deduped: Vec<Video> = videos
            .into_iter()
            .filter(|v| seen.insert(v.video_id.clone()))
            .collect();

        let unchanged = deduped.len() == state.queue.len()
            && deduped
                .iter()
                .zip(&state.queue)
                .all(|(a, b)| a.video_id == b.video_id);
        // Metadata may still differ, so the replacement always happens
        state.queue = deduped;
        Self::sync_now_playing(state, now_ms);

        if unchanged {
            QueueOutcome::Unchanged
        } else {
            QueueOutcome::Applied
        }
    }

    /// Drop the head of the queue so the next entry becomes "now playing".
    pub fn play_next(state: &mut SessionState, now_ms: i64) -> QueueOutcome {
        match state.queue.first().map(|v| v.video_id.clone()) {
            Some(head) => Self::remove(state, &head, now_ms),
            None => QueueOutcome::Unchanged,
        }
    }

    /// Move (or insert) `video` to the head of the queue
    pub fn load(state: &mut SessionState, video: Video, now_ms: i64) -> QueueOutcome {
        let mut ordered = Vec::with_capacity(state.queue.len() + 1);
        ordered.push(video);
        ordered.extend(state.queue.iter().cloned());
        Self::reorder(state, ordered, now_ms)
    }

    /// Apply a wire-level queue event.
    ///
    /// Events missing the payload their type requires are rejected before
    /// the state is touched.
    pub fn apply(state: &mut SessionState, event: &QueueEvent, now_ms: i64) -> Result<QueueOutcome> {
        let op = QueueOp::from_event(event)?;
        Ok(Self::apply_op(state, op, now_ms))
    }

    pub fn apply_op(state: &mut SessionState, op: QueueOp, now_ms: i64) -> QueueOutcome {
        match op {
            QueueOp::Add(video) => Self::add(state, video, now_ms),
            QueueOp::Remove(video_id) => Self::remove(state, &video_id, now_ms),
            QueueOp::Set(videos) => Self::reorder(state, videos, now_ms),
        }
    }

    fn sync_now_playing(state: &mut SessionState, now_ms: i64) {
        let head = state.queue.first().cloned();
        let head_changed = head.as_ref().map(|v| v.video_id.as_str()) != state.current_video_id();
        state.current_video = head;
        if head_changed {
            state.current_time = 0.0;
            state.last_updated = now_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientId;

    fn video(id: &str) -> Video {
        Video::new(id, format!("https://videos.example/{id}"), format!("Video {id}"))
    }

    fn ids(state: &SessionState) -> Vec<&str> {
        state.queue.iter().map(|v| v.video_id.as_str()).collect()
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut state = SessionState::new();

        assert_eq!(QueueManager::add(&mut state, video("v"), 0), QueueOutcome::Applied);
        assert_eq!(state.current_video_id(), Some("v"));

        assert_eq!(QueueManager::add(&mut state, video("v"), 0), QueueOutcome::AlreadyQueued);
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn test_second_add_does_not_change_current_video() {
        let mut state = SessionState::new();
        QueueManager::add(&mut state, video("first"), 0);
        QueueManager::add(&mut state, video("second"), 0);
        assert_eq!(state.current_video_id(), Some("first"));
    }

    #[test]
    fn test_remove_absent_id_is_noop() {
        let mut state = SessionState::new();
        QueueManager::add(&mut state, video("a"), 0);
        QueueManager::add(&mut state, video("b"), 0);
        let before = state.clone();

        assert_eq!(QueueManager::remove(&mut state, "missing", 99), QueueOutcome::Unchanged);
        assert_eq!(state, before);
    }

    #[test]
    fn test_removing_head_advances() {
        let mut state = SessionState::new();
        QueueManager::add(&mut state, video("a"), 0);
        QueueManager::add(&mut state, video("b"), 0);

        assert_eq!(QueueManager::remove(&mut state, "a", 5), QueueOutcome::Applied);
        assert_eq!(ids(&state), vec!["b"]);
        assert_eq!(state.current_video_id(), Some("b"));
    }

    #[test]
    fn test_head_change_restarts_playhead() {
        let mut state = SessionState::new();
        QueueManager::add(&mut state, video("a"), 0);
        QueueManager::add(&mut state, video("b"), 0);
        state.is_playing = true;
        state.current_time = 120.0;

        QueueManager::play_next(&mut state, 7_000);
        assert_eq!(state.current_time, 0.0);
        assert_eq!(state.last_updated, 7_000);
        assert!(state.is_playing);
    }

    #[test]
    fn test_removing_tail_keeps_playhead() {
        let mut state = SessionState::new();
        QueueManager::add(&mut state, video("a"), 0);
        QueueManager::add(&mut state, video("b"), 0);
        state.current_time = 33.0;

        QueueManager::remove(&mut state, "b", 1);
        assert_eq!(state.current_time, 33.0);
    }

    #[test]
    fn test_play_next_until_empty_clears_current() {
        let mut state = SessionState::new();
        QueueManager::add(&mut state, video("only"), 0);

        assert_eq!(QueueManager::play_next(&mut state, 0), QueueOutcome::Applied);
        assert!(state.queue.is_empty());
        assert!(state.current_video.is_none());
        assert_eq!(QueueManager::play_next(&mut state, 0), QueueOutcome::Unchanged);
    }

    #[test]
    fn test_add_remove_add_order() {
        let mut state = SessionState::new();
        for id in ["v1", "v2", "v3"] {
            QueueManager::add(&mut state, video(id), 0);
        }
        QueueManager::remove(&mut state, "v2", 0);
        QueueManager::add(&mut state, video("v4"), 0);

        assert_eq!(ids(&state), vec!["v1", "v3", "v4"]);
    }

    #[test]
    fn test_reorder_drops_duplicates() {
        let mut state = SessionState::new();
        let outcome = QueueManager::reorder(
            &mut state,
            vec![video("a"), video("b"), video("a"), video("c")],
            0,
        );

        assert_eq!(outcome, QueueOutcome::Applied);
        assert_eq!(ids(&state), vec!["a", "b", "c"]);
        assert_eq!(state.current_video_id(), Some("a"));
    }

    #[test]
    fn test_reorder_with_same_order_is_unchanged() {
        let mut state = SessionState::new();
        QueueManager::reorder(&mut state, vec![video("a"), video("b")], 0);
        let outcome = QueueManager::reorder(&mut state, vec![video("a"), video("b")], 0);
        assert_eq!(outcome, QueueOutcome::Unchanged);
    }

    #[test]
    fn test_reorder_to_empty_clears_current() {
        let mut state = SessionState::new();
        QueueManager::add(&mut state, video("a"), 0);
        QueueManager::reorder(&mut state, Vec::new(), 0);
        assert!(state.current_video.is_none());
    }

    #[test]
    fn test_load_moves_existing_video_to_head() {
        let mut state = SessionState::new();
        for id in ["a", "b", "c"] {
            QueueManager::add(&mut state, video(id), 0);
        }
        QueueManager::load(&mut state, video("c"), 0);
        assert_eq!(ids(&state), vec!["c", "a", "b"]);
        assert_eq!(state.current_video_id(), Some("c"));

        QueueManager::load(&mut state, video("new"), 0);
        assert_eq!(ids(&state), vec!["new", "c", "a", "b"]);
    }

    #[test]
    fn test_apply_rejects_missing_payload() {
        let mut state = SessionState::new();
        let sender = ClientId::from("c");

        let mut bad_add = QueueEvent::add(video("a"), sender.clone());
        bad_add.video = None;
        assert!(QueueManager::apply(&mut state, &bad_add, 0).is_err());

        let mut bad_set = QueueEvent::set(Vec::new(), sender.clone());
        bad_set.videos = None;
        assert!(QueueManager::apply(&mut state, &bad_set, 0).is_err());

        let mut bad_remove = QueueEvent::remove("a", sender);
        bad_remove.video_id = None;
        assert!(QueueManager::apply(&mut state, &bad_remove, 0).is_err());

        assert!(state.queue.is_empty());
    }

    #[test]
    fn test_apply_rejects_blank_video_id() {
        let mut state = SessionState::new();
        let event = QueueEvent::add(video(""), ClientId::from("c"));
        assert!(QueueManager::apply(&mut state, &event, 0).is_err());
    }

    #[test]
    fn test_apply_dispatches() {
        let mut state = SessionState::new();
        let sender = ClientId::from("c");

        let outcome = QueueManager::apply(&mut state, &QueueEvent::add(video("a"), sender.clone()), 0).unwrap();
        assert_eq!(outcome, QueueOutcome::Applied);

        let outcome = QueueManager::apply(&mut state, &QueueEvent::add(video("a"), sender.clone()), 0).unwrap();
        assert_eq!(outcome, QueueOutcome::AlreadyQueued);

        let outcome = QueueManager::apply(&mut state, &QueueEvent::remove("a", sender), 0).unwrap();
        assert_eq!(outcome, QueueOutcome::Applied);
        assert!(state.queue.is_empty());
    }

    #[test]
    fn test_queue_op_from_event() {
        let sender = ClientId::from("c");
        let op = QueueOp::from_event(&QueueEvent::remove("a", sender.clone())).unwrap();
        assert_eq!(op, QueueOp::Remove("a".to_string()));

        let mut by_video = QueueEvent::add(video("b"), sender.clone());
        by_video.action = QueueAction::RemoveVideo;
        assert_eq!(
            QueueOp::from_event(&by_video).unwrap(),
            QueueOp::Remove("b".to_string())
        );

        let err = QueueOp::from_event(&QueueEvent::set(vec![video(" ")], sender)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: every video must have a videoId");
    }
}
