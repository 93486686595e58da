use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::events::PlaybackAction;
use super::video::Video;

/// Authoritative playback and queue state of one session.
///
/// `current_time` is the playhead at `last_updated` (wall-clock ms); readers
/// must extrapolate while `is_playing` before displaying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub is_playing: bool,
    pub current_time: f64,
    pub current_video: Option<Video>,
    pub queue: Vec<Video>,
    #[serde(default)]
    pub last_updated: i64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            current_video: None,
            queue: Vec::new(),
            last_updated: Utc::now().timestamp_millis(),
        }
    }

    /// Apply a play/pause/seek. Last write wins; time is not checked for monotonicity.
    pub fn apply_playback(&mut self, action: PlaybackAction, current_time: f64, now_ms: i64) {
        match action {
            PlaybackAction::Play => self.is_playing = true,
            PlaybackAction::Pause => self.is_playing = false,
            PlaybackAction::Seek => {}
        }
        self.current_time = current_time;
        self.last_updated = now_ms;
    }

    /// Playhead position at `now_ms`
    #[must_use]
    pub fn extrapolated_time(&self, now_ms: i64) -> f64 {
        if !self.is_playing {
            return self.current_time;
        }
        let elapsed_ms = (now_ms - self.last_updated).max(0);
        self.current_time + elapsed_ms as f64 / 1000.0
    }

    /// Copy of this state re-anchored at `now_ms`
    #[must_use]
    pub fn extrapolated(&self, now_ms: i64) -> Self {
        let mut snapshot = self.clone();
        snapshot.current_time = self.extrapolated_time(now_ms);
        snapshot.last_updated = now_ms.max(self.last_updated);
        snapshot
    }

    /// Head of the queue, the video conceptually playing now
    #[must_use]
    pub fn now_playing(&self) -> Option<&Video> {
        self.queue.first()
    }

    #[must_use]
    pub fn contains(&self, video_id: &str) -> bool {
        self.queue.iter().any(|v| v.video_id == video_id)
    }

    #[must_use]
    pub fn current_video_id(&self) -> Option<&str> {
        self.current_video.as_ref().map(|v| v.video_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = SessionState::new();
        assert!(!state.is_playing);
        assert_eq!(state.current_time, 0.0);
        assert!(state.current_video.is_none());
        assert!(state.queue.is_empty());
    }

    #[test]
    fn test_play_then_pause() {
        let mut state = SessionState::new();
        state.apply_playback(PlaybackAction::Play, 10.0, 1_000);
        assert!(state.is_playing);
        assert_eq!(state.current_time, 10.0);

        state.apply_playback(PlaybackAction::Pause, 20.0, 2_000);
        assert!(!state.is_playing);
        assert_eq!(state.current_time, 20.0);
        assert_eq!(state.last_updated, 2_000);
    }

    #[test]
    fn test_seek_keeps_play_state() {
        let mut state = SessionState::new();
        state.apply_playback(PlaybackAction::Play, 0.0, 0);
        state.apply_playback(PlaybackAction::Seek, 95.0, 10);
        assert!(state.is_playing);
        assert_eq!(state.current_time, 95.0);
    }

    #[test]
    fn test_older_write_still_wins() {
        let mut state = SessionState::new();
        state.apply_playback(PlaybackAction::Seek, 50.0, 5_000);
        state.apply_playback(PlaybackAction::Seek, 10.0, 4_000);
        assert_eq!(state.current_time, 10.0);
        assert_eq!(state.last_updated, 4_000);
    }

    #[test]
    fn test_extrapolation_while_playing() {
        let mut state = SessionState::new();
        state.apply_playback(PlaybackAction::Play, 30.0, 10_000);

        assert!((state.extrapolated_time(11_000) - 31.0).abs() < 1e-9);
        let snapshot = state.extrapolated(40_000);
        assert!((snapshot.current_time - 60.0).abs() < 1e-9);
        assert_eq!(snapshot.last_updated, 40_000);
    }

    #[test]
    fn test_no_extrapolation_while_paused() {
        let mut state = SessionState::new();
        state.apply_playback(PlaybackAction::Pause, 30.0, 10_000);
        assert_eq!(state.extrapolated_time(99_000), 30.0);
    }

    #[test]
    fn test_clock_skew_never_rewinds() {
        let mut state = SessionState::new();
        state.apply_playback(PlaybackAction::Play, 30.0, 10_000);
        assert_eq!(state.extrapolated_time(9_000), 30.0);
    }
}
