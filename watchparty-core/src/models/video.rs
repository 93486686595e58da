//! Queued video entries.
//!
//! Videos are delivered by an external provider embedded as a player widget;
//! this model only carries what the queue and the player need to show.

use serde::{Deserialize, Serialize};

/// A video in a session's queue
///
/// `video_id` is assigned by the external provider and is the only identity
/// key: equality and hashing ignore every other field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub video_id: String,
    pub source_url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl Video {
    #[must_use]
    pub fn new(
        video_id: impl Into<String>,
        source_url: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            source_url: source_url.into(),
            title: title.into(),
            channel_name: None,
            description: None,
            thumbnail_url: None,
        }
    }

    #[must_use]
    pub fn with_channel_name(mut self, channel_name: impl Into<String>) -> Self {
        self.channel_name = Some(channel_name.into());
        self
    }

    #[must_use]
    pub fn with_thumbnail_url(mut self, thumbnail_url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(thumbnail_url.into());
        self
    }

    /// Check that the provider id is usable as a queue key
    #[must_use]
    pub fn has_valid_id(&self) -> bool {
        !self.video_id.trim().is_empty()
    }
}

impl PartialEq for Video {
    fn eq(&self, other: &Self) -> bool {
        self.video_id == other.video_id
    }
}

impl Eq for Video {}

impl std::hash::Hash for Video {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.video_id.hash(state);
    }
}
