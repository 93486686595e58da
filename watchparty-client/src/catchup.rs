//! Sources a joining client can catch up from.
//!
//! The persistent record (reactive document store) is authoritative; the
//! transient snapshot is the request/response fallback against the live
//! session store.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use watchparty_core::models::{SessionId, SessionRecord, SessionState};

use crate::error::{Error, Result};

/// Lookup of a session's persisted record
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRecordSource: Send + Sync {
    async fn fetch_record(&self, session_id: &SessionId) -> Result<Option<SessionRecord>>;
}

/// Request/response catch-up against the session store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Extrapolated state of the session
    async fn fetch_snapshot(&self, session_id: &SessionId) -> Result<SessionState>;
}

/// Record source for deployments without a reactive store
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecordSource;

#[async_trait]
impl SessionRecordSource for NoRecordSource {
    async fn fetch_record(&self, _session_id: &SessionId) -> Result<Option<SessionRecord>> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// `GET /api/state?sessionId=` over HTTP
#[derive(Debug, Clone)]
pub struct HttpSnapshotFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotFetcher {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn state_url(&self) -> String {
        format!("{}/api/state", self.base_url)
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch_snapshot(&self, session_id: &SessionId) -> Result<SessionState> {
        let response = self
            .client
            .get(self.state_url())
            .query(&[("sessionId", session_id.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            return Err(Error::CatchUp(format!("{}: {message}", status.as_u16())));
        }

        let state = response.json::<SessionState>().await?;
        debug!(
            session_id = %session_id,
            is_playing = state.is_playing,
            queue_len = state.queue.len(),
            "Fetched session snapshot"
        );
        Ok(state)
    }
}
