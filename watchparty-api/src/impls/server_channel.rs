//! In-process transport for a client handler running next to the server.
//!
//! Unlike the pure [`HubChannel`](watchparty_cluster::HubChannel) relay, a
//! publish here goes through the [`SyncService`], so the session store is
//! mutated before the event fans out.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use watchparty_client::SnapshotFetcher;
use watchparty_cluster::{
    Error as ChannelError, Result as ChannelResult, SessionChannel, Subscription,
};
use watchparty_core::models::{ChannelMessage, PresenceEntry, SessionId, SessionState};

use super::sync_service::SyncService;

pub struct ServerChannel {
    service: SyncService,
    session_id: SessionId,
    connection_id: String,
    closed: AtomicBool,
}

impl ServerChannel {
    #[must_use]
    pub fn new(service: SyncService, session_id: SessionId) -> Self {
        let connection_id = format!("local_{}", nanoid::nanoid!(8));
        service.hub().connect(&session_id, &connection_id);
        Self {
            service,
            session_id,
            connection_id,
            closed: AtomicBool::new(false),
        }
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.service.disconnect(&self.connection_id);
        }
    }

    fn ensure_open(&self) -> ChannelResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed(self.connection_id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionChannel for ServerChannel {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn publish(&self, message: ChannelMessage) -> ChannelResult<()> {
        self.ensure_open()?;
        self.service
            .handle(&self.session_id, message)
            .map(|_| ())
            .map_err(|e| ChannelError::Publish(e.to_string()))
    }

    async fn subscribe(&self) -> ChannelResult<Subscription> {
        self.ensure_open()?;
        let (id, receiver) = self
            .service
            .hub()
            .subscribe(&self.session_id, &self.connection_id);
        Ok(Subscription::new(id, receiver))
    }

    async fn enter_presence(&self, entry: PresenceEntry) -> ChannelResult<()> {
        self.ensure_open()?;
        self.service
            .join(&self.session_id, &self.connection_id, entry);
        Ok(())
    }

    async fn leave_presence(&self) -> ChannelResult<()> {
        self.ensure_open()?;
        self.service.leave(&self.session_id, &self.connection_id);
        Ok(())
    }

    async fn presence_members(&self) -> ChannelResult<Vec<PresenceEntry>> {
        self.ensure_open()?;
        Ok(self.service.members(&self.session_id))
    }
}

#[async_trait]
impl SnapshotFetcher for SyncService {
    async fn fetch_snapshot(
        &self,
        session_id: &SessionId,
    ) -> watchparty_client::Result<SessionState> {
        Ok(self.snapshot(session_id))
    }
}

impl Drop for ServerChannel {
    fn drop(&mut self) {
        self.close();
    }
}
