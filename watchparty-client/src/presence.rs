//! Live viewer count and roster for one session.
//!
//! The roster is re-read from the channel on every presence event instead of
//! being adjusted incrementally, so duplicated enters or leaves can never skew
//! the count.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};
use watchparty_cluster::{HubEvent, SessionChannel, Subscription};
use watchparty_core::models::PresenceEntry;

use crate::error::{Error, Result};

/// Published to observers after every presence change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub count: usize,
    pub roster: Vec<PresenceEntry>,
}

impl From<Vec<PresenceEntry>> for PresenceSnapshot {
    fn from(roster: Vec<PresenceEntry>) -> Self {
        Self {
            count: roster.len(),
            roster,
        }
    }
}

pub struct PresenceTracker<C: SessionChannel + ?Sized> {
    channel: Arc<C>,
    entry: PresenceEntry,
    snapshot_tx: watch::Sender<PresenceSnapshot>,
    subscription: Option<Subscription>,
}

impl<C: SessionChannel + ?Sized> PresenceTracker<C> {
    pub fn new(channel: Arc<C>, entry: PresenceEntry) -> Self {
        let (snapshot_tx, _) = watch::channel(PresenceSnapshot::default());
        Self {
            channel,
            entry,
            snapshot_tx,
            subscription: None,
        }
    }

    /// Receiver that always holds the latest `{count, roster}`
    pub fn watch(&self) -> watch::Receiver<PresenceSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub const fn is_joined(&self) -> bool {
        self.subscription.is_some()
    }

    /// Subscribe to presence changes and enter with the local identity
    pub async fn join(&mut self) -> Result<PresenceSnapshot> {
        self.subscription = Some(self.channel.subscribe().await?);
        self.channel.enter_presence(self.entry.clone()).await?;
        info!(
            session_id = %self.channel.session_id(),
            identity = %self.entry.identity,
            "Entered session presence"
        );
        self.refresh().await
    }

    /// Explicit leave on teardown
    pub async fn leave(&mut self) -> Result<()> {
        if self.subscription.take().is_none() {
            return Ok(());
        }
        self.channel.leave_presence().await?;
        self.snapshot_tx.send_replace(PresenceSnapshot::default());
        info!(
            session_id = %self.channel.session_id(),
            identity = %self.entry.identity,
            "Left session presence"
        );
        Ok(())
    }

    /// Re-read the authoritative member list and publish it
    pub async fn refresh(&self) -> Result<PresenceSnapshot> {
        let members = self.channel.presence_members().await?;
        let snapshot = PresenceSnapshot::from(members);
        debug!(
            session_id = %self.channel.session_id(),
            count = snapshot.count,
            "Presence roster refreshed"
        );
        self.snapshot_tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    /// Refresh on presence events; other events are ignored
    pub async fn handle_event(&self, event: &HubEvent) -> Result<Option<PresenceSnapshot>> {
        match event {
            HubEvent::Presence(_) => self.refresh().await.map(Some),
            HubEvent::Message(_) => Ok(None),
        }
    }

    /// Wait for the next presence change and publish the new roster
    pub async fn next_change(&mut self) -> Result<PresenceSnapshot> {
        loop {
            let event = self
                .subscription
                .as_mut()
                .ok_or(Error::NotConnected)?
                .recv()
                .await
                .ok_or(Error::NotConnected)?;
            if let Some(snapshot) = self.handle_event(&event).await? {
                return Ok(snapshot);
            }
        }
    }
}
