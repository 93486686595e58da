//! Client side of a watch-together session: the sync protocol handler,
//! presence tracking and catch-up sources.

pub mod catchup;
pub mod error;
pub mod handler;
pub mod presence;

pub use catchup::{HttpSnapshotFetcher, NoRecordSource, SessionRecordSource, SnapshotFetcher};
pub use error::{Error, Result};
pub use handler::{
    ActionOutcome, ConnectionState, IncomingOutcome, SyncHandler, SyncNotice,
};
pub use presence::{PresenceSnapshot, PresenceTracker};
