// Module: sync

pub mod channel;
pub mod events;
pub mod hub;

pub use channel::{HubChannel, SessionChannel, Subscription};
pub use events::{HubEvent, PresenceAction, PresenceUpdate};
pub use hub::{ConnectionId, SessionHub};
