pub mod sync;
pub mod error;

pub use error::{Error, Result};
pub use sync::{HubChannel, HubEvent, SessionChannel, SessionHub, Subscription};
