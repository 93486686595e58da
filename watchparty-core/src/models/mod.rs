pub mod events;
pub mod id;
pub mod record;
pub mod session;
pub mod video;

pub use events::{ChannelMessage, PlaybackAction, PresenceEntry, QueueAction, QueueEvent, SyncEvent};
pub use id::{generate_id, ClientId, SessionId};
pub use record::SessionRecord;
pub use session::SessionState;
pub use video::Video;
