//! Implementation layer shared by the HTTP and WebSocket transports

pub mod legacy;
pub mod messaging;
pub mod server_channel;
pub mod session_protocol;
pub mod sync_service;

pub use legacy::LegacyBridge;
pub use messaging::{ConnectionContext, FrameProtocol, StreamMessage, StreamMessageHandler};
pub use server_channel::ServerChannel;
pub use session_protocol::SessionProtocol;
pub use sync_service::{Applied, SyncService};
