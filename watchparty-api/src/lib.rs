// WatchParty API Library
//
// HTTP catch-up endpoints and WebSocket transports over the session sync engine

pub mod http;
pub mod impls;

// Re-export commonly used types
pub use http::{create_router, AppState};
pub use impls::SyncService;
