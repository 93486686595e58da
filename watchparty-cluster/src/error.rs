//! Error types for the transport channel

use thiserror::Error;

/// Transport channel error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Presence error: {0}")]
    Presence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, Error>;
