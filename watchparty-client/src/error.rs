use thiserror::Error;

/// Client error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] watchparty_cluster::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Catch-up failed: {0}")]
    CatchUp(String),

    #[error("Not connected")]
    NotConnected,

    #[error(transparent)]
    Core(#[from] watchparty_core::Error),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;
