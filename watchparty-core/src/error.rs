use thiserror::Error;

/// Errors raised while applying session events.
///
/// Every variant describes a request that was rejected before any session
/// state changed.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::InvalidInput("missing sessionId".to_string());
        assert_eq!(err.to_string(), "Invalid input: missing sessionId");

        let err = Error::from(serde_json::from_str::<u32>("nope").unwrap_err());
        assert!(err.to_string().starts_with("Serialization error:"));
    }
}
