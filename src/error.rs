//! Error types for the Sluice service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Sluice operations.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The counter store could not be reached or answered with a protocol error
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// A stored value could not be parsed as the expected numeric type
    #[error("Malformed state under key '{key}': {detail}")]
    MalformedState { key: String, detail: String },

    /// A scalar counter the limiter relies on does not exist
    #[error("Counter '{0}' is missing from the counter store")]
    MissingCounter(String),

    /// The counter store did not answer before the request deadline
    #[error("Counter store did not answer within {0:?}")]
    StoreTimeout(Duration),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SluiceError {
    pub(crate) fn malformed(key: &str, detail: impl Into<String>) -> Self {
        SluiceError::MalformedState {
            key: key.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<redis::RedisError> for SluiceError {
    fn from(err: redis::RedisError) -> Self {
        SluiceError::StoreUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for SluiceError {
    fn from(err: config::ConfigError) -> Self {
        SluiceError::Config(err.to_string())
    }
}

/// Result type alias for Sluice operations.
pub type Result<T> = std::result::Result<T, SluiceError>;
