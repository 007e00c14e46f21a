use std::time::Duration;

use thiserror::Error;

/// Custom error types for the suspicious input guard
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// State file I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State file (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A hit was recorded without a usable source identifier
    #[error("Invalid source identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Flushing the state file took longer than the configured bound
    #[error("State flush timed out after {0:?}")]
    FlushTimeout(Duration),

    /// The event sink refused the event
    #[error("Event sink error: {0}")]
    Sink(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for suspicious input guard operations
pub type GuardResult<T> = Result<T, GuardError>;

impl From<tokio::task::JoinError> for GuardError {
    fn from(err: tokio::task::JoinError) -> Self {
        GuardError::Internal(err.to_string())
    }
}
