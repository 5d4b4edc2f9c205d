//! Streaming error types.

use sfdc_api::{ApiError, ConfigError};

/// Failure reported by an application notification handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Streaming errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Replay cursor storage failed.
    #[error("Replay storage error: {0}")]
    Storage(String),

    /// An inbound message lacks a required field.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The Bayeux transport rejected a request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A REST call (login, topic declaration) failed.
    #[error("Salesforce API error: {0}")]
    Api(#[from] ApiError),

    /// SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A background task could not be joined.
    #[error("Task join error: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for StreamError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

/// Result type for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;
