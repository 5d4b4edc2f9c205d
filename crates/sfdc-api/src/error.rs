//! API error types.

use crate::config::ConfigError;

/// Salesforce API errors.
///
/// Only [`ApiError::SessionExpired`] is handled inside this crate (by the
/// retrying invoker). Every other variant reaches the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The session's authentication is no longer valid (HTTP 401).
    #[error("Expired session for {url}. Response content: {content}")]
    SessionExpired {
        /// Requested URL.
        url: String,
        /// Response body.
        content: String,
    },

    /// A named lookup had no match.
    #[error("{0}")]
    NotFound(String),

    /// More than one record matched (HTTP 300).
    #[error("More than one record for {url}. Response content: {content}")]
    MoreThanOneRecord {
        /// Requested URL.
        url: String,
        /// Response body.
        content: String,
    },

    /// The request was rejected as malformed (HTTP 400).
    #[error("Malformed request {url}. Response content: {content}")]
    MalformedRequest {
        /// Requested URL.
        url: String,
        /// Response body.
        content: String,
    },

    /// The request was refused (HTTP 403).
    #[error("Request refused for {url}. Response content: {content}")]
    RefusedRequest {
        /// Requested URL.
        url: String,
        /// Response body.
        content: String,
    },

    /// The addressed resource does not exist (HTTP 404).
    #[error("Resource {resource} not found. Response content: {content}")]
    ResourceNotFound {
        /// Requested URL.
        resource: String,
        /// Response body.
        content: String,
    },

    /// Any other non-success response.
    #[error("Error code {status} for {url}. Response content: {content}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
        /// Response body.
        content: String,
    },

    /// Login was rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A topic definition violates a local constraint.
    #[error("Invalid push topic: {0}")]
    InvalidTopic(String),

    /// A success response could not be interpreted.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("URL parsing failed: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApiError {
    /// Returns true if the failure means the session must be thrown away.
    #[must_use]
    pub const fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }

    /// Returns true for a lookup miss.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Map a non-success REST response to its error class.
    #[must_use]
    pub fn from_status(status: u16, url: impl Into<String>, content: impl Into<String>) -> Self {
        let url = url.into();
        let content = content.into();
        match status {
            300 => Self::MoreThanOneRecord { url, content },
            400 => Self::MalformedRequest { url, content },
            401 => Self::SessionExpired { url, content },
            403 => Self::RefusedRequest { url, content },
            404 => Self::ResourceNotFound {
                resource: url,
                content,
            },
            _ => Self::Remote {
                status,
                url,
                content,
            },
        }
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
