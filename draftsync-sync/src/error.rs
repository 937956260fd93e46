//! Error types for the sync layer.

use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
///
/// `Clone` so a single in-flight result can be handed to every caller that
/// joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The transport could not reach the server.
    #[error("network error: {0}")]
    Network(String),

    /// Too many requests, either rejected locally or signaled by the server (429).
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Server-side failure (5xx) or request timeout (408).
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The request was rejected (4xx other than 408/429).
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited { retry_after: None },
            408 | 500..=599 => Self::Server { status, message },
            400..=499 => Self::Client { status, message },
            _ => Self::Server { status, message },
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Delay requested by the server or the local rate limiter, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<draftsync_storage::StorageError> for SyncError {
    fn from(e: draftsync_storage::StorageError) -> Self {
        Self::Storage(e.to_string())
    }
}
