//! Error types
//!
//! A single error enum covers every failure the monitoring core can report.
//! It is `Clone` so that it can be carried inside [`MonitorEvent`]s.
//!
//! [`MonitorEvent`]: crate::events::MonitorEvent

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for monitoring operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed subscription or topic identifier
    #[error("invalid identifier {input:?}: {reason}")]
    Validation { input: String, reason: String },

    /// Subscription or topic does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to access the resource
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Retryable network failure
    #[error("transient network error: {0}")]
    Transient(String),

    /// Non-retryable stream failure
    #[error("fatal stream error: {0}")]
    Fatal(String),

    /// A delivered message could not be decoded
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// The registry has been shut down
    #[error("monitor registry is shut down")]
    Closed,
}

impl Error {
    /// Build a validation error for `input`
    pub fn validation(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Whether the streamer should retry after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}
