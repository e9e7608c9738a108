//! Error types for the endpoint synchronizer
//!
//! This module defines all error types used throughout the crate.
//!
//! "Not the writer" and "version unchanged" are not errors; they are
//! reported through [`crate::engine::PassOutcome`].

use std::fmt;

use thiserror::Error;

/// Result type alias for synchronizer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the synchronizer
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP non-success status or connection failure
    #[error("Transport error{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transport {
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Error message
        message: String,
    },

    /// Response body missing expected fields or instance
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A device object CLI invocation failed
    #[error("Device CLI error ({operation} {object}): {detail}")]
    DeviceCli {
        /// Operation attempted (query, create, modify, save, sync)
        operation: String,
        /// Object the operation was aimed at
        object: String,
        /// Captured output or failure reason
        detail: String,
    },

    /// Identity, version or artifact storage unavailable or unwritable
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another pass holds the advisory lock
    #[error("Another pass is running: {0}")]
    Locked(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Create a transport error carrying an HTTP status
    pub fn transport_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: msg.into(),
        }
    }

    /// Create a transport error for a failed connection
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: msg.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a device CLI error
    pub fn device_cli(
        operation: impl Into<String>,
        object: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::DeviceCli {
            operation: operation.into(),
            object: object.into(),
            detail: detail.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a lock contention error
    pub fn locked(msg: impl Into<String>) -> Self {
        Self::Locked(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True for failures fetching or decoding provider data
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::MalformedResponse(_))
    }
}

/// Failure reconciling a single target
///
/// Isolated to its target: the engine records it and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileFailure {
    /// Target that failed
    pub target: crate::reconcile::TargetKind,
    /// Step that failed (e.g. "write artifact", "create file object")
    pub operation: String,
    /// Underlying error text
    pub detail: String,
}

impl ReconcileFailure {
    pub(crate) fn new(
        target: crate::reconcile::TargetKind,
        operation: impl Into<String>,
        err: &Error,
    ) -> Self {
        Self {
            target,
            operation: operation.into(),
            detail: err.to_string(),
        }
    }
}

impl fmt::Display for ReconcileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed during {}: {}", self.target, self.operation, self.detail)
    }
}

impl std::error::Error for ReconcileFailure {}
