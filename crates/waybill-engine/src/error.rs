//! Error types for worker and outbound-call operations.
//!
//! Errors carry enough context to decide whether a failed call is worth
//! retrying and to tag log lines with a coarse [`ErrorCategory`].

use std::{fmt, time::Duration};

use thiserror::Error;
use waybill_core::CoreError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures surfaced by drain loops, the webhook client and the worker pool.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Store transaction failed; the current cycle is aborted.
    #[error("store error: {message}")]
    Store {
        /// Store error message
        message: String,
    },

    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// Outbound request exceeded its timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout in seconds
        timeout_seconds: u64,
    },

    /// Peer answered with anything other than HTTP 200.
    #[error("unexpected response: HTTP {status_code}")]
    UnexpectedStatus {
        /// Response status code
        status_code: u16,
        /// Response body, truncated
        body: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker} panicked: {error}")]
    WorkerPanic {
        /// Worker name
        worker: String,
        /// Join error rendering
        error: String,
    },

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl EngineError {
    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store { message: message.into() }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an unexpected-status error.
    pub fn unexpected_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::UnexpectedStatus { status_code, body: body.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns true when repeating the same call may succeed.
    ///
    /// Network failures, timeouts, 5xx and 429 responses are transient. Other
    /// non-200 responses mean the peer rejected the payload.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::Store { .. } => true,
            Self::UnexpectedStatus { status_code, .. } => {
                *status_code >= 500 || *status_code == 429
            },
            Self::Configuration { .. }
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. }
            | Self::Internal { .. } => false,
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        Self::store(err.to_string())
    }
}

/// Coarse classification used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Store transaction failures.
    Store,
    /// Connectivity and timeouts.
    Network,
    /// Peer answered with a non-200 status.
    Status,
    /// Configuration problems.
    Configuration,
    /// Worker lifecycle failures.
    Lifecycle,
    /// Internal system errors.
    Internal,
}

impl From<&EngineError> for ErrorCategory {
    fn from(error: &EngineError) -> Self {
        match error {
            EngineError::Store { .. } => Self::Store,
            EngineError::Network { .. } | EngineError::Timeout { .. } => Self::Network,
            EngineError::UnexpectedStatus { .. } => Self::Status,
            EngineError::Configuration { .. } => Self::Configuration,
            EngineError::ShutdownTimeout { .. } | EngineError::WorkerPanic { .. } => {
                Self::Lifecycle
            },
            EngineError::Internal { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "store"),
            Self::Network => write!(f, "network"),
            Self::Status => write!(f, "status"),
            Self::Configuration => write!(f, "configuration"),
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
