//! Error types for the sync engine.

use thiserror::Error;
use verdant_core::CoreError;
use verdant_sync_protocol::ProtocolError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync round.
///
/// `Clone` so one round's outcome can be handed to every caller that joined
/// it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A network call exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The backend answered with something this client can't use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Version mismatch.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },

    /// The local store failed while committing the round.
    #[error("storage error: {0}")]
    Storage(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The engine was shut down.
    #[error("sync engine closed")]
    Closed,
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later attempt may succeed.
    ///
    /// Protocol errors count: the backend may be mid-deploy.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout
            | SyncError::NotConnected
            | SyncError::Protocol(_)
            | SyncError::VersionMismatch { .. } => true,
            SyncError::Storage(_) | SyncError::Cancelled | SyncError::Closed => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::VersionMismatch { expected, actual } => SyncError::VersionMismatch {
                local: expected,
                remote: actual,
            },
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::Storage(err.to_string())
    }
}
