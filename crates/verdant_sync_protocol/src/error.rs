//! Protocol errors.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A message that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Bytes could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The peer speaks another protocol version.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Our version.
        expected: u16,
        /// The peer's version.
        actual: u16,
    },

    /// A decodable response that does not fit its request.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProtocolError {
    /// Creates an invalid response error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }
}
