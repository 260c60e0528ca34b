//! Error types for the verdant local store.

use std::io;
use thiserror::Error;

/// Result type for local store operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in local store operations.
///
/// Every failed `write` leaves the store exactly as it was before the call.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] verdant_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal contains a damaged frame followed by valid data.
    #[error("journal corruption at offset {offset}: {message}")]
    Corruption {
        /// Byte offset of the damaged frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A journal payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Record not found, or already deleted.
    #[error("record not found: {collection}/{id}")]
    NotFound {
        /// Collection searched.
        collection: String,
        /// Record id that was not found.
        id: String,
    },

    /// A record with this id already exists.
    #[error("record already exists: {collection}/{id}")]
    AlreadyExists {
        /// Collection of the existing record.
        collection: String,
        /// Id of the existing record.
        id: String,
    },

    /// A write violated the collection schema.
    #[error("validation failed for {collection}: {message}")]
    Validation {
        /// Collection the write targeted.
        collection: String,
        /// What was wrong.
        message: String,
    },

    /// A stored record does not match the typed model it was read into.
    #[error("cannot decode {collection} record: {message}")]
    Decode {
        /// Collection of the record.
        collection: String,
        /// What was wrong.
        message: String,
    },

    /// Another process holds the store lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// Invalid store layout or journal format.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The store has been closed.
    #[error("store is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a not found error.
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns true for `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
