//! # verdant storage
//!
//! Byte-level storage for the verdant local store.
//!
//! Backends are **opaque append-only byte stores**: the local store frames
//! its journal entries on top of them and owns every format decision. A
//! backend only has to read, append, flush, and truncate.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests; clones share the
//!   same bytes so a test can "restart" a store over what survived
//! - [`FileBackend`] - a single file on disk
//!
//! ## Example
//!
//! ```rust
//! use verdant_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
