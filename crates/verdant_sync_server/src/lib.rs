//! # Verdant Sync Server
//!
//! Reference backend of record for verdant sync.
//!
//! This crate provides:
//! - `ServerOplog`: per-record state, a global revision counter and the
//!   push dedup table
//! - `RequestHandler`: push and pull endpoint logic
//! - `SyncServer`: typed and CBOR entry points for in-process transports
//!
//! # Semantics
//!
//! Every applied change takes the next global revision. The revision doubles
//! as the pull cursor, so "changes after cursor `n`" are the log entries
//! with revision greater than `n`.
//!
//! A pushed item is identified by `(device, collection, record, local
//! sequence)`. Re-sending an applied item answers `Duplicate` with the
//! original revision and changes nothing. An item based on an older revision
//! than the record's current one is answered with `Conflict` and the current
//! state, except for deletes, which always apply.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod handler;
mod oplog;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use oplog::ServerOplog;
pub use server::{SyncServer, PULL_PATH, PUSH_PATH};
