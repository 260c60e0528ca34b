//! # Verdant Core
//!
//! The local store of the verdant local-first sync engine.
//!
//! This crate provides:
//! - A schema-validated record store with tombstone deletes
//! - The change tracker: a durable, coalescing queue of outbound changes
//! - The sync checkpoint, committed atomically with the data it describes
//! - Live queries and a change feed for observers
//! - Crash recovery from a single checksummed journal
//!
//! Local writes go through [`Database::write`] and always enqueue a
//! [`PendingChange`]. The sync engine applies remote state through
//! [`Database::reconcile`], which never does.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod checkpoint;
mod clock;
mod config;
mod database;
mod dir;
mod error;
pub mod journal;
mod live;
mod models;
mod record;
mod schema;
mod state;
mod tracker;
mod txn;
mod types;

pub use change_feed::{ChangeEvent, ChangeFeed, ChangeKind, ChangeOrigin};
pub use checkpoint::SyncCheckpoint;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use database::{CollectionCounts, Database, StoreStats};
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use journal::{verify_file, TailState, VerifyReport};
pub use live::{LiveQuery, Query};
pub use models::{DiaryEntry, Document, Plant, Post, Stored, Task};
pub use record::Record;
pub use schema::{CollectionSchema, FieldSpec, Schema};
pub use tracker::{Operation, OutboxState, PendingChange};
pub use txn::{ReconcileTxn, WriteTxn};
pub use types::{Cursor, FieldKind, FieldValue, Fields, RecordKey};
