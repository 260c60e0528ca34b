//! # Verdant Sync Engine
//!
//! Sync round state machine, retry manager and engine handle for verdant.
//!
//! This crate provides:
//! - `SyncClient`: one push → pull → reconcile → commit round
//! - `SyncEngine`: the process-wide handle with `init`/`start`/`shutdown`,
//!   status observation and debounced `force_sync`
//! - `Backoff` and `RetryConfig`: exponential backoff with jitter
//! - `SyncTransport` with HTTP, loopback and mock implementations
//!
//! ## Architecture
//!
//! A round pushes first, then pulls:
//! 1. Push every pending change, in `local_sequence` order
//! 2. Pull remote changes after the stored cursor, page by page
//! 3. Pair pulled records with still-pending local changes and resolve
//!    conflicts
//! 4. Commit acknowledgments, remote state, resolutions and the new cursor
//!    in one local transaction
//!
//! ## Key Invariants
//!
//! - Nothing is written locally before the last network call of a round
//!   returns, so a failed or cancelled round leaves no trace
//! - Re-sending an already applied change is harmless: the backend answers
//!   `Duplicate` and the client settles it like any acknowledgment
//! - At most one round is in flight per engine
//! - Sync health never blocks local reads or writes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod client;
mod config;
mod engine;
mod error;
mod http;
mod state;
mod transport;

pub use backoff::Backoff;
pub use client::SyncClient;
pub use config::{RetryConfig, SyncConfig};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use http::{CborDecode, CborEncode, HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use state::{SyncPhase, SyncReport, SyncStats, SyncStatus};
pub use transport::{MockTransport, SyncTransport};
