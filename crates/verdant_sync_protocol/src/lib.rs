//! # Verdant Sync Protocol
//!
//! Wire types and conflict resolution for verdant sync.
//!
//! This crate provides:
//! - Push and pull request/response messages with CBOR codecs
//! - `RemoteRecord`, the backend's view of a record
//! - Response validation against the request that produced it
//! - `ConflictResolver`, the deterministic field-level merge policy
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod messages;
mod remote;

pub use conflict::{ConflictRecord, ConflictResolver, Outcome, Resolution};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    decode, encode, validate_pull_response, validate_push_response, AckStatus, ItemAck,
    PullRequest, PullResponse, PushItem, PushRequest, PushResponse, PROTOCOL_VERSION,
};
pub use remote::RemoteRecord;
