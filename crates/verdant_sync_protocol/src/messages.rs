//! Protocol messages for sync.
//!
//! A round is two exchanges:
//!
//! 1. `PushRequest` → `PushResponse`: the client's pending changes in
//!    `local_sequence` order, answered by one [`ItemAck`] per item, in the
//!    same order.
//! 2. `PullRequest` → `PullResponse`: remote changes strictly after a
//!    cursor, in the backend's total order, one page at a time.
//!
//! All messages travel as CBOR.

use crate::error::{ProtocolError, ProtocolResult};
use crate::remote::RemoteRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use verdant_core::{Cursor, Fields, Operation, PendingChange};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// Encodes a message to CBOR.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| ProtocolError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a message from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Codec(e.to_string()))
}

/// One pushed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushItem {
    /// Collection of the record.
    pub collection: String,
    /// Record id.
    pub record_id: String,
    /// What happened locally.
    pub operation: Operation,
    /// Client sequence; with the device id, the backend's dedup key.
    pub local_sequence: u64,
    /// Revision the change was made against.
    pub base_revision: u64,
    /// Wall-clock time of the change.
    pub updated_at: i64,
    /// Create: full snapshot. Update: changed fields. Delete: empty.
    pub fields: Fields,
}

impl From<&PendingChange> for PushItem {
    fn from(change: &PendingChange) -> Self {
        Self {
            collection: change.collection.clone(),
            record_id: change.record_id.clone(),
            operation: change.operation,
            local_sequence: change.local_sequence,
            base_revision: change.base_revision,
            updated_at: change.updated_at,
            fields: change.changed_fields.clone(),
        }
    }
}

/// Push request from client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Protocol version.
    pub protocol_version: u16,
    /// Pushing device.
    pub device_id: String,
    /// Changes in `local_sequence` order.
    pub items: Vec<PushItem>,
}

impl PushRequest {
    /// Creates a push request at the current protocol version.
    pub fn new(device_id: impl Into<String>, items: Vec<PushItem>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            device_id: device_id.into(),
            items,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// The backend's verdict on one pushed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AckStatus {
    /// Applied; the record is now at `revision`.
    Applied {
        /// New revision.
        revision: u64,
        /// Timestamp stored with the revision.
        updated_at: i64,
    },
    /// Already applied by an earlier push of the same item.
    Duplicate {
        /// Revision the earlier push produced.
        revision: u64,
    },
    /// Not applied: the record moved past `base_revision`.
    Conflict {
        /// Current backend state.
        server_state: RemoteRecord,
    },
    /// Not applied and never will be as sent.
    Rejected {
        /// Why.
        reason: String,
    },
}

/// Acknowledgment of one pushed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAck {
    /// Sequence of the item this answers.
    pub local_sequence: u64,
    /// Verdict.
    pub status: AckStatus,
}

/// Push response from server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Protocol version.
    pub protocol_version: u16,
    /// One ack per item, in request order.
    pub acks: Vec<ItemAck>,
}

impl PushResponse {
    /// Creates a push response at the current protocol version.
    #[must_use]
    pub fn new(acks: Vec<ItemAck>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            acks,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Pull request from client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Protocol version.
    pub protocol_version: u16,
    /// Pulling device.
    pub device_id: String,
    /// Return changes strictly after this cursor; `None` for all.
    pub cursor: Option<Cursor>,
    /// Maximum number of changes.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a pull request at the current protocol version.
    pub fn new(device_id: impl Into<String>, cursor: Option<Cursor>, limit: u32) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            device_id: device_id.into(),
            cursor,
            limit,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Pull response from server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Protocol version.
    pub protocol_version: u16,
    /// Changes in backend order.
    pub changes: Vec<RemoteRecord>,
    /// Cursor after the last change; pass it to the next pull.
    pub next_cursor: Option<Cursor>,
    /// Whether more changes are waiting.
    pub has_more: bool,
}

impl PullResponse {
    /// Creates a pull response at the current protocol version.
    #[must_use]
    pub fn new(changes: Vec<RemoteRecord>, next_cursor: Option<Cursor>, has_more: bool) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            changes,
            next_cursor,
            has_more,
        }
    }

    /// Creates an empty response at `cursor`.
    #[must_use]
    pub fn empty(cursor: Option<Cursor>) -> Self {
        Self::new(Vec::new(), cursor, false)
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

fn check_version(actual: u16) -> ProtocolResult<()> {
    if actual == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual,
        })
    }
}

fn check_remote(record: &RemoteRecord) -> ProtocolResult<()> {
    if record.revision == 0 {
        return Err(ProtocolError::invalid(format!(
            "{}/{} has revision 0",
            record.collection, record.id
        )));
    }
    Ok(())
}

/// Checks that `response` answers `request` item by item.
pub fn validate_push_response(request: &PushRequest, response: &PushResponse) -> ProtocolResult<()> {
    check_version(response.protocol_version)?;

    if response.acks.len() != request.items.len() {
        return Err(ProtocolError::invalid(format!(
            "{} acks for {} pushed items",
            response.acks.len(),
            request.items.len()
        )));
    }

    for (item, ack) in request.items.iter().zip(&response.acks) {
        if ack.local_sequence != item.local_sequence {
            return Err(ProtocolError::invalid(format!(
                "ack for sequence {} where {} was expected",
                ack.local_sequence, item.local_sequence
            )));
        }
        match &ack.status {
            AckStatus::Applied { revision: 0, .. } | AckStatus::Duplicate { revision: 0 } => {
                return Err(ProtocolError::invalid(format!(
                    "ack for sequence {} carries revision 0",
                    item.local_sequence
                )));
            }
            AckStatus::Conflict { server_state } => {
                check_remote(server_state)?;
                if server_state.collection != item.collection || server_state.id != item.record_id {
                    return Err(ProtocolError::invalid(format!(
                        "conflict for {}/{} answers {}/{}",
                        server_state.collection, server_state.id, item.collection, item.record_id
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Checks a pull page.
pub fn validate_pull_response(response: &PullResponse) -> ProtocolResult<()> {
    check_version(response.protocol_version)?;
    for change in &response.changes {
        check_remote(change)?;
    }
    if response.has_more && response.changes.is_empty() {
        return Err(ProtocolError::invalid("empty page claims more changes"));
    }
    if !response.changes.is_empty() && response.next_cursor.is_none() {
        return Err(ProtocolError::invalid("changes without a next cursor"));
    }
    Ok(())
}
