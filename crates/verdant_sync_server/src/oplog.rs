//! Server-side record state and change log.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use verdant_core::{Operation, RecordKey};
use verdant_sync_protocol::{AckStatus, PushItem, RemoteRecord};

/// Identity of one pushed item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    device_id: String,
    key: RecordKey,
    local_sequence: u64,
}

#[derive(Debug, Default)]
struct Inner {
    /// One entry per applied change, in revision order.
    log: Vec<RemoteRecord>,
    /// Current state of each record.
    records: HashMap<RecordKey, RemoteRecord>,
    /// Applied items and the revision they produced.
    applied: HashMap<DedupKey, u64>,
    /// Last assigned revision.
    revision: u64,
}

/// Server-side operation log.
///
/// The server oplog maintains:
/// - The current state of every record
/// - Every applied change in revision order, for pulls
/// - The revision each pushed item produced, for idempotent re-sends
#[derive(Debug, Default)]
pub struct ServerOplog {
    inner: RwLock<Inner>,
}

impl ServerOplog {
    /// Creates a new empty oplog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latest revision, `0` when empty.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Returns the number of applied changes.
    pub fn len(&self) -> usize {
        self.inner.read().log.len()
    }

    /// Returns true if nothing was applied yet.
    pub fn is_empty(&self) -> bool {
        self.inner.read().log.is_empty()
    }

    /// Returns the current state of a record.
    pub fn record(&self, collection: &str, id: &str) -> Option<RemoteRecord> {
        self.inner
            .read()
            .records
            .get(&RecordKey::new(collection, id))
            .cloned()
    }

    /// Returns up to `limit` changes with a revision greater than `after`,
    /// and whether more follow.
    pub fn changes_since(&self, after: u64, limit: u32) -> (Vec<RemoteRecord>, bool) {
        let inner = self.inner.read();
        // Revisions are dense and start at 1, so revision n sits at n - 1.
        let start = usize::try_from(after).map_or(inner.log.len(), |a| a.min(inner.log.len()));
        let rest = &inner.log[start..];
        let limit = limit as usize;
        (rest.iter().take(limit).cloned().collect(), rest.len() > limit)
    }

    /// Applies one pushed item from `device_id`.
    pub fn apply(&self, device_id: &str, item: &PushItem) -> AckStatus {
        let mut inner = self.inner.write();
        let key = RecordKey::new(item.collection.clone(), item.record_id.clone());
        let dedup = DedupKey {
            device_id: device_id.to_string(),
            key: key.clone(),
            local_sequence: item.local_sequence,
        };

        if let Some(&revision) = inner.applied.get(&dedup) {
            debug!(%key, sequence = item.local_sequence, "duplicate push");
            return AckStatus::Duplicate { revision };
        }

        let current = inner.records.get(&key).cloned();
        let next = match (item.operation, current) {
            (Operation::Delete, Some(current)) if current.deleted => {
                inner.applied.insert(dedup, current.revision);
                return AckStatus::Applied {
                    revision: current.revision,
                    updated_at: current.updated_at,
                };
            }
            (Operation::Delete, current) => RemoteRecord {
                deleted: true,
                fields: current.map(|c| c.fields).unwrap_or_default(),
                ..remote_from(device_id, item)
            },
            (Operation::Create, None) => remote_from(device_id, item),
            (Operation::Create, Some(current)) => {
                return AckStatus::Conflict {
                    server_state: current,
                };
            }
            (Operation::Update, None) => {
                return AckStatus::Rejected {
                    reason: format!("update of unknown record {key}"),
                };
            }
            (Operation::Update, Some(current))
                if current.deleted || item.base_revision < current.revision =>
            {
                return AckStatus::Conflict {
                    server_state: current,
                };
            }
            (Operation::Update, Some(current)) => {
                let mut fields = current.fields;
                fields.extend(item.fields.clone());
                RemoteRecord {
                    fields,
                    ..remote_from(device_id, item)
                }
            }
        };

        inner.revision += 1;
        let revision = inner.revision;
        let record = RemoteRecord { revision, ..next };
        let updated_at = record.updated_at;
        inner.log.push(record.clone());
        inner.records.insert(key, record);
        inner.applied.insert(dedup, revision);

        AckStatus::Applied {
            revision,
            updated_at,
        }
    }
}

fn remote_from(device_id: &str, item: &PushItem) -> RemoteRecord {
    RemoteRecord {
        collection: item.collection.clone(),
        id: item.record_id.clone(),
        revision: 0,
        updated_at: item.updated_at,
        origin: device_id.to_string(),
        deleted: false,
        fields: item.fields.clone(),
    }
}
