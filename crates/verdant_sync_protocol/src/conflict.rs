//! Conflict resolution.
//!
//! A conflict exists when a local pending change and a remote record with a
//! newer revision describe the same `(collection, id)`. The policy:
//!
//! - **Tombstone wins.** A remote delete discards the local edits. A local
//!   delete against a live remote keeps the record deleted and re-sends the
//!   delete.
//! - **Disjoint fields merge.** A field only one side changed keeps that
//!   side's value.
//! - **Overlapping fields** go to the side with the strictly later
//!   `updated_at`. Equal timestamps compare `id + origin` of each side and
//!   the greater key wins. When the remote state came from this device, the
//!   queued change is the newer write and wins the tie.
//! - **Create vs create** merges against an empty base.
//!
//! "The remote changed field `f`" means its value differs from the value
//! the local edit started from (`PendingChange::base_fields`). Local fields
//! that survive the merge still have to reach the backend, so they are
//! handed back as a fresh pending update against the remote revision.

use crate::remote::RemoteRecord;
use std::cmp::Ordering;
use verdant_core::{FieldValue, Fields, Operation, PendingChange, Record};

/// A pending change paired with newer remote state. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    /// The local, not yet acknowledged change.
    pub pending: PendingChange,
    /// The remote record.
    pub remote: RemoteRecord,
}

impl ConflictRecord {
    /// Pairs `pending` with `remote`.
    ///
    /// Returns `None` when the remote revision is not newer than the one the
    /// local change was based on.
    #[must_use]
    pub fn detect(pending: &PendingChange, remote: &RemoteRecord) -> Option<Self> {
        (remote.revision > pending.base_revision).then(|| Self {
            pending: pending.clone(),
            remote: remote.clone(),
        })
    }
}

/// What happens to the pending change after resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Its effect is fully represented in the resolved record.
    Settled,
    /// The backend still lacks part of it; queue this change instead.
    Requeue(PendingChange),
}

impl Outcome {
    /// Returns true for `Settled`.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled)
    }
}

/// The result of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The record's next local state.
    pub record: Record,
    /// Fate of the pending change.
    pub outcome: Outcome,
}

/// The field-level merge policy.
///
/// `resolve` is a pure function of its inputs and the local origin, so every
/// client reaches the same record for the same pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictResolver {
    local_origin: String,
}

impl ConflictResolver {
    /// Creates a resolver for the device `local_origin`.
    pub fn new(local_origin: impl Into<String>) -> Self {
        Self {
            local_origin: local_origin.into(),
        }
    }

    /// Returns the local origin.
    #[must_use]
    pub fn local_origin(&self) -> &str {
        &self.local_origin
    }

    /// Resolves a conflict.
    #[must_use]
    pub fn resolve(&self, conflict: &ConflictRecord) -> Resolution {
        let ConflictRecord { pending, remote } = conflict;

        if remote.deleted {
            return Resolution {
                record: remote.to_record(),
                outcome: Outcome::Settled,
            };
        }

        if pending.operation == Operation::Delete {
            let mut record = remote.to_record();
            record.deleted = true;
            record.updated_at = record.updated_at.max(pending.updated_at);
            let requeued = PendingChange {
                changed_fields: Fields::new(),
                base_fields: Fields::new(),
                base_revision: remote.revision,
                pushed: true,
                ..pending.clone()
            };
            return Resolution {
                record,
                outcome: Outcome::Requeue(requeued),
            };
        }

        let empty = Fields::new();
        let base = if pending.operation == Operation::Create {
            &empty
        } else {
            &pending.base_fields
        };
        let local_wins_overlap = self.local_wins_tie(pending, remote);

        let mut merged = remote.fields.clone();
        let mut won = Fields::new();
        for (name, local) in &pending.changed_fields {
            let remote_changed = value_or_null(remote.fields.get(name)) != value_or_null(base.get(name));
            if !remote_changed || local_wins_overlap {
                merged.insert(name.clone(), local.clone());
                won.insert(name.clone(), local.clone());
            }
        }

        let mut record = remote.to_record();
        record.fields = merged;
        if won.is_empty() {
            return Resolution {
                record,
                outcome: Outcome::Settled,
            };
        }

        record.updated_at = remote.updated_at.max(pending.updated_at);
        let base_fields = won
            .keys()
            .map(|name| (name.clone(), value_or_null(remote.fields.get(name)).clone()))
            .collect();
        let requeued = PendingChange {
            collection: pending.collection.clone(),
            record_id: pending.record_id.clone(),
            operation: Operation::Update,
            changed_fields: won,
            base_fields,
            local_sequence: pending.local_sequence,
            base_revision: remote.revision,
            updated_at: pending.updated_at,
            pushed: true,
        };
        Resolution {
            record,
            outcome: Outcome::Requeue(requeued),
        }
    }

    fn local_wins_tie(&self, pending: &PendingChange, remote: &RemoteRecord) -> bool {
        match pending.updated_at.cmp(&remote.updated_at) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal if remote.origin == self.local_origin => true,
            Ordering::Equal => {
                let local_key = format!("{}{}", pending.record_id, self.local_origin);
                let remote_key = format!("{}{}", remote.id, remote.origin);
                local_key > remote_key
            }
        }
    }
}

static NULL: FieldValue = FieldValue::Null;

fn value_or_null(value: Option<&FieldValue>) -> &FieldValue {
    value.unwrap_or(&NULL)
}
