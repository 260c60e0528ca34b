//! Write transactions.
//!
//! A transaction stages its writes on top of the committed state. Nothing is
//! visible to readers, and nothing reaches the journal, until the closure
//! passed to [`Database::write`](crate::Database::write) or
//! [`Database::reconcile`](crate::Database::reconcile) returns `Ok`.

use crate::change_feed::ChangeKind;
use crate::checkpoint::SyncCheckpoint;
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::journal::JournalOp;
use crate::models::Document;
use crate::record::Record;
use crate::schema::Schema;
use crate::state::StoreState;
use crate::tracker::{self, Coalesced, LocalEdit, Operation, OutboxState, PendingChange};
use crate::types::{FieldValue, Fields, RecordKey};
use std::collections::BTreeMap;

/// Writes staged by a transaction, ready to commit.
#[derive(Debug, Default)]
pub(crate) struct StagedCommit {
    pub ops: Vec<JournalOp>,
    pub changes: Vec<(RecordKey, ChangeKind)>,
}

struct Staging<'a> {
    base: &'a StoreState,
    records: BTreeMap<RecordKey, Record>,
    pending: BTreeMap<RecordKey, Option<PendingChange>>,
    outbox: OutboxState,
    checkpoint: Option<SyncCheckpoint>,
    changes: Vec<(RecordKey, ChangeKind)>,
}

impl<'a> Staging<'a> {
    fn new(base: &'a StoreState) -> Self {
        Self {
            base,
            records: BTreeMap::new(),
            pending: BTreeMap::new(),
            outbox: base.outbox,
            checkpoint: None,
            changes: Vec::new(),
        }
    }

    fn record(&self, key: &RecordKey) -> Option<&Record> {
        self.records.get(key).or_else(|| self.base.records.get(key))
    }

    fn pending(&self, key: &RecordKey) -> Option<&PendingChange> {
        match self.pending.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.base.pending.get(key),
        }
    }

    fn put_record(&mut self, record: Record, kind: ChangeKind) {
        let key = record.key();
        self.changes.push((key.clone(), kind));
        self.records.insert(key, record);
    }

    fn put_pending(&mut self, change: PendingChange) {
        self.pending.insert(change.key(), Some(change));
    }

    fn remove_pending(&mut self, key: &RecordKey) {
        self.pending.insert(key.clone(), None);
    }

    fn into_commit(self) -> StagedCommit {
        let mut ops: Vec<JournalOp> = self
            .records
            .into_values()
            .map(JournalOp::PutRecord)
            .collect();

        for (key, staged) in self.pending {
            match staged {
                Some(change) => ops.push(JournalOp::PutPending(change)),
                None if self.base.pending.contains_key(&key) => {
                    ops.push(JournalOp::RemovePending(key));
                }
                None => {}
            }
        }
        if self.outbox != self.base.outbox {
            ops.push(JournalOp::SetOutbox(self.outbox));
        }
        if let Some(checkpoint) = self.checkpoint {
            ops.push(JournalOp::SetCheckpoint(checkpoint));
        }

        StagedCommit {
            ops,
            changes: self.changes,
        }
    }
}

/// A local-origin transaction.
///
/// Every mutation validates against the schema and enqueues a pending change
/// in the same commit.
pub struct WriteTxn<'a> {
    staging: Staging<'a>,
    schema: &'a Schema,
    clock: &'a dyn Clock,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(base: &'a StoreState, schema: &'a Schema, clock: &'a dyn Clock) -> Self {
        Self {
            staging: Staging::new(base),
            schema,
            clock,
        }
    }

    pub(crate) fn into_commit(self) -> StagedCommit {
        self.staging.into_commit()
    }

    /// Returns a live record, including this transaction's own writes.
    #[must_use]
    pub fn get(&self, collection: &str, id: &str) -> Option<&Record> {
        self.staging
            .record(&RecordKey::new(collection, id))
            .filter(|r| r.is_live())
    }

    /// Creates a record with a generated id.
    pub fn create(&mut self, collection: &str, fields: Fields) -> CoreResult<Record> {
        let id = uuid::Uuid::new_v4().to_string();
        self.create_with_id(collection, &id, fields)
    }

    /// Creates a record with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the id is taken, including by a tombstone.
    pub fn create_with_id(
        &mut self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> CoreResult<Record> {
        self.schema.collection(collection)?.validate_create(&fields)?;

        let key = RecordKey::new(collection, id);
        if self.staging.record(&key).is_some() {
            return Err(CoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        let now = self.clock.now_millis();
        let record = Record::new(collection, id, fields.clone(), now);
        self.staging.put_record(record.clone(), ChangeKind::Created);
        self.enqueue(LocalEdit {
            key,
            operation: Operation::Create,
            changed: fields,
            before: Fields::new(),
            base_revision: 0,
            updated_at: now,
        });
        Ok(record)
    }

    /// Changes some fields of a live record.
    ///
    /// # Errors
    ///
    /// `NotFound` if the record is missing or deleted.
    pub fn update(&mut self, collection: &str, id: &str, changes: Fields) -> CoreResult<Record> {
        self.schema.collection(collection)?.validate_update(&changes)?;

        let key = RecordKey::new(collection, id);
        let mut record = self
            .get(collection, id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(collection, id))?;

        let before = changes
            .keys()
            .map(|name| {
                let old = record.fields.get(name).cloned().unwrap_or(FieldValue::Null);
                (name.clone(), old)
            })
            .collect();

        let now = self.clock.now_millis();
        record.fields.extend(changes.clone());
        record.updated_at = now;
        let base_revision = record.revision;
        self.staging.put_record(record.clone(), ChangeKind::Updated);
        self.enqueue(LocalEdit {
            key,
            operation: Operation::Update,
            changed: changes,
            before,
            base_revision,
            updated_at: now,
        });
        Ok(record)
    }

    /// Tombstones a live record.
    ///
    /// # Errors
    ///
    /// `NotFound` if the record is missing or already deleted.
    pub fn delete(&mut self, collection: &str, id: &str) -> CoreResult<()> {
        let key = RecordKey::new(collection, id);
        let mut record = self
            .get(collection, id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(collection, id))?;

        let now = self.clock.now_millis();
        record.deleted = true;
        record.updated_at = now;
        let base_revision = record.revision;
        self.staging.put_record(record, ChangeKind::Deleted);
        self.enqueue(LocalEdit {
            key,
            operation: Operation::Delete,
            changed: Fields::new(),
            before: Fields::new(),
            base_revision,
            updated_at: now,
        });
        Ok(())
    }

    /// Creates a typed document and returns its id.
    pub fn create_doc<D: Document>(&mut self, doc: &D) -> CoreResult<String> {
        Ok(self.create(D::COLLECTION, doc.to_fields())?.id)
    }

    /// Overwrites the fields of a typed document.
    pub fn update_doc<D: Document>(&mut self, id: &str, doc: &D) -> CoreResult<()> {
        self.update(D::COLLECTION, id, doc.to_fields())?;
        Ok(())
    }

    fn enqueue(&mut self, edit: LocalEdit) {
        let key = edit.key.clone();
        let sequence = self.staging.outbox.allocate();
        let existing = self.staging.pending(&key).cloned();

        match tracker::coalesce(
            existing.as_ref(),
            edit,
            sequence,
            self.staging.outbox.sent_through,
        ) {
            Coalesced::Queue(change) => self.staging.put_pending(change),
            Coalesced::Cancel => self.staging.remove_pending(&key),
        }
    }
}

/// A sync-origin transaction.
///
/// Writes made here never enqueue pending changes. Used by the sync engine
/// to apply remote state, settle acknowledged changes and move the
/// checkpoint in one atomic commit.
pub struct ReconcileTxn<'a> {
    staging: Staging<'a>,
}

impl<'a> ReconcileTxn<'a> {
    pub(crate) fn new(base: &'a StoreState) -> Self {
        Self {
            staging: Staging::new(base),
        }
    }

    pub(crate) fn into_commit(self) -> StagedCommit {
        self.staging.into_commit()
    }

    /// Returns a record, tombstones included.
    #[must_use]
    pub fn record(&self, collection: &str, id: &str) -> Option<&Record> {
        self.staging.record(&RecordKey::new(collection, id))
    }

    /// Returns the live pending change for a record.
    #[must_use]
    pub fn pending(&self, collection: &str, id: &str) -> Option<&PendingChange> {
        self.staging.pending(&RecordKey::new(collection, id))
    }

    /// Writes remote state as-is.
    ///
    /// Returns false, writing nothing, if the local copy already carries a
    /// newer revision.
    pub fn apply_remote(&mut self, record: Record) -> bool {
        let kind = match self.staging.record(&record.key()) {
            Some(existing) if existing.revision > record.revision => return false,
            Some(_) if record.deleted => ChangeKind::Deleted,
            Some(_) => ChangeKind::Updated,
            None if record.deleted => ChangeKind::Deleted,
            None => ChangeKind::Created,
        };
        self.staging.put_record(record, kind);
        true
    }

    /// Settles a pushed change the backend applied at `revision`.
    ///
    /// If the record was edited again after `sent` was snapshotted, the newer
    /// entry stays queued, rebased onto `revision`.
    pub fn acknowledge(&mut self, sent: &PendingChange, revision: u64) {
        let key = sent.key();

        match self.staging.pending(&key).cloned() {
            Some(live) if live.local_sequence == sent.local_sequence => {
                self.staging.remove_pending(&key);
            }
            Some(live) if live.local_sequence > sent.local_sequence => {
                let rebased = tracker::rebase_after_ack(&live, sent, revision);
                self.staging.put_pending(rebased);
            }
            _ => {}
        }

        if let Some(record) = self.staging.record(&key) {
            if record.revision < revision {
                let mut record = record.clone();
                record.revision = revision;
                self.staging.put_record(record, ChangeKind::Updated);
            }
        }
    }

    /// Queues `change` again under a fresh sequence; returns the sequence.
    pub fn requeue(&mut self, mut change: PendingChange) -> u64 {
        change.local_sequence = self.staging.outbox.allocate();
        change.pushed = true;
        let sequence = change.local_sequence;
        self.staging.put_pending(change);
        sequence
    }

    /// Drops the pending change for a record.
    pub fn discard(&mut self, collection: &str, id: &str) {
        let key = RecordKey::new(collection, id);
        if self.staging.pending(&key).is_some() {
            self.staging.remove_pending(&key);
        }
    }

    /// Replaces the sync checkpoint.
    pub fn set_checkpoint(&mut self, checkpoint: SyncCheckpoint) {
        self.staging.checkpoint = Some(checkpoint);
    }
}
