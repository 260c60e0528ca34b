//! Committed in-memory state rebuilt from the journal.

use crate::checkpoint::SyncCheckpoint;
use crate::journal::{JournalOp, Snapshot};
use crate::record::Record;
use crate::tracker::{OutboxState, PendingChange};
use crate::types::RecordKey;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub records: BTreeMap<RecordKey, Record>,
    pub pending: BTreeMap<RecordKey, PendingChange>,
    pub outbox: OutboxState,
    pub checkpoint: SyncCheckpoint,
    /// Number of commits applied since the journal was last compacted.
    pub commit_sequence: u64,
}

impl StoreState {
    pub fn apply(&mut self, op: JournalOp) {
        match op {
            JournalOp::PutRecord(record) => {
                self.records.insert(record.key(), record);
            }
            JournalOp::PutPending(change) => {
                self.pending.insert(change.key(), change);
            }
            JournalOp::RemovePending(key) => {
                self.pending.remove(&key);
            }
            JournalOp::SetOutbox(outbox) => self.outbox = outbox,
            JournalOp::SetCheckpoint(checkpoint) => self.checkpoint = checkpoint,
        }
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            records: snapshot
                .records
                .into_iter()
                .map(|r| (r.key(), r))
                .collect(),
            pending: snapshot
                .pending
                .into_iter()
                .map(|p| (p.key(), p))
                .collect(),
            outbox: snapshot.outbox,
            checkpoint: snapshot.checkpoint,
            commit_sequence: 0,
        }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            records: self.records.values().cloned().collect(),
            pending: self.pending.values().cloned().collect(),
            outbox: self.outbox,
            checkpoint: self.checkpoint.clone(),
        }
    }

    /// Pending changes in `local_sequence` order.
    pub fn pending_ordered(&self, collection: Option<&str>) -> Vec<PendingChange> {
        let mut pending: Vec<_> = self
            .pending
            .values()
            .filter(|p| collection.map_or(true, |c| p.collection == c))
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.local_sequence);
        pending
    }

    /// Records of one collection in id order.
    pub fn collection<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        let start = RecordKey::new(collection, "");
        self.records
            .range(start..)
            .take_while(move |(key, _)| key.collection == collection)
            .map(|(_, record)| record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Operation;
    use crate::types::Fields;

    fn pending(collection: &str, id: &str, seq: u64) -> PendingChange {
        PendingChange {
            collection: collection.into(),
            record_id: id.into(),
            operation: Operation::Update,
            changed_fields: Fields::new(),
            base_fields: Fields::new(),
            local_sequence: seq,
            base_revision: 0,
            updated_at: 0,
            pushed: false,
        }
    }

    #[test]
    fn pending_is_sequence_ordered() {
        let mut state = StoreState::default();
        state.apply(JournalOp::PutPending(pending("tasks", "a", 3)));
        state.apply(JournalOp::PutPending(pending("plants", "z", 1)));
        state.apply(JournalOp::PutPending(pending("plants", "b", 2)));

        let seqs: Vec<_> = state
            .pending_ordered(None)
            .iter()
            .map(|p| p.local_sequence)
            .collect();
        assert_eq!(seqs, [1, 2, 3]);
        assert_eq!(state.pending_ordered(Some("plants")).len(), 2);

        state.apply(JournalOp::RemovePending(RecordKey::new("plants", "z")));
        assert_eq!(state.pending.len(), 2);
    }

    #[test]
    fn collection_range() {
        let mut state = StoreState::default();
        for (c, id) in [("plants", "a"), ("plants", "b"), ("posts", "a"), ("tasks", "a")] {
            state.apply(JournalOp::PutRecord(Record::new(c, id, Fields::new(), 0)));
        }
        assert_eq!(state.collection("plants").count(), 2);
        assert_eq!(state.collection("posts").count(), 1);
        assert_eq!(state.collection("diary_entries").count(), 0);
    }
}
