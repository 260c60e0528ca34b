//! Change tracker: the durable queue of outbound local mutations.
//!
//! There is at most one [`PendingChange`] per `(collection, id)`. A new local
//! edit is folded into the existing entry:
//!
//! | queued | new edit | result |
//! |---|---|---|
//! | create | update | create with the merged snapshot |
//! | update | update | update with the union of fields, last value wins |
//! | create | delete | nothing, if the create never went out in a push |
//! | create | delete | delete, if the create was already pushed |
//! | update | delete | delete |
//!
//! Every folded entry takes the newly allocated sequence number.

use crate::types::{FieldValue, Fields, RecordKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// The record was created locally.
    Create,
    /// Some fields were changed locally.
    Update,
    /// The record was tombstoned locally.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One not-yet-acknowledged local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Collection of the record.
    pub collection: String,
    /// Id of the record.
    pub record_id: String,
    /// What happened locally.
    pub operation: Operation,
    /// Create: full snapshot. Update: changed fields. Delete: empty.
    pub changed_fields: Fields,
    /// Values of the changed fields before the first local edit of them.
    ///
    /// Lets the resolver tell which fields the remote side changed.
    pub base_fields: Fields,
    /// Position in the outbound queue.
    pub local_sequence: u64,
    /// Backend revision the edit was made against, `0` for none.
    pub base_revision: u64,
    /// Wall-clock time of the latest folded edit.
    pub updated_at: i64,
    /// Whether an earlier version of this entry was handed to a push.
    ///
    /// Survives coalescing, so a create that may already exist on the
    /// backend is never cancelled by a later local delete.
    #[serde(default)]
    pub pushed: bool,
}

impl PendingChange {
    /// Returns the `(collection, id)` identity.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.record_id.clone())
    }

    /// Returns true for a pending delete.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete
    }
}

/// Sequence allocator and push high-water mark, persisted with the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxState {
    /// Last allocated local sequence.
    pub last_sequence: u64,
    /// Highest sequence ever handed to a push.
    pub sent_through: u64,
}

impl OutboxState {
    /// Allocates the next sequence.
    pub(crate) fn allocate(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }
}

/// A local mutation about to be enqueued.
#[derive(Debug, Clone)]
pub(crate) struct LocalEdit {
    pub key: RecordKey,
    pub operation: Operation,
    pub changed: Fields,
    /// Pre-edit values of `changed`, `Null` where absent.
    pub before: Fields,
    pub base_revision: u64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Coalesced {
    Queue(PendingChange),
    Cancel,
}

/// Folds `edit` into the queued entry for the same record.
pub(crate) fn coalesce(
    existing: Option<&PendingChange>,
    edit: LocalEdit,
    sequence: u64,
    sent_through: u64,
) -> Coalesced {
    let LocalEdit {
        key,
        operation,
        changed,
        before,
        base_revision,
        updated_at,
    } = edit;

    let fresh = |operation, changed_fields, base_fields, base_revision| {
        Coalesced::Queue(PendingChange {
            collection: key.collection.clone(),
            record_id: key.id.clone(),
            operation,
            changed_fields,
            base_fields,
            local_sequence: sequence,
            base_revision,
            updated_at,
            pushed: false,
        })
    };

    let Some(existing) = existing else {
        let base = if operation == Operation::Update {
            before
        } else {
            Fields::new()
        };
        let changed = if operation == Operation::Delete {
            Fields::new()
        } else {
            changed
        };
        return fresh(operation, changed, base, base_revision);
    };

    let pushed = existing.pushed || existing.local_sequence <= sent_through;
    let folded = match (existing.operation, operation) {
        (Operation::Create, Operation::Update) => {
            let mut merged = existing.changed_fields.clone();
            merged.extend(changed);
            fresh(
                Operation::Create,
                merged,
                Fields::new(),
                existing.base_revision,
            )
        }
        (Operation::Update, Operation::Update) => {
            let mut merged = existing.changed_fields.clone();
            merged.extend(changed);
            let mut base = existing.base_fields.clone();
            for (name, value) in before {
                base.entry(name).or_insert(value);
            }
            fresh(Operation::Update, merged, base, existing.base_revision)
        }
        (Operation::Create, Operation::Delete) if !pushed => return Coalesced::Cancel,
        (_, Operation::Delete) => fresh(
            Operation::Delete,
            Fields::new(),
            Fields::new(),
            existing.base_revision,
        ),
        // A create over a queued entry, or an edit after a queued delete,
        // is refused by the store before it gets here.
        (_, _) => fresh(operation, changed, before, base_revision),
    };

    match folded {
        Coalesced::Queue(mut change) => {
            change.pushed = pushed;
            Coalesced::Queue(change)
        }
        Coalesced::Cancel => Coalesced::Cancel,
    }
}

/// Rebases a live entry after an older push of the same record was acked.
///
/// The backend now holds `sent`'s values at `revision`; the live entry keeps
/// its newer edits and is re-sent against that revision.
pub(crate) fn rebase_after_ack(
    live: &PendingChange,
    sent: &PendingChange,
    revision: u64,
) -> PendingChange {
    let mut rebased = live.clone();
    rebased.base_revision = revision;
    rebased.pushed = true;

    match live.operation {
        Operation::Create | Operation::Update => {
            let had_create = live.operation == Operation::Create;
            rebased.operation = Operation::Update;
            rebased.base_fields = live
                .changed_fields
                .keys()
                .map(|name| {
                    let base = sent
                        .changed_fields
                        .get(name)
                        .or_else(|| (!had_create).then(|| live.base_fields.get(name)).flatten())
                        .cloned()
                        .unwrap_or(FieldValue::Null);
                    (name.clone(), base)
                })
                .collect();
        }
        Operation::Delete => {}
    }

    rebased
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), FieldValue::from(*v)))
            .collect()
    }

    fn edit(operation: Operation, changed: Fields, before: Fields) -> LocalEdit {
        LocalEdit {
            key: RecordKey::new("plants", "plant-1"),
            operation,
            changed,
            before,
            base_revision: 0,
            updated_at: 100,
        }
    }

    fn queued(result: Coalesced) -> PendingChange {
        match result {
            Coalesced::Queue(change) => change,
            Coalesced::Cancel => panic!("expected a queued change"),
        }
    }

    #[test]
    fn create_then_update_stays_create() {
        let create = queued(coalesce(
            None,
            edit(Operation::Create, fields(&[("name", "A")]), Fields::new()),
            1,
            0,
        ));
        let merged = queued(coalesce(
            Some(&create),
            edit(
                Operation::Update,
                fields(&[("name", "B")]),
                fields(&[("name", "A")]),
            ),
            2,
            0,
        ));

        assert_eq!(merged.operation, Operation::Create);
        assert_eq!(merged.changed_fields, fields(&[("name", "B")]));
        assert_eq!(merged.local_sequence, 2);
        assert!(merged.base_fields.is_empty());
    }

    #[test]
    fn update_union_keeps_earliest_base() {
        let first = queued(coalesce(
            None,
            edit(
                Operation::Update,
                fields(&[("name", "B")]),
                fields(&[("name", "A")]),
            ),
            1,
            0,
        ));
        let second = queued(coalesce(
            Some(&first),
            edit(
                Operation::Update,
                fields(&[("name", "C"), ("notes", "n")]),
                fields(&[("name", "B"), ("notes", "")]),
            ),
            2,
            0,
        ));

        assert_eq!(second.changed_fields, fields(&[("name", "C"), ("notes", "n")]));
        assert_eq!(second.base_fields, fields(&[("name", "A"), ("notes", "")]));
    }

    #[test]
    fn create_then_delete_cancels_unless_sent() {
        let create = queued(coalesce(
            None,
            edit(Operation::Create, fields(&[("name", "A")]), Fields::new()),
            1,
            0,
        ));
        let delete = edit(Operation::Delete, Fields::new(), Fields::new());

        assert_eq!(
            coalesce(Some(&create), delete.clone(), 2, 0),
            Coalesced::Cancel
        );

        let after_push = queued(coalesce(Some(&create), delete, 2, 1));
        assert_eq!(after_push.operation, Operation::Delete);
        assert!(after_push.changed_fields.is_empty());
    }

    #[test]
    fn pushed_create_survives_update_before_delete() {
        let create = queued(coalesce(
            None,
            edit(Operation::Create, fields(&[("name", "A")]), Fields::new()),
            1,
            0,
        ));
        assert!(!create.pushed);

        // Sequence 1 went out in a push whose reply never arrived.
        let renamed = queued(coalesce(
            Some(&create),
            edit(
                Operation::Update,
                fields(&[("name", "B")]),
                fields(&[("name", "A")]),
            ),
            2,
            1,
        ));
        assert_eq!(renamed.operation, Operation::Create);
        assert_eq!(renamed.local_sequence, 2);
        assert!(renamed.pushed);

        let deleted = queued(coalesce(
            Some(&renamed),
            edit(Operation::Delete, Fields::new(), Fields::new()),
            3,
            1,
        ));
        assert_eq!(deleted.operation, Operation::Delete);
        assert_eq!(deleted.local_sequence, 3);
        assert!(deleted.pushed);
    }

    #[test]
    fn unpushed_create_with_edits_still_cancels() {
        let create = queued(coalesce(
            None,
            edit(Operation::Create, fields(&[("name", "A")]), Fields::new()),
            1,
            0,
        ));
        let renamed = queued(coalesce(
            Some(&create),
            edit(
                Operation::Update,
                fields(&[("name", "B")]),
                fields(&[("name", "A")]),
            ),
            2,
            0,
        ));
        assert!(!renamed.pushed);
        assert_eq!(
            coalesce(
                Some(&renamed),
                edit(Operation::Delete, Fields::new(), Fields::new()),
                3,
                0,
            ),
            Coalesced::Cancel
        );
    }

    #[test]
    fn update_then_delete_is_delete() {
        let update = queued(coalesce(
            None,
            edit(
                Operation::Update,
                fields(&[("name", "B")]),
                fields(&[("name", "A")]),
            ),
            1,
            0,
        ));
        let delete = queued(coalesce(
            Some(&update),
            edit(Operation::Delete, Fields::new(), Fields::new()),
            2,
            0,
        ));
        assert_eq!(delete.operation, Operation::Delete);
        assert_eq!(delete.local_sequence, 2);
    }

    #[test]
    fn rebase_downgrades_create() {
        let sent = PendingChange {
            collection: "plants".into(),
            record_id: "plant-1".into(),
            operation: Operation::Create,
            changed_fields: fields(&[("name", "A")]),
            base_fields: Fields::new(),
            local_sequence: 1,
            base_revision: 0,
            updated_at: 100,
            pushed: true,
        };
        let mut live = sent.clone();
        live.changed_fields = fields(&[("name", "B"), ("notes", "x")]);
        live.local_sequence = 2;

        let rebased = rebase_after_ack(&live, &sent, 7);
        assert_eq!(rebased.operation, Operation::Update);
        assert_eq!(rebased.base_revision, 7);
        assert_eq!(rebased.local_sequence, 2);
        assert_eq!(rebased.base_fields.get("name"), Some(&FieldValue::from("A")));
        assert_eq!(rebased.base_fields.get("notes"), Some(&FieldValue::Null));
    }

    #[test]
    fn outbox_allocates_gapless() {
        let mut outbox = OutboxState::default();
        assert_eq!(outbox.allocate(), 1);
        assert_eq!(outbox.allocate(), 2);
        assert_eq!(outbox.last_sequence, 2);
    }
}
