//! Property-based test generators using proptest.
//!
//! Workloads draw record ids from a small pool so that creates, edits and
//! deletes collide often enough to exercise change coalescing.

use crate::fixtures::{plant, task};
use proptest::prelude::*;
use verdant_core::{CoreResult, Database, FieldValue, Fields};

/// One local mutation, committed as its own transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalOp {
    /// Create a plant.
    CreatePlant {
        /// Record id.
        id: String,
        /// Plant name.
        name: String,
    },
    /// Rename a plant.
    RenamePlant {
        /// Record id.
        id: String,
        /// New name.
        name: String,
    },
    /// Create a task.
    CreateTask {
        /// Record id.
        id: String,
        /// Task title.
        title: String,
    },
    /// Mark a task done or not done.
    SetTaskDone {
        /// Record id.
        id: String,
        /// New state.
        done: bool,
    },
    /// Delete a record.
    Delete {
        /// Collection name.
        collection: String,
        /// Record id.
        id: String,
    },
}

impl LocalOp {
    /// Commits the operation.
    ///
    /// Operations that make no sense for the current state (editing a
    /// missing record, creating one twice) fail without writing anything.
    pub fn apply(&self, db: &Database) -> CoreResult<()> {
        db.write(|txn| match self {
            Self::CreatePlant { id, name } => txn.create_with_id("plants", id, plant(name)).map(|_| ()),
            Self::RenamePlant { id, name } => txn.update("plants", id, plant(name)).map(|_| ()),
            Self::CreateTask { id, title } => txn.create_with_id("tasks", id, task(title)).map(|_| ()),
            Self::SetTaskDone { id, done } => {
                let changes = Fields::from([("done".to_string(), FieldValue::from(*done))]);
                txn.update("tasks", id, changes).map(|_| ())
            }
            Self::Delete { collection, id } => txn.delete(collection, id),
        })
    }
}

/// Strategy for ids from a pool of four.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    (0..4u8).prop_map(|n| format!("r{n}"))
}

/// Strategy for short display names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,8}").expect("Invalid regex")
}

/// Strategy for a single local mutation.
pub fn local_op_strategy() -> impl Strategy<Value = LocalOp> {
    prop_oneof![
        3 => (record_id_strategy(), name_strategy())
            .prop_map(|(id, name)| LocalOp::CreatePlant { id, name }),
        3 => (record_id_strategy(), name_strategy())
            .prop_map(|(id, name)| LocalOp::RenamePlant { id, name }),
        2 => (record_id_strategy(), name_strategy())
            .prop_map(|(id, title)| LocalOp::CreateTask { id, title }),
        2 => (record_id_strategy(), any::<bool>())
            .prop_map(|(id, done)| LocalOp::SetTaskDone { id, done }),
        2 => (prop_oneof![Just("plants"), Just("tasks")], record_id_strategy())
            .prop_map(|(collection, id)| LocalOp::Delete {
                collection: collection.to_string(),
                id,
            }),
    ]
}

/// Strategy for a workload of `1..max` mutations.
pub fn workload_strategy(max: usize) -> impl Strategy<Value = Vec<LocalOp>> {
    prop::collection::vec(local_op_strategy(), 1..max)
}
