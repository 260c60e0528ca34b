//! Change feed for observing committed writes.
//!
//! Every commit emits one [`ChangeEvent`] per touched record, after the
//! commit is durable and visible to readers. Events carry their
//! [`ChangeOrigin`], so consumers such as a reminder scheduler can react to
//! records that arrived through sync without seeing their own writes twice.
//!
//! ```rust,ignore
//! let events = db.subscribe_changes();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         if event.origin == ChangeOrigin::Sync && event.collection == "tasks" {
//!             schedule_reminder(&event.id);
//!         }
//!     }
//! });
//! ```

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Type of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The record did not exist before.
    Created,
    /// The record changed.
    Updated,
    /// The record was tombstoned.
    Deleted,
}

/// Where a committed write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A local `write` transaction.
    Local,
    /// State applied by the sync engine.
    Sync,
}

/// A single committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Commit sequence the change belongs to.
    pub sequence: u64,
    /// Collection of the record.
    pub collection: String,
    /// Id of the record.
    pub id: String,
    /// Type of change.
    pub kind: ChangeKind,
    /// Origin of the change.
    pub origin: ChangeOrigin,
}

/// Distributes committed changes to subscribers.
#[derive(Debug, Default)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
}

impl ChangeFeed {
    /// Creates a new change feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    ///
    /// The receiver should be drained regularly; events are buffered without
    /// bound.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits the events of one commit, dropping disconnected subscribers.
    pub fn emit_batch(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| events.iter().all(|e| tx.send(e.clone()).is_ok()));
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Disconnects every subscriber.
    pub fn close(&self) {
        self.subscribers.write().clear();
    }
}
