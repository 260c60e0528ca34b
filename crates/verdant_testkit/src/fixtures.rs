//! Store fixtures and snapshot helpers.

use crate::crash::{CrashControl, CrashableBackend};
use std::sync::Arc;
use verdant_core::{
    Config, Database, FieldValue, Fields, ManualClock, PendingChange, Record, SyncCheckpoint,
};
use verdant_storage::InMemoryBackend;

/// Fixed start time of fixture clocks, in milliseconds.
pub const FIXTURE_EPOCH: i64 = 1_700_000_000_000;

/// A store over an in-memory journal that outlives it.
pub struct TestStore {
    /// The open store.
    pub db: Database,
    /// The journal bytes, shared with `db`.
    pub disk: InMemoryBackend,
    /// The store's clock.
    pub clock: Arc<ManualClock>,
}

impl TestStore {
    /// Opens an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::over(InMemoryBackend::new(), Arc::new(ManualClock::new(FIXTURE_EPOCH)))
    }

    fn over(disk: InMemoryBackend, clock: Arc<ManualClock>) -> Self {
        let db = Database::open_with_backend(Box::new(disk.clone()), config(&clock))
            .expect("open store over in-memory journal");
        Self { db, disk, clock }
    }

    /// Closes this store and opens a new one over the surviving bytes.
    #[must_use]
    pub fn reopen(self) -> Self {
        let Self { db, disk, clock } = self;
        drop(db);
        Self::over(disk, clock)
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A store whose journal can be made to crash.
pub struct CrashingStore {
    /// The open store.
    pub db: Database,
    /// The bytes that survive the crash.
    pub disk: InMemoryBackend,
    /// Crash switches for the store's backend.
    pub control: CrashControl,
    /// The store's clock.
    pub clock: Arc<ManualClock>,
}

impl CrashingStore {
    /// Opens an empty crashable store.
    #[must_use]
    pub fn new() -> Self {
        let disk = InMemoryBackend::new();
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH));
        let backend = CrashableBackend::new(Box::new(disk.clone()));
        let control = backend.control();
        let db = Database::open_with_backend(Box::new(backend), config(&clock))
            .expect("open crashable store");
        Self {
            db,
            disk,
            control,
            clock,
        }
    }

    /// Drops the crashed store and recovers a new one from the surviving bytes.
    #[must_use]
    pub fn recover(self) -> TestStore {
        let Self { db, disk, clock, .. } = self;
        drop(db);
        TestStore::over(disk, clock)
    }
}

impl Default for CrashingStore {
    fn default() -> Self {
        Self::new()
    }
}

fn config(clock: &Arc<ManualClock>) -> Config {
    Config::new().with_clock(Arc::clone(clock) as Arc<dyn verdant_core::Clock>)
}

/// Everything a store persists, in a comparable form.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    /// All records of every collection, tombstones included.
    pub records: Vec<Record>,
    /// The outbound queue in sequence order.
    pub pending: Vec<PendingChange>,
    /// The sync checkpoint.
    pub checkpoint: SyncCheckpoint,
}

impl StoreSnapshot {
    /// Captures the store's current contents.
    #[must_use]
    pub fn capture(db: &Database) -> Self {
        let mut records = Vec::new();
        for collection in db.schema().collection_names() {
            records.extend(db.records(collection).expect("read records"));
        }
        records.sort_by(|a, b| (&a.collection, &a.id).cmp(&(&b.collection, &b.id)));

        Self {
            records,
            pending: db.drain_pending(None).expect("read pending"),
            checkpoint: db.checkpoint().expect("read checkpoint"),
        }
    }

    /// Returns the record with the given identity.
    #[must_use]
    pub fn record(&self, collection: &str, id: &str) -> Option<&Record> {
        self.records
            .iter()
            .find(|r| r.collection == collection && r.id == id)
    }

    /// Returns the pending change for the given identity.
    #[must_use]
    pub fn pending_for(&self, collection: &str, id: &str) -> Option<&PendingChange> {
        self.pending
            .iter()
            .find(|p| p.collection == collection && p.record_id == id)
    }
}

/// Fields for a plant with just a name.
#[must_use]
pub fn plant(name: &str) -> Fields {
    Fields::from([("name".to_string(), FieldValue::from(name))])
}

/// Fields for a task with just a title.
#[must_use]
pub fn task(title: &str) -> Fields {
    Fields::from([("title".to_string(), FieldValue::from(title))])
}
