//! Store facade.

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeOrigin};
use crate::checkpoint::SyncCheckpoint;
use crate::clock::Clock;
use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::journal::{Journal, JournalOp, VerifyReport};
use crate::live::{LiveQuery, Notifier, Query};
use crate::models::{Document, Stored};
use crate::record::Record;
use crate::schema::Schema;
use crate::state::StoreState;
use crate::tracker::{OutboxState, PendingChange};
use crate::txn::{ReconcileTxn, StagedCommit, WriteTxn};
use crate::types::RecordKey;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use verdant_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// Per-collection record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionCounts {
    /// Live records.
    pub live: usize,
    /// Tombstones.
    pub deleted: usize,
}

/// Store statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Record counts keyed by collection.
    pub collections: BTreeMap<String, CollectionCounts>,
    /// Queued outbound changes.
    pub pending: usize,
    /// Outbox counters.
    pub outbox: OutboxState,
    /// Commits since the journal was last compacted.
    pub commits: u64,
    /// Journal size in bytes.
    pub journal_bytes: u64,
}

/// The local store.
///
/// Holds domain records, the outbound change queue and the sync checkpoint
/// in a single journal. All three change together or not at all.
///
/// # Example
///
/// ```rust,ignore
/// use verdant_core::{Database, Fields, Query};
///
/// let db = Database::open_in_memory()?;
/// let mut plants = db.query(Query::new("plants"))?;
///
/// db.write(|txn| {
///     txn.create("plants", Fields::from([("name".into(), "Fern".into())]))
/// })?;
///
/// plants.recv();
/// assert_eq!(plants.current().len(), 1);
/// assert_eq!(db.drain_pending(None)?.len(), 1);
/// ```
///
/// Writes are serialised. A `write` closure must not call back into
/// `write` or `reconcile` on the same store.
pub struct Database {
    config: Config,
    state: Arc<RwLock<StoreState>>,
    writer: Mutex<Journal>,
    feed: ChangeFeed,
    notifier: Notifier,
    closed: AtomicBool,
    _dir: Option<StoreDir>,
}

impl Database {
    /// Opens or creates the store at `path`.
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let journal_path = dir.journal_path();
        let backend = FileBackend::open(&journal_path)?;
        info!(path = %path.display(), "opening store");
        Self::assemble(Box::new(backend), Some(journal_path), Some(dir), config)
    }

    /// Opens an empty in-memory store with default configuration.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with(Config::default())
    }

    /// Opens an empty in-memory store.
    pub fn open_in_memory_with(config: Config) -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), config)
    }

    /// Opens a store over an arbitrary backend, replaying what it holds.
    pub fn open_with_backend(backend: Box<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        Self::assemble(backend, None, None, config)
    }

    fn assemble(
        backend: Box<dyn StorageBackend>,
        journal_path: Option<std::path::PathBuf>,
        dir: Option<StoreDir>,
        config: Config,
    ) -> CoreResult<Self> {
        let (journal, state, report) = Journal::open(backend, journal_path, config.sync_on_commit)?;
        if !report.is_clean() {
            info!(?report.tail, "recovered store after interrupted write");
        }

        let state = Arc::new(RwLock::new(state));
        let notifier = Notifier::spawn(Arc::clone(&state))?;

        Ok(Self {
            config,
            state,
            writer: Mutex::new(journal),
            feed: ChangeFeed::new(),
            notifier,
            closed: AtomicBool::new(false),
            _dir: dir,
        })
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CoreError::DatabaseClosed)
        } else {
            Ok(())
        }
    }

    /// Runs `f` in a local write transaction.
    ///
    /// Record writes and their pending changes commit atomically when `f`
    /// returns `Ok`. If `f` returns `Err`, or the commit fails, nothing is
    /// written.
    pub fn write<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> CoreResult<T>,
    {
        self.ensure_open()?;
        let mut journal = self.writer.lock();
        let (value, staged) = {
            let state = self.state.read();
            let mut txn = WriteTxn::new(&state, &self.config.schema, self.config.clock.as_ref());
            let value = f(&mut txn)?;
            (value, txn.into_commit())
        };
        self.commit(&mut journal, staged, ChangeOrigin::Local)?;
        Ok(value)
    }

    /// Runs `f` in a sync-origin transaction.
    ///
    /// Only the sync engine should call this: writes made here bypass the
    /// change tracker.
    pub fn reconcile<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut ReconcileTxn<'_>) -> CoreResult<T>,
    {
        self.ensure_open()?;
        let mut journal = self.writer.lock();
        let (value, staged) = {
            let state = self.state.read();
            let mut txn = ReconcileTxn::new(&state);
            let value = f(&mut txn)?;
            (value, txn.into_commit())
        };
        self.commit(&mut journal, staged, ChangeOrigin::Sync)?;
        Ok(value)
    }

    fn commit(&self, journal: &mut Journal, staged: StagedCommit, origin: ChangeOrigin) -> CoreResult<()> {
        if staged.ops.is_empty() {
            return Ok(());
        }

        journal.append(&staged.ops)?;

        let sequence = {
            let mut state = self.state.write();
            for op in staged.ops {
                state.apply(op);
            }
            state.commit_sequence += 1;
            state.commit_sequence
        };
        debug!(sequence, ?origin, changes = staged.changes.len(), "committed");

        let mut touched = BTreeSet::new();
        let events: Vec<_> = staged
            .changes
            .into_iter()
            .map(|(key, kind)| {
                touched.insert(key.collection.clone());
                ChangeEvent {
                    sequence,
                    collection: key.collection,
                    id: key.id,
                    kind,
                    origin,
                }
            })
            .collect();
        self.feed.emit_batch(&events);
        self.notifier.committed(touched);
        Ok(())
    }

    /// Returns a live record.
    ///
    /// # Errors
    ///
    /// `NotFound` if the record is missing or deleted.
    pub fn find(&self, collection: &str, id: &str) -> CoreResult<Record> {
        self.ensure_open()?;
        self.state
            .read()
            .records
            .get(&RecordKey::new(collection, id))
            .filter(|r| r.is_live())
            .cloned()
            .ok_or_else(|| CoreError::not_found(collection, id))
    }

    /// Returns a record, tombstones included.
    pub fn find_any(&self, collection: &str, id: &str) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .records
            .get(&RecordKey::new(collection, id))
            .cloned())
    }

    /// Subscribes to a live result set.
    pub fn query(&self, query: Query) -> CoreResult<LiveQuery> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(self.notifier.subscribe(query, &state))
    }

    /// Evaluates a query once.
    pub fn query_once(&self, query: &Query) -> CoreResult<Vec<Record>> {
        self.ensure_open()?;
        Ok(query.evaluate(&self.state.read()))
    }

    /// Returns every record of a collection, tombstones included.
    pub fn records(&self, collection: &str) -> CoreResult<Vec<Record>> {
        self.ensure_open()?;
        Ok(self.state.read().collection(collection).cloned().collect())
    }

    /// Returns a typed document.
    pub fn find_doc<D: Document>(&self, id: &str) -> CoreResult<Stored<D>> {
        Stored::from_record(&self.find(D::COLLECTION, id)?)
    }

    /// Returns every live document of a type matching `filter`.
    pub fn query_docs<D: Document>(&self, filter: impl Fn(&D) -> bool) -> CoreResult<Vec<Stored<D>>> {
        let records = self.query_once(&Query::new(D::COLLECTION))?;
        let mut docs = Vec::new();
        for record in &records {
            let stored = Stored::<D>::from_record(record)?;
            if filter(&stored.doc) {
                docs.push(stored);
            }
        }
        Ok(docs)
    }

    /// Returns pending changes in `local_sequence` order.
    ///
    /// Entries stay queued until the sync engine acknowledges them.
    pub fn drain_pending(&self, collection: Option<&str>) -> CoreResult<Vec<PendingChange>> {
        self.ensure_open()?;
        Ok(self.state.read().pending_ordered(collection))
    }

    /// Returns the number of pending changes.
    pub fn pending_count(&self) -> CoreResult<usize> {
        self.ensure_open()?;
        Ok(self.state.read().pending.len())
    }

    /// Returns the outbox counters.
    pub fn outbox(&self) -> CoreResult<OutboxState> {
        self.ensure_open()?;
        Ok(self.state.read().outbox)
    }

    /// Records that every change up to `through` has been handed to a push.
    ///
    /// A create at or below this mark is no longer cancelled by a later
    /// local delete.
    pub fn mark_sent(&self, through: u64) -> CoreResult<()> {
        self.ensure_open()?;
        let mut journal = self.writer.lock();
        let outbox = self.state.read().outbox;
        if through <= outbox.sent_through {
            return Ok(());
        }

        let updated = OutboxState {
            sent_through: through.min(outbox.last_sequence),
            ..outbox
        };
        let staged = StagedCommit {
            ops: vec![JournalOp::SetOutbox(updated)],
            changes: Vec::new(),
        };
        self.commit(&mut journal, staged, ChangeOrigin::Sync)
    }

    /// Returns the sync checkpoint.
    pub fn checkpoint(&self) -> CoreResult<SyncCheckpoint> {
        self.ensure_open()?;
        Ok(self.state.read().checkpoint.clone())
    }

    /// When the last sync round completed, in milliseconds.
    pub fn last_sync_completed_at(&self) -> CoreResult<Option<i64>> {
        Ok(self.checkpoint()?.last_sync_completed_at)
    }

    /// Subscribes to committed changes.
    pub fn subscribe_changes(&self) -> CoreResult<std::sync::mpsc::Receiver<ChangeEvent>> {
        self.ensure_open()?;
        Ok(self.feed.subscribe())
    }

    /// Rewrites the journal as a single snapshot.
    ///
    /// Returns the journal size before and after.
    pub fn compact(&self) -> CoreResult<(u64, u64)> {
        self.ensure_open()?;
        let mut journal = self.writer.lock();
        let before = journal.size()?;
        let snapshot = self.state.read().to_snapshot();
        let after = journal.rewrite(&snapshot)?;
        self.state.write().commit_sequence = 1;
        info!(before, after, "journal compacted");
        Ok((before, after))
    }

    /// Scans the journal without modifying it.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        self.ensure_open()?;
        self.writer.lock().verify()
    }

    /// Returns store statistics.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.ensure_open()?;
        let journal_bytes = self.writer.lock().size()?;
        let state = self.state.read();

        let mut collections: BTreeMap<String, CollectionCounts> = self
            .config
            .schema
            .collection_names()
            .map(|name| (name.to_string(), CollectionCounts::default()))
            .collect();
        for record in state.records.values() {
            let counts = collections.entry(record.collection.clone()).or_default();
            if record.deleted {
                counts.deleted += 1;
            } else {
                counts.live += 1;
            }
        }

        Ok(StoreStats {
            collections,
            pending: state.pending.len(),
            outbox: state.outbox,
            commits: state.commit_sequence,
            journal_bytes,
        })
    }

    /// Returns the store's clock.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.config.clock)
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.config.schema
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Closes the store.
    ///
    /// Live queries and change subscribers are disconnected; every later
    /// call fails with `DatabaseClosed`.
    pub fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Wait for an in-flight commit to finish.
        drop(self.writer.lock());
        self.notifier.shutdown();
        self.feed.close();
        debug!("store closed");
        Ok(())
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.notifier.shutdown();
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("open", &self.is_open())
            .field("path", &self._dir.as_ref().map(StoreDir::path))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_feed::ChangeKind;
    use crate::clock::ManualClock;
    use crate::models::Task;
    use crate::tracker::Operation;
    use crate::types::{FieldValue, Fields};
    use std::time::Duration;
    use tempfile::tempdir;

    fn name(value: &str) -> Fields {
        Fields::from([("name".to_string(), FieldValue::from(value))])
    }

    #[test]
    fn write_find_and_pending() {
        let db = Database::open_in_memory().unwrap();
        let record = db.write(|txn| txn.create("plants", name("Fern"))).unwrap();

        assert_eq!(db.find("plants", &record.id).unwrap(), record);
        let pending = db.drain_pending(None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, Operation::Create);
        assert_eq!(pending[0].local_sequence, 1);
    }

    #[test]
    fn failed_closure_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let result: CoreResult<()> = db.write(|txn| {
            txn.create_with_id("plants", "p", name("Fern"))?;
            Err(CoreError::validation("plants", "abort"))
        });
        assert!(result.is_err());
        assert!(db.find("plants", "p").unwrap_err().is_not_found());
        assert_eq!(db.pending_count().unwrap(), 0);
        assert_eq!(db.outbox().unwrap().last_sequence, 0);
    }

    #[test]
    fn coalesced_create_scenario() {
        let db = Database::open_in_memory().unwrap();
        db.write(|txn| txn.create_with_id("plants", "plant-1", name("A")))
            .unwrap();
        db.write(|txn| txn.update("plants", "plant-1", name("B")))
            .unwrap();

        let pending = db.drain_pending(None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, Operation::Create);
        assert_eq!(pending[0].local_sequence, 2);
        assert_eq!(pending[0].changed_fields, name("B"));
    }

    #[test]
    fn delete_after_push_is_queued() {
        let db = Database::open_in_memory().unwrap();
        db.write(|txn| txn.create_with_id("plants", "p", name("A")))
            .unwrap();
        db.mark_sent(1).unwrap();
        db.write(|txn| txn.delete("plants", "p")).unwrap();

        let pending = db.drain_pending(None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, Operation::Delete);
        assert!(db.find("plants", "p").unwrap_err().is_not_found());
        assert!(db.find_any("plants", "p").unwrap().unwrap().deleted);
    }

    #[test]
    fn delete_after_pushed_create_and_edit_is_queued() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        {
            let db = Database::open(&path, Config::default()).unwrap();
            db.write(|txn| txn.create_with_id("plants", "p", name("A")))
                .unwrap();
            db.mark_sent(1).unwrap();
            db.write(|txn| txn.update("plants", "p", name("B"))).unwrap();

            let pending = db.drain_pending(None).unwrap();
            assert_eq!(pending[0].operation, Operation::Create);
            assert!(pending[0].pushed);
            db.close().unwrap();
        }

        let db = Database::open(&path, Config::default()).unwrap();
        db.write(|txn| txn.delete("plants", "p")).unwrap();

        let pending = db.drain_pending(None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, Operation::Delete);
        assert_eq!(pending[0].local_sequence, 3);
    }

    #[test]
    fn reopen_replays_everything() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        {
            let db = Database::open(&path, Config::default()).unwrap();
            db.write(|txn| txn.create_with_id("plants", "p", name("A")))
                .unwrap();
            db.reconcile(|txn| {
                txn.set_checkpoint(SyncCheckpoint {
                    last_pulled_cursor: Some(crate::types::Cursor::new("9")),
                    last_sync_completed_at: Some(77),
                });
                Ok(())
            })
            .unwrap();
            db.close().unwrap();
        }

        let db = Database::open(&path, Config::default()).unwrap();
        assert_eq!(db.find("plants", "p").unwrap().get("name"), Some(&FieldValue::from("A")));
        assert_eq!(db.pending_count().unwrap(), 1);
        assert_eq!(db.last_sync_completed_at().unwrap(), Some(77));
    }

    #[test]
    fn compact_preserves_state() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        {
            let db = Database::open(&path, Config::default()).unwrap();
            for i in 0..20 {
                db.write(|txn| {
                    txn.create_with_id("plants", &format!("p{i}"), name("x"))?;
                    Ok(())
                })
                .unwrap();
            }
            db.write(|txn| txn.delete("plants", "p3")).unwrap();
            let (before, after) = db.compact().unwrap();
            assert!(after < before);
            db.write(|txn| txn.update("plants", "p4", name("y")))
                .unwrap();
        }

        let db = Database::open(&path, Config::default()).unwrap();
        let report = db.verify().unwrap();
        assert_eq!(report.snapshots, 1);
        assert_eq!(report.transactions, 1);
        assert_eq!(db.records("plants").unwrap().len(), 20);
        assert_eq!(db.pending_count().unwrap(), 19);
        assert_eq!(db.outbox().unwrap().last_sequence, 22);
    }

    #[test]
    fn live_query_sees_every_final_state() {
        let db = Database::open_in_memory().unwrap();
        let mut open_tasks = db
            .query(Query::new("tasks").filter(|r| {
                r.get("done") != Some(&FieldValue::Bool(true))
            }))
            .unwrap();

        let id = db
            .write(|txn| {
                txn.create_doc(&Task {
                    title: "Water".into(),
                    ..Task::default()
                })
            })
            .unwrap();
        assert!(open_tasks.wait_for(Duration::from_secs(2), |r| r.len() == 1));

        db.write(|txn| {
            txn.update("tasks", &id, Fields::from([("done".into(), FieldValue::Bool(true))]))
        })
        .unwrap();
        assert!(open_tasks.wait_for(Duration::from_secs(2), |r| r.is_empty()));
    }

    #[test]
    fn change_feed_marks_origin() {
        let clock = Arc::new(ManualClock::new(5));
        let db = Database::open_in_memory_with(Config::new().with_clock(clock)).unwrap();
        let events = db.subscribe_changes().unwrap();

        db.write(|txn| txn.create_with_id("plants", "p", name("A")))
            .unwrap();
        let mut remote = Record::new("plants", "q", name("B"), 5);
        remote.revision = 3;
        db.reconcile(|txn| Ok(txn.apply_remote(remote))).unwrap();

        let first = events.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!((first.kind, first.origin), (ChangeKind::Created, ChangeOrigin::Local));
        let second = events.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!((second.id.as_str(), second.origin), ("q", ChangeOrigin::Sync));
        assert!(second.sequence > first.sequence);
        assert_eq!(db.pending_count().unwrap(), 1);
    }

    #[test]
    fn typed_documents() {
        let db = Database::open_in_memory().unwrap();
        for (title, done) in [("Water", false), ("Prune", true)] {
            db.write(|txn| {
                txn.create_doc(&Task {
                    title: title.into(),
                    done,
                    ..Task::default()
                })
            })
            .unwrap();
        }

        let open = db.query_docs::<Task>(|t| !t.done).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].doc.title, "Water");
        let found = db.find_doc::<Task>(&open[0].id).unwrap();
        assert_eq!(found.doc, open[0].doc);
    }

    #[test]
    fn closed_store_refuses_calls() {
        let db = Database::open_in_memory().unwrap();
        let mut live = db.query(Query::new("plants")).unwrap();
        db.close().unwrap();

        assert!(matches!(db.find("plants", "x"), Err(CoreError::DatabaseClosed)));
        assert!(matches!(
            db.write(|txn| txn.create("plants", name("A"))),
            Err(CoreError::DatabaseClosed)
        ));
        while live.recv().is_some() {}
    }

    #[test]
    fn stats_count_collections() {
        let db = Database::open_in_memory().unwrap();
        db.write(|txn| {
            txn.create_with_id("plants", "a", name("A"))?;
            txn.create_with_id("plants", "b", name("B"))?;
            txn.delete("plants", "b")
        })
        .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.collections["plants"], CollectionCounts { live: 1, deleted: 1 });
        assert_eq!(stats.collections["tasks"], CollectionCounts::default());
        assert_eq!(stats.pending, 1);
    }
}
