//! Crash recovery of the local store.
//!
//! A commit is a single journal frame holding the record, its queued
//! change and (for sync commits) the checkpoint. After a crash the
//! recovered store must show the commit whole or not at all.

use proptest::prelude::*;
use verdant_core::{Cursor, Record, SyncCheckpoint};
use verdant_testkit::prelude::*;

/// The same workload run on a store that never crashes.
struct Reference {
    before_last: StoreSnapshot,
    after_last: StoreSnapshot,
    journal_before_last: u64,
    last_frame_len: u64,
}

fn reference_run(ops: &[LocalOp]) -> Reference {
    let store = TestStore::new();
    let (last, prefix) = ops.split_last().unwrap();
    for op in prefix {
        let _ = op.apply(&store.db);
    }
    let before_last = StoreSnapshot::capture(&store.db);
    let journal_before_last = store.disk.data().len() as u64;
    let _ = last.apply(&store.db);
    Reference {
        before_last,
        after_last: StoreSnapshot::capture(&store.db),
        journal_before_last,
        last_frame_len: store.disk.data().len() as u64 - journal_before_last,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn torn_commit_is_discarded(ops in workload_strategy(16), cut in 0.0f64..1.0) {
        let reference = reference_run(&ops);
        let size_before = reference.journal_before_last;
        let frame_len = reference.last_frame_len;
        prop_assume!(frame_len > 0);

        let store = CrashingStore::new();
        let (last, prefix) = ops.split_last().unwrap();
        for op in prefix {
            let _ = op.apply(&store.db);
        }
        prop_assert_eq!(store.control.bytes_written(), size_before);

        store.control.crash_after(size_before + (cut * frame_len as f64) as u64);
        prop_assert!(last.apply(&store.db).is_err());

        let recovered = store.recover();
        let snapshot = StoreSnapshot::capture(&recovered.db);
        prop_assert_eq!(snapshot, reference.before_last);
    }

    #[test]
    fn landed_commit_survives_lost_ack(ops in workload_strategy(16)) {
        let after = reference_run(&ops).after_last;

        let store = CrashingStore::new();
        let (last, prefix) = ops.split_last().unwrap();
        for op in prefix {
            let _ = op.apply(&store.db);
        }
        store.control.crash_on_flush();
        let _ = last.apply(&store.db);

        let recovered = store.recover();
        prop_assert_eq!(StoreSnapshot::capture(&recovered.db), after);
    }
}

#[test]
fn record_and_pending_change_recover_together() {
    let store = CrashingStore::new();
    store
        .db
        .write(|txn| txn.create_with_id("plants", "p1", plant("Fern")).map(|_| ()))
        .unwrap();
    let committed = store.control.bytes_written();

    store.control.crash_after(committed + 3);
    let result = store.db.write(|txn| {
        txn.update("plants", "p1", plant("Boston fern"))?;
        txn.create_with_id("tasks", "t1", task("Water the fern"))
            .map(|_| ())
    });
    assert!(result.is_err());
    assert!(store.control.has_crashed());

    let recovered = store.recover();
    let snapshot = StoreSnapshot::capture(&recovered.db);
    assert_eq!(
        snapshot.record("plants", "p1").unwrap().get("name").unwrap().as_text(),
        Some("Fern")
    );
    assert!(snapshot.record("tasks", "t1").is_none());
    assert!(snapshot.pending_for("tasks", "t1").is_none());
    assert_eq!(snapshot.pending.len(), 1);
    assert_eq!(
        snapshot.pending_for("plants", "p1").unwrap().changed_fields,
        plant("Fern")
    );
}

#[test]
fn checkpoint_never_runs_ahead_of_pulled_records() {
    let store = CrashingStore::new();
    let committed = store.control.bytes_written();
    store.control.crash_after(committed + 10);

    let pulled = Record {
        revision: 7,
        ..Record::new("plants", "remote-1", plant("Monstera"), FIXTURE_EPOCH)
    };
    let result = store.db.reconcile(|txn| {
        let _ = txn.apply_remote(pulled);
        txn.set_checkpoint(SyncCheckpoint {
            last_pulled_cursor: Some(Cursor::new("7")),
            last_sync_completed_at: Some(FIXTURE_EPOCH),
        });
        Ok(())
    });
    assert!(result.is_err());

    let recovered = store.recover();
    let snapshot = StoreSnapshot::capture(&recovered.db);
    assert!(snapshot.record("plants", "remote-1").is_none());
    assert!(snapshot.checkpoint.is_initial());
}

#[test]
fn store_stays_usable_after_recovery() {
    let store = CrashingStore::new();
    store
        .db
        .write(|txn| txn.create_with_id("plants", "p1", plant("Fern")).map(|_| ()))
        .unwrap();
    store.control.crash_after(store.control.bytes_written() + 1);
    assert!(store
        .db
        .write(|txn| txn.create_with_id("plants", "p2", plant("Ivy")).map(|_| ()))
        .is_err());

    let recovered = store.recover();
    recovered
        .db
        .write(|txn| txn.create_with_id("plants", "p2", plant("Ivy")).map(|_| ()))
        .unwrap();
    let sequences: Vec<u64> = recovered
        .db
        .drain_pending(None)
        .unwrap()
        .iter()
        .map(|p| p.local_sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2]);

    let reopened = recovered.reopen();
    assert_eq!(reopened.db.records("plants").unwrap().len(), 2);
    assert!(reopened.db.verify().unwrap().is_clean());
}
