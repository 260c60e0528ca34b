//! The process-wide sync handle.

use crate::backoff::Backoff;
use crate::client::SyncClient;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::state::{SyncPhase, SyncReport, SyncStats, SyncStatus};
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use verdant_core::Database;

/// Extra rounds run right away when a round re-queued changes.
const MAX_FOLLOW_UPS: usize = 2;

#[derive(Debug, Default)]
struct Gate {
    in_flight: bool,
    generation: u64,
}

#[derive(Debug, Clone)]
struct Finished {
    generation: u64,
    outcome: SyncResult<SyncReport>,
}

enum Ticket {
    Run(u64),
    Join(u64),
}

struct Shared<T: SyncTransport> {
    client: SyncClient<T>,
    status: watch::Sender<SyncStatus>,
    finished: watch::Sender<Option<Finished>>,
    gate: Mutex<Gate>,
    backoff: Mutex<Backoff>,
    stats: RwLock<SyncStats>,
    rescheduled: Notify,
    shutdown: watch::Sender<bool>,
}

/// Publishes the outcome of a round, or `Cancelled` if the round's future
/// was dropped before it finished.
struct RoundGuard<'a, T: SyncTransport> {
    shared: &'a Shared<T>,
    generation: u64,
    done: bool,
}

impl<T: SyncTransport> RoundGuard<'_, T> {
    fn finish(mut self, outcome: SyncResult<SyncReport>) {
        self.publish(outcome);
        self.done = true;
    }

    fn publish(&self, outcome: SyncResult<SyncReport>) {
        self.shared.gate.lock().in_flight = false;
        self.shared.finished.send_replace(Some(Finished {
            generation: self.generation,
            outcome,
        }));
    }
}

impl<T: SyncTransport> Drop for RoundGuard<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.shared.status.send_replace(SyncStatus::Idle);
            self.publish(Err(SyncError::Cancelled));
        }
    }
}

impl<T: SyncTransport> Shared<T> {
    /// Runs a round, or waits for the one already in flight.
    async fn run_or_join(&self) -> SyncResult<SyncReport> {
        if *self.shutdown.borrow() {
            return Err(SyncError::Closed);
        }

        let mut finished = self.finished.subscribe();
        let ticket = {
            let mut gate = self.gate.lock();
            if gate.in_flight {
                Ticket::Join(gate.generation)
            } else {
                gate.in_flight = true;
                gate.generation += 1;
                Ticket::Run(gate.generation)
            }
        };

        match ticket {
            Ticket::Join(generation) => {
                debug!(generation, "joining in-flight sync round");
                loop {
                    let ready = finished
                        .borrow_and_update()
                        .as_ref()
                        .filter(|done| done.generation >= generation)
                        .map(|done| done.outcome.clone());
                    if let Some(outcome) = ready {
                        return outcome;
                    }
                    finished.changed().await.map_err(|_| SyncError::Closed)?;
                }
            }
            Ticket::Run(generation) => {
                let guard = RoundGuard {
                    shared: self,
                    generation,
                    done: false,
                };
                let outcome = self.run_rounds().await;
                guard.finish(outcome.clone());
                outcome
            }
        }
    }

    async fn run_rounds(&self) -> SyncResult<SyncReport> {
        self.status.send_replace(SyncStatus::Syncing);

        let mut total = SyncReport::default();
        let mut result = Ok(());
        for _ in 0..=MAX_FOLLOW_UPS {
            match self.client.run_round().await {
                Ok(report) => {
                    total.merge(&report);
                    if report.requeued == 0 {
                        break;
                    }
                    debug!(requeued = report.requeued, "running follow-up round");
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        match result {
            Ok(()) => {
                self.backoff.lock().reset();
                let rejecting_rounds = {
                    let mut stats = self.stats.write();
                    stats.record_success(&total);
                    stats.rejecting_rounds
                };
                if rejecting_rounds > 0 {
                    warn!(
                        rejected = total.rejected,
                        rejecting_rounds, "backend keeps rejecting queued changes"
                    );
                }
                self.status.send_replace(SyncStatus::Idle);
                self.rescheduled.notify_waiters();
                Ok(total)
            }
            Err(SyncError::Cancelled) => {
                self.status.send_replace(SyncStatus::Idle);
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                let retry_in = self.backoff.lock().record_failure();
                self.stats.write().record_failure(e.to_string());
                self.status.send_replace(SyncStatus::Error {
                    reason: e.to_string(),
                });
                self.client.clear_error();
                warn!(error = %e, ?retry_in, "sync failed, retry scheduled");
                self.rescheduled.notify_waiters();
                Err(e)
            }
        }
    }

    /// How long the background loop waits before its next round.
    fn next_delay(&self) -> Option<Duration> {
        self.backoff
            .lock()
            .pending_delay()
            .or(self.client.config().sync_interval)
    }
}

async fn sleep_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

async fn background_loop<T: SyncTransport>(shared: Arc<Shared<T>>) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        // Failures are already logged and recorded.
        let _ = shared.run_or_join().await;

        loop {
            let delay = shared.next_delay();
            tokio::select! {
                () = sleep_for(delay) => break,
                () = shared.rescheduled.notified() => continue,
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// The sync engine manages synchronization of one local store with the
/// backend of record.
///
/// Construct it once with [`SyncEngine::init`] and share the handle. Only
/// one round runs at a time: [`SyncEngine::force_sync`] while a round is in
/// flight waits for that round and returns its result.
///
/// Sync failures never reach local reads and writes; they show up only in
/// [`SyncEngine::sync_status`].
pub struct SyncEngine<T: SyncTransport> {
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SyncTransport + 'static> SyncEngine<T> {
    /// Creates the engine. Nothing runs until [`start`](Self::start) or
    /// [`force_sync`](Self::force_sync).
    pub fn init(db: Arc<Database>, transport: T, config: SyncConfig) -> Self {
        let backoff = Backoff::new(config.retry.clone());
        let client = SyncClient::new(db, Arc::new(transport), config);
        let (status, _) = watch::channel(SyncStatus::Idle);
        let (finished, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                client,
                status,
                finished,
                gate: Mutex::new(Gate::default()),
                backoff: Mutex::new(backoff),
                stats: RwLock::new(SyncStats::default()),
                rescheduled: Notify::new(),
                shutdown,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Starts the background loop: one round now, then one per
    /// `sync_interval`, or after the backoff delay while failing.
    ///
    /// Does nothing if already started.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) -> SyncResult<()> {
        if *self.shared.shutdown.borrow() {
            return Err(SyncError::Closed);
        }
        let mut worker = self.worker.lock();
        if worker.is_none() {
            *worker = Some(tokio::spawn(background_loop(Arc::clone(&self.shared))));
            info!(device = %self.shared.client.config().device_id, "sync engine started");
        }
        Ok(())
    }

    /// Stops the background loop, waiting for it to exit, and closes the
    /// transport. A round in flight stops at its next phase boundary.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shared.shutdown.send_replace(true);
        self.shared.client.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "sync worker ended abnormally");
            }
        }

        self.shared.status.send_replace(SyncStatus::Idle);
        self.shared.client.transport().close()?;
        info!("sync engine shut down");
        Ok(())
    }

    /// Runs a round now, ignoring backoff. Joins the in-flight round if
    /// there is one.
    pub async fn force_sync(&self) -> SyncResult<SyncReport> {
        self.shared.run_or_join().await
    }

    /// Runs rounds until one succeeds, a non-retryable error occurs, or
    /// `retry.max_attempts` is spent.
    pub async fn sync_with_retry(&self) -> SyncResult<SyncReport> {
        let retry = self.shared.client.config().retry.clone();
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                self.shared.stats.write().retries += 1;
            }

            match self.shared.run_or_join().await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    debug!(attempt, error = %e, "retrying sync");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Returns the current sync status.
    pub fn sync_status(&self) -> SyncStatus {
        self.shared.status.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Returns when the last round committed, in milliseconds since the
    /// epoch. Persisted, so it survives restarts.
    pub fn last_sync_completed_at(&self) -> SyncResult<Option<i64>> {
        Ok(self.shared.client.database().last_sync_completed_at()?)
    }

    /// Gets the current round phase.
    pub fn phase(&self) -> SyncPhase {
        self.shared.client.phase()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.read().clone()
    }

    /// Cancels the round in flight at its next phase boundary.
    pub fn cancel(&self) {
        self.shared.client.cancel();
    }

    /// Returns true while the background loop runs.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Returns the local store.
    pub fn database(&self) -> &Arc<Database> {
        self.shared.client.database()
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        self.shared.client.transport()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        self.shared.client.config()
    }
}

impl<T: SyncTransport> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use verdant_core::{Config, Cursor, FieldValue, Fields, ManualClock};
    use verdant_sync_protocol::{
        AckStatus, ItemAck, PullRequest, PullResponse, PushRequest, PushResponse,
    };

    fn database() -> Arc<Database> {
        let clock = Arc::new(ManualClock::new(42));
        Arc::new(Database::open_in_memory_with(Config::new().with_clock(clock)).unwrap())
    }

    fn config() -> SyncConfig {
        SyncConfig::new("device-a", "mock://").with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5))
                .with_jitter(false),
        )
    }

    /// Holds every pull until released.
    #[derive(Default)]
    struct GatedTransport {
        release: Notify,
        pulls: AtomicUsize,
    }

    impl SyncTransport for GatedTransport {
        async fn push(&self, _request: PushRequest) -> SyncResult<PushResponse> {
            Err(SyncError::Protocol("unexpected push".into()))
        }

        async fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(PullResponse::empty(request.cursor))
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn close(&self) -> SyncResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn force_sync_reports_and_updates_status() {
        let engine = SyncEngine::init(database(), MockTransport::new(), config());
        assert_eq!(engine.sync_status(), SyncStatus::Idle);
        assert_eq!(engine.last_sync_completed_at().unwrap(), None);

        let report = engine.force_sync().await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(engine.sync_status(), SyncStatus::Idle);
        assert_eq!(engine.phase(), SyncPhase::Idle);
        assert_eq!(engine.last_sync_completed_at().unwrap(), Some(42));
        assert_eq!(engine.stats().rounds_completed, 1);
    }

    #[tokio::test]
    async fn failure_sets_error_status() {
        let engine = SyncEngine::init(database(), MockTransport::new(), config());
        engine.transport().set_connected(false);

        let err = engine.force_sync().await.unwrap_err();
        assert_eq!(err, SyncError::NotConnected);
        assert!(engine.sync_status().is_error());
        // The retry is scheduled, so the round itself is back to idle.
        assert_eq!(engine.phase(), SyncPhase::Idle);

        let stats = engine.stats();
        assert_eq!(stats.rounds_failed, 1);
        assert_eq!(stats.consecutive_failures, 1);

        engine.transport().set_connected(true);
        engine.force_sync().await.unwrap();
        assert_eq!(engine.sync_status(), SyncStatus::Idle);
        assert_eq!(engine.stats().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn concurrent_force_sync_joins_one_round() {
        let engine = SyncEngine::init(database(), GatedTransport::default(), config());

        let (first, second, ()) = tokio::join!(engine.force_sync(), engine.force_sync(), async {
            tokio::task::yield_now().await;
            engine.transport().release.notify_one();
        });

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(engine.transport().pulls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats().rounds_completed, 1);
    }

    #[tokio::test]
    async fn repeated_rejections_show_in_stats() {
        let db = database();
        db.write(|txn| {
            txn.create_with_id(
                "plants",
                "p-1",
                Fields::from([("name".to_string(), FieldValue::from("Fern"))]),
            )
        })
        .unwrap();
        let transport = MockTransport::new();
        for _ in 0..2 {
            transport.push_response(Ok(PushResponse::new(vec![ItemAck {
                local_sequence: 1,
                status: AckStatus::Rejected {
                    reason: "quota exceeded".into(),
                },
            }])));
        }
        transport.push_response(Ok(PushResponse::new(vec![ItemAck {
            local_sequence: 1,
            status: AckStatus::Applied {
                revision: 1,
                updated_at: 42,
            },
        }])));
        let engine = SyncEngine::init(Arc::clone(&db), transport, config());

        engine.force_sync().await.unwrap();
        engine.force_sync().await.unwrap();
        assert_eq!(engine.sync_status(), SyncStatus::Idle);
        assert_eq!(db.pending_count().unwrap(), 1);
        let stats = engine.stats();
        assert_eq!(stats.rejecting_rounds, 2);
        assert_eq!(stats.changes_rejected, 2);

        engine.force_sync().await.unwrap();
        assert_eq!(engine.stats().rejecting_rounds, 0);
        assert_eq!(db.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn sync_with_retry_recovers() {
        let transport = MockTransport::new();
        transport.pull_response(Err(SyncError::network_retryable("down")));
        transport.pull_response(Err(SyncError::Timeout));
        let engine = SyncEngine::init(database(), transport, config());

        let report = engine.sync_with_retry().await.unwrap();
        assert_eq!(report.pulled, 0);

        let stats = engine.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.rounds_failed, 2);
        assert_eq!(stats.rounds_completed, 1);
    }

    #[tokio::test]
    async fn sync_with_retry_stops_on_fatal_error() {
        let transport = MockTransport::new();
        transport.pull_response(Err(SyncError::network_fatal("bad certificate")));
        let engine = SyncEngine::init(database(), transport, config());

        let err = engine.sync_with_retry().await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(engine.stats().retries, 0);
    }

    #[tokio::test]
    async fn requeue_triggers_follow_up_round() {
        let db = database();
        db.reconcile(|txn| {
            let mut record = verdant_core::Record::new(
                "tasks",
                "t-1",
                Fields::from([("title".to_string(), FieldValue::from("Water"))]),
                10,
            );
            record.revision = 1;
            txn.apply_remote(record);
            Ok(())
        })
        .unwrap();
        db.write(|txn| {
            txn.update(
                "tasks",
                "t-1",
                Fields::from([("done".to_string(), FieldValue::from(true))]),
            )
        })
        .unwrap();

        let transport = MockTransport::new();
        let mut server_state = verdant_sync_protocol::RemoteRecord {
            collection: "tasks".into(),
            id: "t-1".into(),
            revision: 2,
            updated_at: 20,
            origin: "device-b".into(),
            deleted: false,
            fields: Fields::from([("title".to_string(), FieldValue::from("Water fern"))]),
        };
        transport.push_response(Ok(PushResponse::new(vec![
            verdant_sync_protocol::ItemAck {
                local_sequence: 1,
                status: verdant_sync_protocol::AckStatus::Conflict {
                    server_state: server_state.clone(),
                },
            },
        ])));
        server_state.revision = 3;
        server_state
            .fields
            .insert("done".to_string(), FieldValue::from(true));
        transport.push_response(Ok(PushResponse::new(vec![
            verdant_sync_protocol::ItemAck {
                local_sequence: 2,
                status: verdant_sync_protocol::AckStatus::Applied {
                    revision: 3,
                    updated_at: 42,
                },
            },
        ])));
        transport.pull_response(Ok(PullResponse::empty(None)));
        transport.pull_response(Ok(PullResponse::new(
            vec![server_state],
            Some(Cursor::new("3")),
            false,
        )));

        let engine = SyncEngine::init(Arc::clone(&db), transport, config());
        let report = engine.force_sync().await.unwrap();

        assert_eq!(report.conflicts, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(report.pushed, 2);
        assert_eq!(engine.transport().pushes().len(), 2);
        assert_eq!(db.pending_count().unwrap(), 0);
        let record = db.find("tasks", "t-1").unwrap();
        assert_eq!(record.revision, 3);
        assert_eq!(record.fields["done"], FieldValue::from(true));
    }

    #[tokio::test]
    async fn start_and_shutdown() {
        let engine = SyncEngine::init(
            database(),
            MockTransport::new(),
            config().with_sync_interval(Duration::from_millis(5)),
        );
        engine.start().unwrap();
        assert!(engine.is_running());

        let mut waited = 0;
        while engine.stats().rounds_completed < 2 && waited < 200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            waited += 1;
        }
        assert!(engine.stats().rounds_completed >= 2);

        engine.shutdown().await.unwrap();
        assert!(!engine.is_running());
        assert!(!engine.transport().is_connected());
        assert_eq!(engine.force_sync().await.unwrap_err(), SyncError::Closed);
        assert_eq!(engine.start().unwrap_err(), SyncError::Closed);
    }
}
