//! One sync round: push, pull, reconcile, commit.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::state::{SyncPhase, SyncReport};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use verdant_core::{Cursor, Database, PendingChange, ReconcileTxn, RecordKey, SyncCheckpoint};
use verdant_sync_protocol::{
    validate_pull_response, validate_push_response, AckStatus, ConflictRecord, ConflictResolver,
    Outcome, PullRequest, PushItem, PushRequest, RemoteRecord,
};

/// Everything a round collected before it touches the local store.
#[derive(Debug, Default)]
struct Plan {
    /// Each pushed change with the backend's verdict.
    acks: Vec<(PendingChange, AckStatus)>,
    /// Latest pulled state per record, in pull order.
    remotes: Vec<RemoteRecord>,
    /// Number of changes pulled before collapsing.
    pulled: usize,
    /// Cursor to persist on commit.
    cursor: Option<Cursor>,
}

#[derive(Debug, Default)]
struct Tally {
    acknowledged: usize,
    applied: usize,
    conflicts: usize,
    requeued: usize,
    rejected: usize,
}

/// Runs sync rounds against one local store.
///
/// A round never writes to the store before its last network call returns.
/// Everything it learned is committed in a single reconcile transaction, so
/// a failure or cancellation before that point leaves the pending queue and
/// the checkpoint exactly as they were.
pub struct SyncClient<T: SyncTransport> {
    db: Arc<Database>,
    transport: Arc<T>,
    config: SyncConfig,
    resolver: ConflictResolver,
    phase: RwLock<SyncPhase>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport> SyncClient<T> {
    /// Creates a client. The device id doubles as the resolver's origin.
    pub fn new(db: Arc<Database>, transport: Arc<T>, config: SyncConfig) -> Self {
        let resolver = ConflictResolver::new(config.device_id.clone());
        Self {
            db,
            transport,
            config,
            resolver,
            phase: RwLock::new(SyncPhase::Idle),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Gets the current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Asks the running round to stop at its next phase boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns a failed client to `Idle`.
    pub(crate) fn clear_error(&self) {
        let mut phase = self.phase.write();
        if *phase == SyncPhase::Error {
            *phase = SyncPhase::Idle;
        }
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        debug!(?phase, "sync phase");
        *self.phase.write() = phase;
    }

    async fn call<R>(&self, request: impl Future<Output = SyncResult<R>>) -> SyncResult<R> {
        tokio::time::timeout(self.config.timeout, request)
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    /// Runs one round.
    ///
    /// Changes written locally while the round is in flight stay queued for
    /// the next round.
    pub async fn run_round(&self) -> SyncResult<SyncReport> {
        let start = Instant::now();
        self.cancelled.store(false, Ordering::SeqCst);

        let result = self.round().await;
        match &result {
            Ok(report) => {
                self.set_phase(SyncPhase::Idle);
                info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    conflicts = report.conflicts,
                    requeued = report.requeued,
                    "sync round committed"
                );
            }
            Err(SyncError::Cancelled) => {
                self.set_phase(SyncPhase::Idle);
                debug!("sync round cancelled");
            }
            Err(e) => {
                self.set_phase(SyncPhase::Error);
                warn!(error = %e, "sync round failed");
            }
        }
        result.map(|report| SyncReport {
            duration: start.elapsed(),
            ..report
        })
    }

    async fn round(&self) -> SyncResult<SyncReport> {
        self.check_cancelled()?;

        self.set_phase(SyncPhase::Pushing);
        let acks = self.push_pending().await?;
        self.check_cancelled()?;

        self.set_phase(SyncPhase::Pulling);
        let (pulled, cursor) = self.pull_all().await?;
        self.check_cancelled()?;

        self.set_phase(SyncPhase::Reconciling);
        let plan = Plan {
            acks,
            pulled: pulled.len(),
            remotes: collapse(pulled),
            cursor,
        };
        self.check_cancelled()?;

        self.set_phase(SyncPhase::Committing);
        let now = self.db.clock().now_millis();
        let tally = self.db.reconcile(|txn| Ok(self.commit(txn, &plan, now)))?;

        Ok(SyncReport {
            pushed: plan.acks.len(),
            acknowledged: tally.acknowledged,
            pulled: plan.pulled,
            applied: tally.applied,
            conflicts: tally.conflicts,
            requeued: tally.requeued,
            rejected: tally.rejected,
            ..SyncReport::default()
        })
    }

    /// Sends every pending change in sequence order.
    async fn push_pending(&self) -> SyncResult<Vec<(PendingChange, AckStatus)>> {
        let sent = self.db.drain_pending(None)?;
        let Some(last) = sent.last() else {
            return Ok(Vec::new());
        };
        // From here on a create counts as pushed, even if the push is lost.
        self.db.mark_sent(last.local_sequence)?;

        let mut acks = Vec::with_capacity(sent.len());
        for batch in sent.chunks(self.config.push_batch_size.max(1)) {
            let request = PushRequest {
                protocol_version: self.config.protocol_version,
                ..PushRequest::new(
                    self.config.device_id.clone(),
                    batch.iter().map(PushItem::from).collect(),
                )
            };
            let response = self.call(self.transport.push(request.clone())).await?;
            validate_push_response(&request, &response)?;

            debug!(items = batch.len(), "pushed batch");
            acks.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(response.acks.into_iter().map(|ack| ack.status)),
            );
        }
        Ok(acks)
    }

    /// Pulls pages until the backend reports no more.
    async fn pull_all(&self) -> SyncResult<(Vec<RemoteRecord>, Option<Cursor>)> {
        let mut cursor = self.db.checkpoint()?.last_pulled_cursor;
        let mut changes = Vec::new();

        loop {
            let request = PullRequest {
                protocol_version: self.config.protocol_version,
                ..PullRequest::new(
                    self.config.device_id.clone(),
                    cursor.clone(),
                    self.config.pull_batch_size,
                )
            };
            let page = self.call(self.transport.pull(request)).await?;
            validate_pull_response(&page)?;

            debug!(changes = page.changes.len(), has_more = page.has_more, "pulled page");
            if page.next_cursor.is_some() {
                cursor = page.next_cursor;
            }
            changes.extend(page.changes);
            if !page.has_more {
                break;
            }
        }
        Ok((changes, cursor))
    }

    fn commit(&self, txn: &mut ReconcileTxn<'_>, plan: &Plan, now: i64) -> Tally {
        let mut tally = Tally::default();

        for (sent, status) in &plan.acks {
            match status {
                AckStatus::Applied { revision, .. } | AckStatus::Duplicate { revision } => {
                    txn.acknowledge(sent, *revision);
                    tally.acknowledged += 1;
                }
                AckStatus::Conflict { server_state } => {
                    // Resolve with the live entry: it may carry edits made
                    // after `sent` was snapshotted.
                    match txn.pending(&sent.collection, &sent.record_id).cloned() {
                        Some(live) => self.settle(txn, live, server_state, &mut tally),
                        None => {
                            txn.apply_remote(server_state.to_record());
                        }
                    }
                }
                AckStatus::Rejected { reason } => {
                    warn!(
                        record = %sent.key(),
                        sequence = sent.local_sequence,
                        %reason,
                        "pushed change rejected"
                    );
                    tally.rejected += 1;
                }
            }
        }

        for remote in &plan.remotes {
            match txn.pending(&remote.collection, &remote.id).cloned() {
                Some(pending) => {
                    // Not newer than the local edit's base: already reflected.
                    if ConflictRecord::detect(&pending, remote).is_some() {
                        self.settle(txn, pending, remote, &mut tally);
                    }
                }
                None => {
                    if txn.apply_remote(remote.to_record()) {
                        tally.applied += 1;
                    }
                }
            }
        }

        txn.set_checkpoint(SyncCheckpoint {
            last_pulled_cursor: plan.cursor.clone(),
            last_sync_completed_at: Some(now),
        });
        tally
    }

    fn settle(
        &self,
        txn: &mut ReconcileTxn<'_>,
        pending: PendingChange,
        remote: &RemoteRecord,
        tally: &mut Tally,
    ) {
        if txn
            .record(&remote.collection, &remote.id)
            .is_some_and(|local| local.revision > remote.revision)
        {
            return;
        }

        let conflict = ConflictRecord {
            pending,
            remote: remote.clone(),
        };
        let resolution = self.resolver.resolve(&conflict);
        debug!(
            record = %conflict.pending.key(),
            remote_revision = remote.revision,
            settled = resolution.outcome.is_settled(),
            "conflict resolved"
        );

        tally.conflicts += 1;
        txn.apply_remote(resolution.record);
        match resolution.outcome {
            Outcome::Settled => txn.discard(&remote.collection, &remote.id),
            Outcome::Requeue(change) => {
                txn.requeue(change);
                tally.requeued += 1;
            }
        }
    }
}

/// Keeps only the newest pulled state of each record.
fn collapse(pulled: Vec<RemoteRecord>) -> Vec<RemoteRecord> {
    let mut latest: HashMap<RecordKey, usize> = HashMap::new();
    for (index, remote) in pulled.iter().enumerate() {
        let slot = latest.entry(remote.key()).or_insert(index);
        if pulled[*slot].revision <= remote.revision {
            *slot = index;
        }
    }

    let mut keep: Vec<usize> = latest.into_values().collect();
    keep.sort_unstable();
    let mut pulled: Vec<Option<RemoteRecord>> = pulled.into_iter().map(Some).collect();
    keep.into_iter()
        .filter_map(|index| pulled[index].take())
        .collect()
}
