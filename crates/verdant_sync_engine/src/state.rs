//! Round phases, engine status and counters.

use std::fmt;
use std::time::{Duration, Instant};

/// Where a sync round currently is.
///
/// A round moves `Idle → Pushing → Pulling → Reconciling → Committing →
/// Idle`. `Error` is entered from any phase and left once the failure has
/// been handed to the retry manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No round in flight.
    Idle,
    /// Sending pending changes.
    Pushing,
    /// Fetching remote changes.
    Pulling,
    /// Deciding what to write.
    Reconciling,
    /// Writing the round's result in one local transaction.
    Committing,
    /// The round failed.
    Error,
}

impl SyncPhase {
    /// Returns true while a round is in flight.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPhase::Pushing | SyncPhase::Pulling | SyncPhase::Reconciling | SyncPhase::Committing
        )
    }
}

/// Sync health as shown to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Not syncing; the last round (if any) succeeded.
    Idle,
    /// A round is in flight.
    Syncing,
    /// The last round failed. Local reads and writes are unaffected.
    Error {
        /// Why the round failed.
        reason: String,
    },
}

impl SyncStatus {
    /// Returns true for `Error`.
    pub fn is_error(&self) -> bool {
        matches!(self, SyncStatus::Error { .. })
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => f.write_str("idle"),
            SyncStatus::Syncing => f.write_str("syncing"),
            SyncStatus::Error { reason } => write!(f, "error: {reason}"),
        }
    }
}

/// What one successful round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Pending changes sent.
    pub pushed: usize,
    /// Pushed changes the backend applied or had already applied.
    pub acknowledged: usize,
    /// Remote changes received.
    pub pulled: usize,
    /// Remote changes written locally as-is.
    pub applied: usize,
    /// Conflicts resolved.
    pub conflicts: usize,
    /// Pending changes re-queued by conflict resolution.
    pub requeued: usize,
    /// Pushed changes the backend refused; they stay queued.
    pub rejected: usize,
    /// Wall time of the round.
    pub duration: Duration,
}

impl SyncReport {
    /// Adds a follow-up round's counts to this one.
    pub fn merge(&mut self, other: &SyncReport) {
        self.pushed += other.pushed;
        self.acknowledged += other.acknowledged;
        self.pulled += other.pulled;
        self.applied += other.applied;
        self.conflicts += other.conflicts;
        self.requeued += other.requeued;
        self.rejected += other.rejected;
        self.duration += other.duration;
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Rounds that committed.
    pub rounds_completed: u64,
    /// Rounds that failed.
    pub rounds_failed: u64,
    /// Pending changes sent.
    pub changes_pushed: u64,
    /// Remote changes received.
    pub changes_pulled: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Pushed changes the backend rejected.
    pub changes_rejected: u64,
    /// Committed rounds in a row in which the backend rejected something.
    ///
    /// Rejected changes stay queued, so a non-zero value means some local
    /// edits are not reaching the backend even though sync succeeds.
    pub rejecting_rounds: u32,
    /// Retries made by `sync_with_retry`.
    pub retries: u64,
    /// Failures since the last successful round.
    pub consecutive_failures: u32,
    /// When the last round committed.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl SyncStats {
    pub(crate) fn record_success(&mut self, report: &SyncReport) {
        self.rounds_completed += 1;
        self.changes_pushed += report.pushed as u64;
        self.changes_pulled += report.pulled as u64;
        self.conflicts_resolved += report.conflicts as u64;
        self.changes_rejected += report.rejected as u64;
        self.rejecting_rounds = if report.rejected > 0 {
            self.rejecting_rounds.saturating_add(1)
        } else {
            0
        };
        self.consecutive_failures = 0;
        self.last_sync_time = Some(Instant::now());
        self.last_error = None;
    }

    pub(crate) fn record_failure(&mut self, reason: String) {
        self.rounds_failed += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(reason);
    }
}
