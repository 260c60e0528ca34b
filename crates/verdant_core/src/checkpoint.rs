//! The sync checkpoint singleton.

use crate::types::Cursor;
use serde::{Deserialize, Serialize};

/// Progress of the last successful sync round.
///
/// Written only by the sync engine, inside the same commit that applies the
/// pulled changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Cursor after the last pulled change, `None` before the first pull.
    pub last_pulled_cursor: Option<Cursor>,
    /// When the last round completed, in milliseconds.
    pub last_sync_completed_at: Option<i64>,
}

impl SyncCheckpoint {
    /// Returns true if no round has ever completed.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.last_pulled_cursor.is_none() && self.last_sync_completed_at.is_none()
    }

    /// How long ago the last round completed, relative to `now`.
    #[must_use]
    pub fn staleness_millis(&self, now: i64) -> Option<i64> {
        self.last_sync_completed_at.map(|t| now.saturating_sub(t))
    }
}
