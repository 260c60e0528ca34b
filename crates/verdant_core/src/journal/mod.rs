//! Append-only journal holding every piece of persisted store state.
//!
//! Records, pending changes, the outbox counters and the sync checkpoint all
//! live in one journal, so a single frame commits a record write together
//! with its pending change. A frame is either fully present and
//! checksum-valid, or it never happened.
//!
//! Recovery replays frames in order. A torn or damaged frame at the very end
//! is the write that was in flight when the process died: it was never
//! acknowledged, so it is dropped and the file truncated. Damage followed by
//! valid frames cannot come from a crash and is reported as corruption.

pub mod frame;

use crate::checkpoint::SyncCheckpoint;
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::state::StoreState;
use crate::tracker::{OutboxState, PendingChange};
use crate::types::RecordKey;
use frame::{Decoded, FrameKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use verdant_storage::{FileBackend, StorageBackend};

/// One state mutation inside a transaction frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum JournalOp {
    PutRecord(Record),
    PutPending(PendingChange),
    RemovePending(RecordKey),
    SetOutbox(OutboxState),
    SetCheckpoint(SyncCheckpoint),
}

/// Full store state, written by compaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub records: Vec<Record>,
    pub pending: Vec<PendingChange>,
    pub outbox: OutboxState,
    pub checkpoint: SyncCheckpoint,
}

/// State of the journal end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// The journal ends on a frame boundary.
    Clean,
    /// The journal ends in an incomplete or damaged frame.
    Torn {
        /// Offset of the bad frame.
        offset: u64,
        /// Bytes from the bad frame to the end.
        bytes: u64,
    },
}

/// Result of scanning a journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Valid transaction frames.
    pub transactions: usize,
    /// Valid snapshot frames.
    pub snapshots: usize,
    /// Bytes covered by valid frames.
    pub valid_bytes: u64,
    /// Total journal size.
    pub total_bytes: u64,
    /// How the journal ends.
    pub tail: TailState,
}

impl VerifyReport {
    /// Returns true if the journal ends cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.tail == TailState::Clean
    }
}

struct ScannedFrame {
    kind: FrameKind,
    offset: u64,
    payload: Vec<u8>,
}

struct Scan {
    frames: Vec<ScannedFrame>,
    report: VerifyReport,
}

fn scan(data: &[u8]) -> CoreResult<Scan> {
    let mut frames = Vec::new();
    let mut offset = 0usize;
    let mut tail = TailState::Clean;

    while offset < data.len() {
        match frame::decode(&data[offset..]) {
            Decoded::Frame {
                kind,
                payload,
                size,
            } => {
                frames.push(ScannedFrame {
                    kind,
                    offset: offset as u64,
                    payload: payload.to_vec(),
                });
                offset += size;
            }
            Decoded::Incomplete | Decoded::Damaged(_) => {
                if let Some(next) = find_valid_frame(data, offset + 1) {
                    let message = match frame::decode(&data[offset..]) {
                        Decoded::Damaged(m) => m,
                        _ => "truncated frame".to_string(),
                    };
                    return Err(CoreError::corruption(
                        offset as u64,
                        format!("{message}; valid frame follows at {next}"),
                    ));
                }
                tail = TailState::Torn {
                    offset: offset as u64,
                    bytes: (data.len() - offset) as u64,
                };
                break;
            }
        }
    }

    let transactions = frames
        .iter()
        .filter(|f| f.kind == FrameKind::Transaction)
        .count();
    let report = VerifyReport {
        transactions,
        snapshots: frames.len() - transactions,
        valid_bytes: offset as u64,
        total_bytes: data.len() as u64,
        tail,
    };
    Ok(Scan { frames, report })
}

fn find_valid_frame(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len().saturating_sub(frame::HEADER_SIZE - 1))
        .filter(|&i| data[i..].starts_with(&frame::MAGIC))
        .find(|&i| matches!(frame::decode(&data[i..]), Decoded::Frame { .. }))
}

fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::Codec(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8], offset: u64) -> CoreResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| CoreError::corruption(offset, format!("undecodable payload: {e}")))
}

fn replay(frames: Vec<ScannedFrame>) -> CoreResult<StoreState> {
    let mut state = StoreState::default();
    for frame in frames {
        match frame.kind {
            FrameKind::Transaction => {
                let ops: Vec<JournalOp> = from_cbor(&frame.payload, frame.offset)?;
                for op in ops {
                    state.apply(op);
                }
            }
            FrameKind::Snapshot => {
                let snapshot: Snapshot = from_cbor(&frame.payload, frame.offset)?;
                state = StoreState::from_snapshot(snapshot);
            }
        }
        state.commit_sequence += 1;
    }
    Ok(state)
}

/// Scans the journal file at `path` without modifying it.
pub fn verify_file(path: &Path) -> CoreResult<VerifyReport> {
    let data = std::fs::read(path)?;
    Ok(scan(&data)?.report)
}

/// The open journal, owned by the store's writer.
pub(crate) struct Journal {
    backend: Box<dyn StorageBackend>,
    path: Option<PathBuf>,
    sync_on_commit: bool,
}

impl Journal {
    /// Opens a journal, replays it and drops a torn tail.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        path: Option<PathBuf>,
        sync_on_commit: bool,
    ) -> CoreResult<(Self, StoreState, VerifyReport)> {
        let data = backend.read_all()?;
        let Scan { frames, report } = scan(&data)?;

        if let TailState::Torn { offset, bytes } = report.tail {
            warn!(offset, bytes, "discarding torn journal tail");
            backend.truncate(offset)?;
            backend.sync()?;
        }

        let state = replay(frames)?;
        debug!(
            records = state.records.len(),
            pending = state.pending.len(),
            frames = report.transactions + report.snapshots,
            "journal replayed"
        );

        Ok((
            Self {
                backend,
                path,
                sync_on_commit,
            },
            state,
            report,
        ))
    }

    /// Appends one transaction frame.
    ///
    /// On failure the journal is cut back to its previous end.
    pub fn append(&mut self, ops: &[JournalOp]) -> CoreResult<()> {
        let bytes = frame::encode(FrameKind::Transaction, &to_cbor(&ops)?)?;
        let before = self.backend.size()?;

        let result = self.write_durably(&bytes);
        if result.is_err() {
            if let Err(e) = self.backend.truncate(before) {
                warn!(error = %e, "failed to roll back partial journal append");
            }
        }
        result
    }

    fn write_durably(&mut self, bytes: &[u8]) -> CoreResult<()> {
        self.backend.append(bytes)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Replaces the whole journal with one snapshot frame.
    pub fn rewrite(&mut self, snapshot: &Snapshot) -> CoreResult<u64> {
        let bytes = frame::encode(FrameKind::Snapshot, &to_cbor(snapshot)?)?;

        match &self.path {
            Some(path) => {
                self.backend = Box::new(FileBackend::replace(path, &bytes)?);
            }
            None => {
                self.backend.truncate(0)?;
                self.backend.append(&bytes)?;
                self.backend.flush()?;
                self.backend.sync()?;
            }
        }
        Ok(bytes.len() as u64)
    }

    /// Scans the current journal content.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        Ok(scan(&self.backend.read_all()?)?.report)
    }

    /// Current journal size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}
