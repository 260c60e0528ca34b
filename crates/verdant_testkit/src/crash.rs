//! Power-loss simulation for the local store.
//!
//! [`CrashableBackend`] forwards to an inner backend until a configured
//! crash point. From then on the "process" is dead: every append, truncate
//! and sync fails, so whatever bytes reached the inner backend stay there
//! for the next open to recover from.
//!
//! ## Crash points
//!
//! - [`CrashControl::crash_after`]: the append that crosses the byte
//!   threshold lands only partially
//! - [`CrashControl::crash_on_flush`]: the append lands whole but the
//!   commit never hears back

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use verdant_storage::{StorageBackend, StorageError, StorageResult};

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    crash_on_flush: AtomicBool,
}

/// Test-side handle to a [`CrashableBackend`]'s crash switches.
#[derive(Debug, Clone)]
pub struct CrashControl {
    state: Arc<CrashState>,
}

impl CrashControl {
    /// Crashes once `bytes` bytes in total have been appended.
    pub fn crash_after(&self, bytes: u64) {
        self.state.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Crashes on the next flush or sync.
    pub fn crash_on_flush(&self) {
        self.state.crash_on_flush.store(true, Ordering::SeqCst);
    }

    /// Bytes appended through the backend so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.state.bytes_written.load(Ordering::SeqCst)
    }

    /// Returns whether the backend has crashed.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate a crash.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Wraps `inner`. No crash is armed.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicU64::new(u64::MAX),
                bytes_written: AtomicU64::new(0),
                crashed: AtomicBool::new(false),
                crash_on_flush: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a handle for arming crashes after the store takes ownership.
    #[must_use]
    pub fn control(&self) -> CrashControl {
        CrashControl {
            state: Arc::clone(&self.state),
        }
    }

    fn crash(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::other(format!("simulated crash during {what}")))
    }

    fn ensure_alive(&self) -> StorageResult<()> {
        if self.state.crashed.load(Ordering::SeqCst) {
            Err(StorageError::Io(io::Error::other("backend has crashed")))
        } else {
            Ok(())
        }
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.ensure_alive()?;
        let current = self.state.bytes_written.load(Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);
        let len = bytes.len() as u64;

        if current.saturating_add(len) > threshold {
            let partial = threshold.saturating_sub(current) as usize;
            if partial > 0 {
                self.inner.append(&bytes[..partial])?;
            }
            self.state
                .bytes_written
                .fetch_add(partial as u64, Ordering::SeqCst);
            return Err(self.crash("append"));
        }

        let offset = self.inner.append(bytes)?;
        self.state.bytes_written.fetch_add(len, Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.ensure_alive()?;
        if self.state.crash_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_alive()?;
        if self.state.crash_on_flush.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_alive()?;
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdant_storage::InMemoryBackend;

    #[test]
    fn partial_append_then_dead() {
        let disk = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(disk.clone()));
        let control = backend.control();
        control.crash_after(6);

        backend.append(b"abcd").unwrap();
        assert!(backend.append(b"efgh").is_err());
        assert!(control.has_crashed());
        assert_eq!(disk.data(), b"abcdef");

        assert!(backend.truncate(4).is_err());
        assert!(backend.append(b"x").is_err());
        assert_eq!(disk.data(), b"abcdef");
    }

    #[test]
    fn flush_crash_keeps_appended_bytes() {
        let disk = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(disk.clone()));
        backend.control().crash_on_flush();

        backend.append(b"frame").unwrap();
        assert!(backend.flush().is_err());
        assert!(backend.truncate(0).is_err());
        assert_eq!(disk.data(), b"frame");
    }

    #[test]
    fn unarmed_backend_is_transparent() {
        let disk = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(disk.clone()));
        backend.append(b"abc").unwrap();
        backend.flush().unwrap();
        backend.truncate(1).unwrap();
        assert_eq!(disk.data(), b"a");
        assert_eq!(backend.control().bytes_written(), 3);
    }
}
