//! Fault injection for commit failure and recovery tests.
//!
//! [`FaultyBackend`] wraps a shared [`InMemoryBackend`] and fails appends,
//! truncates or syncs on demand. The bytes it did manage to write stay in the
//! shared buffer, so a test can "crash", then reopen a manager on
//! [`FaultHandle::surviving_backend`] and check what recovery kept.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sealstore_testkit::crash::FaultyBackend;
//!
//! let (backend, faults) = FaultyBackend::new();
//! let manager = StorageManager::open_with_backend(Box::new(backend), strategy, config)?;
//! faults.fail_appends_after(10);
//! assert!(manager.save(&user).is_err());
//! ```

use sealstore_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct FaultState {
    /// Bytes still accepted before appends start failing.
    append_budget: AtomicUsize,
    fail_truncate: AtomicBool,
    fail_sync: AtomicBool,
    failures: AtomicUsize,
}

/// Controls the faults of a [`FaultyBackend`] from outside the manager.
#[derive(Debug)]
pub struct FaultHandle {
    state: Arc<FaultState>,
    data: InMemoryBackend,
}

impl Clone for FaultHandle {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            data: self.data.share(),
        }
    }
}

impl FaultHandle {
    /// Accepts `bytes` more bytes, then fails. An append crossing the limit
    /// writes the bytes that fit before failing, like a torn write.
    pub fn fail_appends_after(&self, bytes: usize) {
        self.state.append_budget.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether truncation fails.
    pub fn set_fail_truncate(&self, fail: bool) {
        self.state.fail_truncate.store(fail, Ordering::SeqCst);
    }

    /// Sets whether flush and sync fail.
    pub fn set_fail_sync(&self, fail: bool) {
        self.state.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn heal(&self) {
        self.state.append_budget.store(usize::MAX, Ordering::SeqCst);
        self.state.fail_truncate.store(false, Ordering::SeqCst);
        self.state.fail_sync.store(false, Ordering::SeqCst);
    }

    /// Number of injected failures so far.
    pub fn failures(&self) -> usize {
        self.state.failures.load(Ordering::SeqCst)
    }

    /// Current contents of the log.
    pub fn bytes(&self) -> Vec<u8> {
        self.data.data()
    }

    /// A fault-free backend over the same bytes, for reopening.
    pub fn surviving_backend(&self) -> Box<dyn StorageBackend> {
        Box::new(self.data.share())
    }
}

/// A storage backend that fails on demand.
#[derive(Debug)]
pub struct FaultyBackend {
    inner: InMemoryBackend,
    state: Arc<FaultState>,
}

impl FaultyBackend {
    /// Creates an empty backend and its fault handle.
    pub fn new() -> (Self, FaultHandle) {
        Self::over(InMemoryBackend::new())
    }

    /// Wraps an existing in-memory backend.
    pub fn over(inner: InMemoryBackend) -> (Self, FaultHandle) {
        let state = Arc::new(FaultState {
            append_budget: AtomicUsize::new(usize::MAX),
            fail_truncate: AtomicBool::new(false),
            fail_sync: AtomicBool::new(false),
            failures: AtomicUsize::new(0),
        });
        let handle = FaultHandle {
            state: Arc::clone(&state),
            data: inner.share(),
        };
        (Self { inner, state }, handle)
    }

    fn fail(&self, what: &str) -> StorageError {
        self.state.failures.fetch_add(1, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated {what} failure"),
        ))
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let budget = self.state.append_budget.load(Ordering::SeqCst);
        if bytes.len() <= budget {
            if budget != usize::MAX {
                self.state
                    .append_budget
                    .store(budget - bytes.len(), Ordering::SeqCst);
            }
            return self.inner.append(bytes);
        }

        self.state.append_budget.store(0, Ordering::SeqCst);
        if budget > 0 {
            self.inner.append(&bytes[..budget])?;
        }
        Err(self.fail("append"))
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_sync.load(Ordering::SeqCst) {
            return Err(self.fail("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_sync.load(Ordering::SeqCst) {
            return Err(self.fail("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.state.fail_truncate.load(Ordering::SeqCst) {
            return Err(self.fail("truncate"));
        }
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_operation() {
        let (mut backend, faults) = FaultyBackend::new();
        let offset = backend.append(b"frame").unwrap();
        backend.sync().unwrap();
        assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
        assert_eq!(faults.failures(), 0);
    }

    #[test]
    fn test_torn_append() {
        let (mut backend, faults) = FaultyBackend::new();
        faults.fail_appends_after(7);
        backend.append(b"abcd").unwrap();
        assert!(backend.append(b"efghij").is_err());
        assert_eq!(faults.bytes(), b"abcdefg");
        assert_eq!(faults.failures(), 1);

        faults.heal();
        backend.append(b"!").unwrap();
        assert_eq!(backend.size().unwrap(), 8);
    }

    #[test]
    fn test_failing_truncate_and_sync() {
        let (mut backend, faults) = FaultyBackend::new();
        backend.append(b"data").unwrap();
        faults.set_fail_truncate(true);
        faults.set_fail_sync(true);
        assert!(backend.truncate(0).is_err());
        assert!(backend.sync().is_err());
        assert_eq!(faults.surviving_backend().size().unwrap(), 4);
    }
}
