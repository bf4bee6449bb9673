//! Store statistics.
//!
//! Operation counters are atomic and can be read while operations are in
//! progress. [`StoreStats`] combines a counter snapshot with a census of the
//! committed envelopes.
//!
//! ```rust,ignore
//! let stats = manager.stats()?;
//! println!("{} envelopes in {} commits", stats.envelopes, stats.commits);
//! ```

use crate::envelope::Envelope;
use crate::types::PayloadMode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic operation counters.
#[derive(Debug, Default)]
pub struct OperationCounters {
    reads: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
    commits: AtomicU64,
    failed_commits: AtomicU64,
}

impl OperationCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records envelopes read from committed state.
    pub fn record_reads(&self, count: usize) {
        self.reads.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a successful commit and its operations.
    pub fn record_commit(&self, puts: usize, deletes: usize) {
        self.puts.fetch_add(puts as u64, Ordering::Relaxed);
        self.deletes.fetch_add(deletes as u64, Ordering::Relaxed);
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a commit that could not be persisted.
    pub fn record_failed_commit(&self) {
        self.failed_commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            failed_commits: self.failed_commits.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`OperationCounters`] since the manager was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    /// Envelopes read.
    pub reads: u64,
    /// Envelopes written.
    pub puts: u64,
    /// Envelopes removed.
    pub deletes: u64,
    /// Successful commits.
    pub commits: u64,
    /// Commits rolled back after an I/O failure.
    pub failed_commits: u64,
}

/// Envelope census for one type tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeStats {
    /// Envelopes of this type.
    pub envelopes: usize,
    /// Envelopes in plain mode.
    pub plain: usize,
    /// Envelopes sealed whole.
    pub sealed: usize,
    /// Envelopes with sealed fields.
    pub field_sealed: usize,
    /// Sum of payload sizes.
    pub payload_bytes: u64,
}

/// Snapshot of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Committed envelopes across all types.
    pub envelopes: usize,
    /// Census per type tag.
    pub types: BTreeMap<String, TypeStats>,
    /// Frames in the commit log.
    pub commits: u64,
    /// Commit log size in bytes.
    pub log_bytes: u64,
    /// Operation counters of the current manager.
    pub operations: OperationSnapshot,
}

impl StoreStats {
    /// Builds the census part of the stats from a set of envelopes.
    #[must_use]
    pub fn from_envelopes<'a>(envelopes: impl IntoIterator<Item = &'a Envelope>) -> Self {
        let mut stats = Self::default();
        for envelope in envelopes {
            let entry = stats.types.entry(envelope.type_tag.clone()).or_default();
            entry.envelopes += 1;
            entry.payload_bytes += envelope.payload.len() as u64;
            match envelope.mode {
                PayloadMode::Plain => entry.plain += 1,
                PayloadMode::Sealed => entry.sealed += 1,
                PayloadMode::FieldSealed => entry.field_sealed += 1,
            }
            stats.envelopes += 1;
        }
        stats
    }

    /// Returns the census for one type tag.
    #[must_use]
    pub fn type_stats(&self, type_tag: &str) -> TypeStats {
        self.types.get(type_tag).copied().unwrap_or_default()
    }
}
