//! Committed envelope state backed by the commit log.

use crate::envelope::{Envelope, EnvelopeKey};
use crate::error::CoreResult;
use crate::log::{apply_ops, CommitLog, LogOp};
use crate::stats::{OperationCounters, StoreStats};
use crate::types::{CommitSeq, RecordId};
use parking_lot::{Mutex, RwLock};
use sealstore_storage::StorageBackend;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// The committed envelope set.
///
/// Commits are serialized by the log mutex. A commit first appends its frame
/// and only then takes the state write lock, so readers observe either the
/// state before a commit or after it, and never wait on I/O.
#[derive(Debug)]
pub struct EnvelopeStore {
    log: Mutex<CommitLog>,
    envelopes: RwLock<BTreeMap<EnvelopeKey, Envelope>>,
    last_seq: RwLock<CommitSeq>,
    counters: OperationCounters,
}

impl EnvelopeStore {
    /// Opens a store over `backend`, recovering committed frames.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ContainerInit`] if the log is corrupt or
    /// cannot be read.
    pub fn open(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> CoreResult<Self> {
        let (log, scan) = CommitLog::open(backend, sync_on_commit)?;
        let envelopes = scan.replay();
        let last_seq = CommitSeq::new(log.commits());

        info!(
            envelopes = envelopes.len(),
            frames = scan.frames.len(),
            log_bytes = scan.valid_len,
            "recovered envelope store"
        );

        Ok(Self {
            log: Mutex::new(log),
            envelopes: RwLock::new(envelopes),
            last_seq: RwLock::new(last_seq),
            counters: OperationCounters::new(),
        })
    }

    /// Returns a committed envelope.
    #[must_use]
    pub fn get(&self, type_tag: &str, id: &RecordId) -> Option<Envelope> {
        let key = EnvelopeKey::new(type_tag, id.clone());
        let found = self.envelopes.read().get(&key).cloned();
        if found.is_some() {
            self.counters.record_reads(1);
        }
        found
    }

    /// Returns whether an envelope is committed.
    #[must_use]
    pub fn contains(&self, type_tag: &str, id: &RecordId) -> bool {
        let key = EnvelopeKey::new(type_tag, id.clone());
        self.envelopes.read().contains_key(&key)
    }

    /// Returns every committed envelope of a type, ordered by id.
    #[must_use]
    pub fn scan_type(&self, type_tag: &str) -> Vec<Envelope> {
        let envelopes: Vec<Envelope> = self
            .envelopes
            .read()
            .range(EnvelopeKey::first_of(type_tag)..)
            .take_while(|(key, _)| key.type_tag == type_tag)
            .map(|(_, envelope)| envelope.clone())
            .collect();
        self.counters.record_reads(envelopes.len());
        envelopes
    }

    /// Counts committed envelopes of a type.
    #[must_use]
    pub fn count_type(&self, type_tag: &str) -> usize {
        self.envelopes
            .read()
            .range(EnvelopeKey::first_of(type_tag)..)
            .take_while(|(key, _)| key.type_tag == type_tag)
            .count()
    }

    /// Persists `ops` as one frame, then applies them.
    ///
    /// An empty commit writes nothing and returns the current sequence.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Persistence`] if the frame cannot be
    /// written. Committed state is unchanged in that case.
    pub fn commit(&self, ops: Vec<LogOp>) -> CoreResult<CommitSeq> {
        if ops.is_empty() {
            return Ok(self.last_seq());
        }

        let puts = ops.iter().filter(|op| matches!(op, LogOp::Put(_))).count();
        let deletes = ops.len() - puts;

        let mut log = self.log.lock();
        if let Err(err) = log.append(&ops) {
            self.counters.record_failed_commit();
            return Err(err);
        }

        apply_ops(&mut self.envelopes.write(), ops);
        let seq = {
            let mut last = self.last_seq.write();
            *last = last.next();
            *last
        };
        drop(log);

        self.counters.record_commit(puts, deletes);
        debug!(%seq, puts, deletes, "committed");
        Ok(seq)
    }

    /// Returns the sequence number of the latest commit.
    #[must_use]
    pub fn last_seq(&self) -> CommitSeq {
        *self.last_seq.read()
    }

    /// Returns the number of committed envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.envelopes.read().len()
    }

    /// Returns whether the store holds no envelopes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.envelopes.read().is_empty()
    }

    /// Returns a statistics snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Persistence`] if the log size is unavailable.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let (commits, log_bytes) = {
            let log = self.log.lock();
            (log.commits(), log.size()?)
        };
        let mut stats = StoreStats::from_envelopes(self.envelopes.read().values());
        stats.commits = commits;
        stats.log_bytes = log_bytes;
        stats.operations = self.counters.snapshot();
        Ok(stats)
    }
}
