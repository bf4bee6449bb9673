//! Contexts: staged unit of work bound to one execution domain.

use crate::envelope::{Envelope, EnvelopeKey};
use crate::error::{CoreError, CoreResult};
use crate::log::LogOp;
use crate::pipeline::Pipeline;
use crate::predicate::Predicate;
use crate::record::{Record, TypeRegistry};
use crate::store::EnvelopeStore;
use crate::types::{CommitSeq, RecordId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Execution domain of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Exclusive writer. Exists only while the manager's writer lock is held.
    Writer,
    /// UI-affine reader. Reads never wait for the writer domain; a commit
    /// with staged writes joins it for the duration of the commit.
    Reader,
}

/// A pending change to one envelope.
#[derive(Debug, Clone)]
enum Staged {
    Put(Envelope),
    Delete,
}

/// A unit of work over the store.
///
/// Writes are staged until [`commit`](Self::commit) and are visible to this
/// context's own reads. Other contexts see them only after commit. Dropping
/// a context discards whatever is still staged.
///
/// `update` and `delete` check that their record exists when they stage.
/// A reader context can stage while a writer commits, so its commit checks
/// those records again under the writer lock and fails with
/// [`CoreError::ModelNotFound`] if one is gone.
pub struct Context<'m> {
    kind: ContextKind,
    store: &'m EnvelopeStore,
    pipeline: &'m Pipeline,
    registry: &'m TypeRegistry,
    staged: BTreeMap<EnvelopeKey, Staged>,
    /// Committed records that staged updates and deletes rely on.
    expected: BTreeSet<EnvelopeKey>,
    lock: &'m Mutex<()>,
    writer: Option<MutexGuard<'m, ()>>,
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.kind)
            .field("pending", &self.staged.len())
            .finish_non_exhaustive()
    }
}

impl<'m> Context<'m> {
    /// Creates a writer context, waiting for the writer lock.
    pub(crate) fn writer(
        lock: &'m Mutex<()>,
        store: &'m EnvelopeStore,
        pipeline: &'m Pipeline,
        registry: &'m TypeRegistry,
    ) -> Self {
        Self {
            kind: ContextKind::Writer,
            store,
            pipeline,
            registry,
            staged: BTreeMap::new(),
            expected: BTreeSet::new(),
            lock,
            writer: Some(lock.lock()),
        }
    }

    /// Creates a reader context. `lock` is taken only to commit.
    pub(crate) fn reader(
        lock: &'m Mutex<()>,
        store: &'m EnvelopeStore,
        pipeline: &'m Pipeline,
        registry: &'m TypeRegistry,
    ) -> Self {
        Self {
            kind: ContextKind::Reader,
            store,
            pipeline,
            registry,
            staged: BTreeMap::new(),
            expected: BTreeSet::new(),
            lock,
            writer: None,
        }
    }

    /// Returns the execution domain.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Returns the number of staged changes.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.staged.len()
    }

    // Envelope-level operations

    /// Stages an envelope, replacing any envelope with the same identity.
    pub fn insert(&mut self, envelope: Envelope) {
        self.staged.insert(envelope.key(), Staged::Put(envelope));
    }

    /// Returns an envelope, staged state first.
    #[must_use]
    pub fn get(&self, type_tag: &str, id: &RecordId) -> Option<Envelope> {
        let key = EnvelopeKey::new(type_tag, id.clone());
        match self.staged.get(&key) {
            Some(Staged::Put(envelope)) => Some(envelope.clone()),
            Some(Staged::Delete) => None,
            None => self.store.get(type_tag, id),
        }
    }

    /// Returns whether an envelope exists, staged state first.
    #[must_use]
    pub fn contains(&self, type_tag: &str, id: &RecordId) -> bool {
        let key = EnvelopeKey::new(type_tag, id.clone());
        match self.staged.get(&key) {
            Some(Staged::Put(_)) => true,
            Some(Staged::Delete) => false,
            None => self.store.contains(type_tag, id),
        }
    }

    /// Returns every envelope of a type, ordered by id, staged state merged
    /// over committed state.
    #[must_use]
    pub fn fetch_envelopes(&self, type_tag: &str) -> Vec<Envelope> {
        let committed = self.store.scan_type(type_tag);
        let first = EnvelopeKey::first_of(type_tag);
        let mut staged = self
            .staged
            .range(first..)
            .take_while(|(key, _)| key.type_tag == type_tag)
            .peekable();
        if staged.peek().is_none() {
            return committed;
        }

        let mut merged: BTreeMap<RecordId, Envelope> = committed
            .into_iter()
            .map(|envelope| (envelope.id.clone(), envelope))
            .collect();
        for (key, change) in staged {
            match change {
                Staged::Put(envelope) => {
                    merged.insert(key.id.clone(), envelope.clone());
                }
                Staged::Delete => {
                    merged.remove(&key.id);
                }
            }
        }
        merged.into_values().collect()
    }

    /// Stages removal of an envelope. Returns false if it does not exist.
    pub fn remove(&mut self, type_tag: &str, id: &RecordId) -> bool {
        if !self.contains(type_tag, id) {
            return false;
        }
        let key = EnvelopeKey::new(type_tag, id.clone());
        self.expect_committed(&key);
        if self.store.contains(type_tag, id) {
            self.staged.insert(key, Staged::Delete);
        } else {
            // Only ever staged here; nothing to delete on disk.
            self.staged.remove(&key);
        }
        true
    }

    /// Records that a staged change relies on `key` being committed. Keys
    /// this context staged itself need no check.
    fn expect_committed(&mut self, key: &EnvelopeKey) {
        if !self.staged.contains_key(key) {
            self.expected.insert(key.clone());
        }
    }

    /// Commits every staged change as one atomic unit.
    ///
    /// Staged changes are consumed whether or not the commit succeeds. A
    /// reader context waits for the writer lock here if it has anything to
    /// commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ModelNotFound`] if a record an update or delete
    /// relied on was deleted since it was staged, and
    /// [`CoreError::Persistence`] if the commit cannot be written. In both
    /// cases none of the changes become visible.
    pub fn commit(&mut self) -> CoreResult<CommitSeq> {
        let staged = std::mem::take(&mut self.staged);
        let expected = std::mem::take(&mut self.expected);
        if staged.is_empty() {
            return Ok(self.store.last_seq());
        }

        let lock = self.lock;
        let guard = match self.writer {
            Some(_) => None,
            None => Some(lock.lock()),
        };
        let result = self.commit_staged(staged, &expected);
        if let Some(guard) = guard {
            MutexGuard::unlock_fair(guard);
        }
        result
    }

    /// Writes staged changes. The caller holds the writer lock.
    fn commit_staged(
        &self,
        staged: BTreeMap<EnvelopeKey, Staged>,
        expected: &BTreeSet<EnvelopeKey>,
    ) -> CoreResult<CommitSeq> {
        if let Some(gone) = expected
            .iter()
            .find(|key| !self.store.contains(&key.type_tag, &key.id))
        {
            debug!(kind = ?self.kind, key = %gone, "staged record deleted before commit");
            return Err(CoreError::model_not_found(
                gone.type_tag.as_str(),
                gone.id.as_str(),
            ));
        }

        let ops: Vec<LogOp> = staged
            .into_iter()
            .map(|(key, change)| match change {
                Staged::Put(envelope) => LogOp::Put(envelope),
                Staged::Delete => LogOp::Delete(key),
            })
            .collect();
        let count = ops.len();
        let seq = self.store.commit(ops)?;
        debug!(kind = ?self.kind, ops = count, %seq, "context committed");
        Ok(seq)
    }

    /// Discards every staged change.
    pub fn rollback(&mut self) {
        self.expected.clear();
        if !self.staged.is_empty() {
            debug!(kind = ?self.kind, discarded = self.staged.len(), "context rolled back");
            self.staged.clear();
        }
    }

    /// Ends the context, handing the writer lock to the next waiter.
    pub(crate) fn release(mut self) {
        self.rollback();
        if let Some(guard) = self.writer.take() {
            MutexGuard::unlock_fair(guard);
        }
    }

    // Typed operations

    /// Stages a record, inserting or replacing it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] for an invalid record type and
    /// encoding or encryption errors from the pipeline.
    pub fn save<T: Record>(&mut self, record: &T) -> CoreResult<()> {
        let descriptor = self.registry.register::<T>()?;
        let envelope = self.pipeline.seal_record(&descriptor, record)?;
        self.insert(envelope);
        Ok(())
    }

    /// Fetches one record. `None` only when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DecryptionFailed`] or [`CoreError::Serialization`]
    /// if the record exists but cannot be read.
    pub fn fetch<T: Record>(&self, id: &RecordId) -> CoreResult<Option<T>> {
        let descriptor = self.registry.register::<T>()?;
        self.get(T::TYPE_NAME, id)
            .map(|envelope| self.pipeline.open_record(&descriptor, &envelope))
            .transpose()
    }

    /// Fetches every record of a type matching `predicate`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedPredicate`] before reading anything if
    /// the predicate names an encrypted field, otherwise read errors as for
    /// [`fetch`](Self::fetch).
    pub fn fetch_all<T: Record>(&self, predicate: Option<&Predicate>) -> CoreResult<Vec<T>> {
        let descriptor = self.registry.register::<T>()?;
        if let Some(predicate) = predicate {
            self.pipeline.check_predicate(&descriptor, predicate)?;
        }

        let mut records = Vec::new();
        for envelope in self.fetch_envelopes(T::TYPE_NAME) {
            match predicate {
                Some(predicate) => {
                    if let Some(record) =
                        self.pipeline
                            .open_matching(&descriptor, &envelope, predicate)?
                    {
                        records.push(record);
                    }
                }
                None => records.push(self.pipeline.open_record(&descriptor, &envelope)?),
            }
        }
        Ok(records)
    }

    /// Returns the ids of records matching `predicate`, ordered.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_all`](Self::fetch_all).
    pub fn matching_ids<T: Record>(&self, predicate: Option<&Predicate>) -> CoreResult<Vec<RecordId>> {
        let descriptor = self.registry.register::<T>()?;
        let envelopes = self.fetch_envelopes(T::TYPE_NAME);
        let Some(predicate) = predicate else {
            return Ok(envelopes.into_iter().map(|envelope| envelope.id).collect());
        };

        self.pipeline.check_predicate(&descriptor, predicate)?;
        let mut ids = Vec::new();
        for envelope in envelopes {
            if self.pipeline.matches(&envelope, predicate)? {
                ids.push(envelope.id);
            }
        }
        Ok(ids)
    }

    /// Stages a replacement for an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ModelNotFound`] if the record does not exist.
    pub fn update<T: Record>(&mut self, record: &T) -> CoreResult<()> {
        let id = record.record_id();
        self.registry.register::<T>()?;
        if !self.contains(T::TYPE_NAME, &id) {
            return Err(CoreError::model_not_found(T::TYPE_NAME, id.into_string()));
        }
        self.expect_committed(&EnvelopeKey::new(T::TYPE_NAME, id));
        self.save(record)
    }

    /// Stages deletion of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ModelNotFound`] if the record does not exist.
    pub fn delete<T: Record>(&mut self, id: &RecordId) -> CoreResult<()> {
        self.registry.register::<T>()?;
        if self.remove(T::TYPE_NAME, id) {
            Ok(())
        } else {
            Err(CoreError::model_not_found(T::TYPE_NAME, id.as_str()))
        }
    }

    /// Stages deletion of every record of a type, returning how many.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] for an invalid record type.
    pub fn delete_all<T: Record>(&mut self) -> CoreResult<usize> {
        self.registry.register::<T>()?;
        let ids: Vec<RecordId> = self
            .fetch_envelopes(T::TYPE_NAME)
            .into_iter()
            .map(|envelope| envelope.id)
            .collect();
        for id in &ids {
            self.remove(T::TYPE_NAME, id);
        }
        Ok(ids.len())
    }

    /// Counts the records of a type, staged changes included.
    #[must_use]
    pub fn count<T: Record>(&self) -> usize {
        if self.staged.is_empty() {
            return self.store.count_type(T::TYPE_NAME);
        }
        self.fetch_envelopes(T::TYPE_NAME).len()
    }

    /// Counts the committed envelopes of a type, ignoring staged changes.
    pub(crate) fn committed_count(&self, type_tag: &str) -> usize {
        self.store.count_type(type_tag)
    }

    /// Returns whether a record exists.
    #[must_use]
    pub fn exists<T: Record>(&self, id: &RecordId) -> bool {
        self.contains(T::TYPE_NAME, id)
    }

    pub(crate) fn pipeline(&self) -> &'m Pipeline {
        self.pipeline
    }

    pub(crate) fn registry(&self) -> &'m TypeRegistry {
        self.registry
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            debug!(
                kind = ?self.kind,
                discarded = self.staged.len(),
                "dropping context with uncommitted writes"
            );
        }
    }
}
