//! The storage manager façade.

mod batch;
mod schema;

pub use batch::{BatchOptions, BatchReport, CancelToken};

use crate::config::Config;
use crate::context::Context;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::pipeline::Pipeline;
use crate::predicate::Predicate;
use crate::record::{Record, TypeRegistry};
use crate::stats::StoreStats;
use crate::store::EnvelopeStore;
use crate::strategy::EncryptionStrategy;
use crate::types::RecordId;
use parking_lot::Mutex;
use sealstore_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::Path;
use tracing::{debug, info};

/// The main store handle.
///
/// `StorageManager` is the entry point for SealStore. It provides:
/// - Record CRUD with upsert semantics
/// - Chunked batch operations with progress and cancellation
/// - Closure transactions on the writer or reader path
/// - Explicit schema migrations
///
/// # Concurrency
///
/// All mutations run one at a time on the exclusive writer path. Reads
/// through [`fetch_for_ui`](Self::fetch_for_ui) and
/// [`perform_ui_transaction`](Self::perform_ui_transaction) use a separate
/// reader path and never wait for a writer, only for the in-memory apply of
/// a single commit. A UI transaction that writes joins the writer path for
/// its commit. Share the manager across threads with `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// use sealstore_core::{EncryptionKey, EncryptionStrategy, StorageManager};
///
/// let key = EncryptionKey::generate();
/// let manager = StorageManager::open(path, EncryptionStrategy::Full(key))?;
///
/// manager.save(&user)?;
/// let loaded: Option<User> = manager.fetch(&user.record_id())?;
/// ```
pub struct StorageManager {
    config: Config,
    /// Store directory (holds the lock). None for backend-only stores.
    dir: Option<StoreDir>,
    store: EnvelopeStore,
    pipeline: Pipeline,
    registry: TypeRegistry,
    writer: Mutex<()>,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("path", &self.dir.as_ref().map(StoreDir::path))
            .field("pipeline", &self.pipeline)
            .field("envelopes", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl StorageManager {
    /// Opens or creates a file-backed store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreLocked`] if another manager owns the store
    /// and [`CoreError::ContainerInit`] if it cannot be opened or recovered.
    pub fn open(path: &Path, strategy: EncryptionStrategy) -> CoreResult<Self> {
        Self::open_with_config(path, strategy, Config::default())
    }

    /// Opens or creates a file-backed store with custom configuration.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub fn open_with_config(
        path: &Path,
        strategy: EncryptionStrategy,
        config: Config,
    ) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing).map_err(|err| match err {
            CoreError::Io(io) => CoreError::container_init(format!(
                "cannot open store directory {}: {io}",
                path.display()
            )),
            other => other,
        })?;

        let backend = FileBackend::open(&dir.log_path()).map_err(|err| {
            CoreError::container_init(format!("cannot open commit log: {err}"))
        })?;

        let manager = Self::assemble(Some(dir), Box::new(backend), strategy, config)?;
        info!(path = %path.display(), strategy = manager.pipeline.strategy().name(), "opened store");
        Ok(manager)
    }

    /// Creates a store that lives only in memory.
    ///
    /// # Errors
    ///
    /// Does not fail in practice; the signature matches the other openers.
    pub fn open_in_memory(strategy: EncryptionStrategy) -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), strategy, Config::default())
    }

    /// Opens a store over any storage backend.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ContainerInit`] if the log cannot be recovered.
    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        strategy: EncryptionStrategy,
        config: Config,
    ) -> CoreResult<Self> {
        Self::assemble(None, backend, strategy, config)
    }

    fn assemble(
        dir: Option<StoreDir>,
        backend: Box<dyn StorageBackend>,
        strategy: EncryptionStrategy,
        config: Config,
    ) -> CoreResult<Self> {
        let store = EnvelopeStore::open(backend, config.sync_on_commit)?;
        let pipeline = Pipeline::new(strategy, config.provider.clone());
        Ok(Self {
            config,
            dir,
            store,
            pipeline,
            registry: TypeRegistry::new(),
            writer: Mutex::new(()),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the store directory, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Returns the encryption strategy.
    #[must_use]
    pub fn strategy(&self) -> &EncryptionStrategy {
        self.pipeline.strategy()
    }

    /// Returns the type registry.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Registers a record type ahead of its first use.
    ///
    /// Typed operations register lazily; explicit registration makes a type
    /// reachable from value-level paths such as related-record traversal
    /// before it has been used.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if the type is invalid.
    pub fn register<T: Record>(&self) -> CoreResult<()> {
        self.registry.register::<T>().map(|_| ())
    }

    /// Opens a writer context, waiting for the writer lock.
    pub(crate) fn writer_context(&self) -> Context<'_> {
        Context::writer(&self.writer, &self.store, &self.pipeline, &self.registry)
    }

    /// Opens a reader context.
    pub(crate) fn reader_context(&self) -> Context<'_> {
        Context::reader(&self.writer, &self.store, &self.pipeline, &self.registry)
    }

    /// Runs `operation` on a fresh writer context and commits it.
    fn write<'s, R>(
        &'s self,
        operation: impl FnOnce(&mut Context<'s>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut ctx = self.writer_context();
        let result = operation(&mut ctx)?;
        ctx.commit()?;
        ctx.release();
        Ok(result)
    }

    // CRUD

    /// Saves a record, inserting or replacing it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EncryptionFailed`] or [`CoreError::Serialization`]
    /// if the record cannot be sealed, and [`CoreError::Persistence`] if the
    /// commit fails.
    pub fn save<T: Record>(&self, record: &T) -> CoreResult<()> {
        self.write(|ctx| ctx.save(record))?;
        debug!(type_tag = T::TYPE_NAME, id = %record.record_id(), "saved record");
        Ok(())
    }

    /// Fetches a record. `None` only when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DecryptionFailed`] or [`CoreError::Serialization`]
    /// if the record exists but cannot be read.
    pub fn fetch<T: Record>(&self, id: &RecordId) -> CoreResult<Option<T>> {
        self.writer_context().fetch(id)
    }

    /// Fetches every record of a type matching `predicate`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedPredicate`] if the predicate names an
    /// encrypted field, and read errors as for [`fetch`](Self::fetch).
    pub fn fetch_all<T: Record>(&self, predicate: Option<&Predicate>) -> CoreResult<Vec<T>> {
        let records = self.writer_context().fetch_all(predicate)?;
        debug!(type_tag = T::TYPE_NAME, count = records.len(), "fetched records");
        Ok(records)
    }

    /// Replaces an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ModelNotFound`] if the record does not exist.
    pub fn update<T: Record>(&self, record: &T) -> CoreResult<()> {
        self.write(|ctx| ctx.update(record))?;
        debug!(type_tag = T::TYPE_NAME, id = %record.record_id(), "updated record");
        Ok(())
    }

    /// Deletes a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ModelNotFound`] if the record does not exist.
    pub fn delete<T: Record>(&self, id: &RecordId) -> CoreResult<()> {
        self.write(|ctx| ctx.delete::<T>(id))?;
        debug!(type_tag = T::TYPE_NAME, %id, "deleted record");
        Ok(())
    }

    /// Deletes the stored copy of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ModelNotFound`] if the record does not exist.
    pub fn delete_record<T: Record>(&self, record: &T) -> CoreResult<()> {
        self.delete::<T>(&record.record_id())
    }

    /// Deletes every record of a type in one commit, returning how many.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the commit fails.
    pub fn delete_all<T: Record>(&self) -> CoreResult<usize> {
        let removed = self.write(|ctx| ctx.delete_all::<T>())?;
        debug!(type_tag = T::TYPE_NAME, removed, "deleted all records");
        Ok(removed)
    }

    /// Counts the records of a type.
    #[must_use]
    pub fn count<T: Record>(&self) -> usize {
        self.reader_context().count::<T>()
    }

    /// Returns whether a record exists.
    #[must_use]
    pub fn exists<T: Record>(&self, id: &RecordId) -> bool {
        self.reader_context().exists::<T>(id)
    }

    // Reader path

    /// Fetches records on the reader path.
    ///
    /// Same semantics as [`fetch_all`](Self::fetch_all), without waiting for
    /// the writer path.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_all`](Self::fetch_all).
    pub fn fetch_for_ui<T: Record>(&self, predicate: Option<&Predicate>) -> CoreResult<Vec<T>> {
        self.reader_context().fetch_all(predicate)
    }

    /// Fetches one record on the reader path.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub fn fetch_one_for_ui<T: Record>(&self, id: &RecordId) -> CoreResult<Option<T>> {
        self.reader_context().fetch(id)
    }

    // Transactions

    /// Runs `operation` on the writer path and commits its writes once.
    ///
    /// On `Err` nothing is committed and the error is returned unchanged.
    /// Use the context for every read and write inside the closure; calling
    /// the manager's own write methods there would wait on the lock this
    /// transaction holds.
    ///
    /// ```rust,ignore
    /// manager.perform_transaction(|ctx| {
    ///     let mut account: Account = ctx.fetch(&id)?.ok_or(AppError::Missing)?;
    ///     account.balance -= 10;
    ///     ctx.update(&account)?;
    ///     Ok::<_, AppError>(account.balance)
    /// })?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a commit failure converted into `E`.
    pub fn perform_transaction<R, E, F>(&self, operation: F) -> Result<R, E>
    where
        F: FnOnce(&mut Context<'_>) -> Result<R, E>,
        E: From<CoreError>,
    {
        let mut ctx = self.writer_context();
        let result = operation(&mut ctx)?;
        let seq = ctx.commit()?;
        ctx.release();
        debug!(%seq, "transaction committed");
        Ok(result)
    }

    /// Runs `operation` on the reader path and commits its writes once.
    ///
    /// Reads never wait for the writer path. Staged writes are committed as
    /// one unit under the writer lock, after checking that every record an
    /// `update` or `delete` relied on still exists.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a commit failure converted into `E`;
    /// [`CoreError::ModelNotFound`] if a writer deleted a record this
    /// transaction updates or deletes.
    pub fn perform_ui_transaction<R, E, F>(&self, operation: F) -> Result<R, E>
    where
        F: FnOnce(&mut Context<'_>) -> Result<R, E>,
        E: From<CoreError>,
    {
        let mut ctx = self.reader_context();
        let result = operation(&mut ctx)?;
        let seq = ctx.commit()?;
        debug!(%seq, "ui transaction committed");
        Ok(result)
    }

    // Maintenance

    /// Copies every record of a type into `target`, resealing it under the
    /// target's strategy and key.
    ///
    /// Records are read on this manager's reader path and written to the
    /// target in batches.
    ///
    /// # Errors
    ///
    /// Returns read errors from this manager and batch errors from `target`.
    pub fn reseal_into<T: Record>(
        &self,
        target: &StorageManager,
        options: BatchOptions<'_>,
    ) -> CoreResult<BatchReport> {
        let records = self.fetch_for_ui::<T>(None)?;
        let report = target.batch_save(&records, options)?;
        info!(type_tag = T::TYPE_NAME, records = report.processed, "resealed records");
        Ok(report)
    }

    /// Returns a statistics snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the log size is unavailable.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.store.stats()
    }
}
