//! Chunked batch operations.

use super::StorageManager;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::predicate::Predicate;
use crate::record::Record;
use crate::types::RecordId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Cooperative cancellation flag for batch operations.
///
/// Clones share the same flag. A batch checks it before each chunk, so a
/// chunk that is already committing always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for a batch operation.
#[derive(Default)]
pub struct BatchOptions<'a> {
    chunk_size: Option<usize>,
    progress: Option<&'a mut dyn FnMut(f64)>,
    cancel: Option<CancelToken>,
}

impl std::fmt::Debug for BatchOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("chunk_size", &self.chunk_size)
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl<'a> BatchOptions<'a> {
    /// Creates options using the manager's default chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of records committed per chunk.
    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Sets a progress observer, called with a fraction in `0.0..=1.0`
    /// after every chunk commit.
    #[must_use]
    pub fn progress(mut self, observer: &'a mut dyn FnMut(f64)) -> Self {
        self.progress = Some(observer);
        self
    }

    /// Sets a cancellation token.
    #[must_use]
    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Outcome of a completed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records committed.
    pub processed: usize,
    /// Chunks committed.
    pub chunks: usize,
}

impl StorageManager {
    /// Saves records in chunks, one commit per chunk.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] if the token fires, or the first
    /// chunk failure. Chunks committed before the failure stay committed.
    pub fn batch_save<T: Record>(
        &self,
        records: &[T],
        options: BatchOptions<'_>,
    ) -> CoreResult<BatchReport> {
        let report = self.run_chunks(records, options, |ctx, record| ctx.save(record))?;
        debug!(type_tag = T::TYPE_NAME, processed = report.processed, "batch save done");
        Ok(report)
    }

    /// Updates existing records in chunks.
    ///
    /// # Errors
    ///
    /// As [`batch_save`](Self::batch_save); a missing record fails its chunk
    /// with [`CoreError::ModelNotFound`].
    pub fn batch_update<T: Record>(
        &self,
        records: &[T],
        options: BatchOptions<'_>,
    ) -> CoreResult<BatchReport> {
        let report = self.run_chunks(records, options, |ctx, record| ctx.update(record))?;
        debug!(type_tag = T::TYPE_NAME, processed = report.processed, "batch update done");
        Ok(report)
    }

    /// Deletes records in chunks.
    ///
    /// # Errors
    ///
    /// As [`batch_update`](Self::batch_update).
    pub fn batch_delete<T: Record>(
        &self,
        records: &[T],
        options: BatchOptions<'_>,
    ) -> CoreResult<BatchReport> {
        let report = self.run_chunks(records, options, |ctx, record| {
            ctx.delete::<T>(&record.record_id())
        })?;
        debug!(type_tag = T::TYPE_NAME, processed = report.processed, "batch delete done");
        Ok(report)
    }

    /// Deletes every record of a type matching `predicate`, in chunks.
    ///
    /// Matching ids are collected on the reader path first. Records removed
    /// concurrently before their chunk runs are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedPredicate`] for clauses on encrypted
    /// fields, otherwise as [`batch_save`](Self::batch_save).
    pub fn batch_delete_matching<T: Record>(
        &self,
        predicate: Option<&Predicate>,
        options: BatchOptions<'_>,
    ) -> CoreResult<BatchReport> {
        let ids = self.reader_context().matching_ids::<T>(predicate)?;
        let report = self.run_chunks(&ids, options, |ctx, id: &RecordId| {
            ctx.remove(T::TYPE_NAME, id);
            Ok(())
        })?;
        debug!(type_tag = T::TYPE_NAME, processed = report.processed, "batch delete matching done");
        Ok(report)
    }

    fn run_chunks<I>(
        &self,
        items: &[I],
        options: BatchOptions<'_>,
        mut apply: impl FnMut(&mut Context<'_>, &I) -> CoreResult<()>,
    ) -> CoreResult<BatchReport> {
        let BatchOptions {
            chunk_size,
            mut progress,
            cancel,
        } = options;
        let chunk_size = chunk_size.unwrap_or(self.config().batch_chunk_size);
        if chunk_size == 0 {
            return Err(CoreError::invalid_operation("batch chunk size must be non-zero"));
        }

        let total = items.len();
        let mut report = BatchReport::default();
        if total == 0 {
            if let Some(observer) = progress.as_mut() {
                observer(1.0);
            }
            return Ok(report);
        }

        for chunk in items.chunks(chunk_size) {
            if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                info!(processed = report.processed, total, "batch cancelled");
                return Err(CoreError::Cancelled {
                    processed: report.processed,
                });
            }
            if report.chunks > 0 {
                thread::yield_now();
            }

            let mut ctx = self.writer_context();
            for item in chunk {
                apply(&mut ctx, item)?;
            }
            ctx.commit()?;
            ctx.release();

            report.processed += chunk.len();
            report.chunks += 1;
            if let Some(observer) = progress.as_mut() {
                #[allow(clippy::cast_precision_loss)]
                observer(report.processed as f64 / total as f64);
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::EncryptionStrategy;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        n: u32,
    }

    impl Record for Item {
        const TYPE_NAME: &'static str = "Item";

        fn record_id(&self) -> RecordId {
            RecordId::new(self.id.clone())
        }
    }

    fn items(count: u32) -> Vec<Item> {
        (0..count)
            .map(|n| Item {
                id: format!("{n:04}"),
                n,
            })
            .collect()
    }

    fn manager() -> StorageManager {
        StorageManager::open_in_memory(EncryptionStrategy::None).unwrap()
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_one() {
        let manager = manager();
        let mut seen = Vec::new();
        let mut observer = |p: f64| seen.push(p);
        let report = manager
            .batch_save(
                &items(250),
                BatchOptions::new().chunk_size(100).progress(&mut observer),
            )
            .unwrap();

        assert_eq!(report, BatchReport { processed: 250, chunks: 3 });
        assert_eq!(seen, [0.4, 0.8, 1.0]);
        assert_eq!(manager.count::<Item>(), 250);
    }

    #[test]
    fn empty_batch_reports_once() {
        let manager = manager();
        let mut seen = Vec::new();
        let mut observer = |p: f64| seen.push(p);
        let report = manager
            .batch_save::<Item>(&[], BatchOptions::new().progress(&mut observer))
            .unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(seen, [1.0]);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let manager = manager();
        let err = manager
            .batch_save(&items(3), BatchOptions::new().chunk_size(0))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn cancellation_keeps_committed_chunks() {
        let manager = manager();
        let token = CancelToken::new();
        let trigger = token.clone();
        let mut observer = |p: f64| {
            if p >= 0.5 {
                trigger.cancel();
            }
        };
        let err = manager
            .batch_save(
                &items(40),
                BatchOptions::new()
                    .chunk_size(10)
                    .progress(&mut observer)
                    .cancel(token),
            )
            .unwrap_err();

        assert!(matches!(err, CoreError::Cancelled { processed: 20 }));
        assert_eq!(manager.count::<Item>(), 20);
    }

    #[test]
    fn failing_chunk_stops_the_batch() {
        let manager = manager();
        manager.batch_save(&items(5), BatchOptions::new()).unwrap();

        let mut updates = items(5);
        updates.extend(items(12).into_iter().skip(10));
        for item in &mut updates {
            item.n += 100;
        }
        let err = manager
            .batch_update(&updates, BatchOptions::new().chunk_size(5))
            .unwrap_err();

        assert!(err.is_not_found());
        let first: Item = manager.fetch(&RecordId::from("0000")).unwrap().unwrap();
        assert_eq!(first.n, 100);
    }

    #[test]
    fn delete_matching_by_predicate() {
        let manager = manager();
        manager.batch_save(&items(10), BatchOptions::new()).unwrap();

        let predicate = Predicate::field("n").ge(5u32);
        let report = manager
            .batch_delete_matching::<Item>(Some(&predicate), BatchOptions::new().chunk_size(2))
            .unwrap();

        assert_eq!(report, BatchReport { processed: 5, chunks: 3 });
        assert_eq!(manager.count::<Item>(), 5);
    }

    #[test]
    fn batch_delete_records() {
        let manager = manager();
        let all = items(6);
        manager.batch_save(&all, BatchOptions::new()).unwrap();
        manager.batch_delete(&all[..4], BatchOptions::new()).unwrap();
        assert_eq!(manager.count::<Item>(), 2);
    }
}
