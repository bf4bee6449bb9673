//! Schema version checks and explicit migrations.

use super::StorageManager;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::migration::{MigrationPlan, MigrationReport, MigrationRunResult, SchemaVersion, VersionedSchema};
use crate::record::Record;
use sealstore_codec::{from_value, FieldMap};
use tracing::{debug, info};

impl StorageManager {
    /// Returns the schema version recorded for `T`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if the stored marker is corrupt.
    pub fn stored_schema_version<T: VersionedSchema>(&self) -> CoreResult<Option<SchemaVersion>> {
        self.reader_context().stored_version(T::TYPE_NAME)
    }

    /// Returns whether the store holds `T` in its current schema.
    ///
    /// A type with no marker and no persisted instances is current.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if either version is malformed.
    pub fn check_schema_version<T: VersionedSchema>(&self) -> CoreResult<bool> {
        let current = SchemaVersion::parse(T::SCHEMA_VERSION)?;
        let ctx = self.reader_context();
        Ok(match ctx.stored_version(T::TYPE_NAME)? {
            Some(stored) => stored == current,
            None => ctx.count::<T>() == 0,
        })
    }

    /// Fails unless the store holds `T` in its current schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::VersionMismatch`] when a migration is needed.
    pub fn ensure_schema_version<T: VersionedSchema>(&self) -> CoreResult<()> {
        if self.check_schema_version::<T>()? {
            return Ok(());
        }
        let stored = self
            .stored_schema_version::<T>()?
            .map_or_else(|| "none".to_owned(), |version| version.to_string());
        Err(CoreError::VersionMismatch {
            type_tag: T::TYPE_NAME.to_owned(),
            stored,
            current: T::SCHEMA_VERSION.to_owned(),
        })
    }

    /// Migrates every persisted instance of `T` to its current schema.
    ///
    /// Runs on the writer path and commits once: every instance is upgraded,
    /// resealed under the current strategy, and the version marker is
    /// updated, or nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if `T`'s version is malformed,
    /// [`CoreError::VersionMismatch`] if the store is newer than `T`, and
    /// [`CoreError::MigrationFailed`] for any other failure.
    pub fn perform_migration<T: VersionedSchema>(&self) -> CoreResult<MigrationReport> {
        let current = SchemaVersion::parse(T::SCHEMA_VERSION)?;
        let mut ctx = self.writer_context();

        let stored = ctx
            .stored_version(T::TYPE_NAME)
            .map_err(|err| CoreError::migration_failed(T::TYPE_NAME, err.to_string()))?;
        if let Some(stored) = stored.filter(|stored| *stored > current) {
            return Err(CoreError::VersionMismatch {
                type_tag: T::TYPE_NAME.to_owned(),
                stored: stored.to_string(),
                current: current.to_string(),
            });
        }

        let migrated = migrate_instances::<T>(&mut ctx, stored.as_ref())
            .and_then(|migrated| {
                ctx.set_stored_version(T::TYPE_NAME, &current)?;
                ctx.commit()?;
                Ok(migrated)
            })
            .map_err(|err| match err {
                err @ CoreError::MigrationFailed { .. } => err,
                err => CoreError::migration_failed(T::TYPE_NAME, err.to_string()),
            })?;
        ctx.release();

        info!(
            type_tag = T::TYPE_NAME,
            from = ?stored.map(|v| v.to_string()),
            to = %current,
            migrated,
            "migrated schema"
        );
        Ok(MigrationReport {
            type_tag: T::TYPE_NAME.to_owned(),
            from_version: stored,
            to_version: current,
            migrated,
        })
    }

    /// Runs every pending migration of `plan` in order.
    ///
    /// Types that are already current are skipped. The first failure stops
    /// the run; migrations before it stay committed.
    ///
    /// # Errors
    ///
    /// Returns the first failing migration's error.
    pub fn run_migrations(&self, plan: &MigrationPlan) -> CoreResult<MigrationRunResult> {
        plan.run(self)
    }
}

/// Upgrades and restages every instance of `T`, returning how many.
fn migrate_instances<T: VersionedSchema>(
    ctx: &mut Context<'_>,
    stored: Option<&SchemaVersion>,
) -> CoreResult<usize> {
    let descriptor = ctx.registry().register::<T>()?;
    let pipeline = ctx.pipeline();
    let committed = ctx.committed_count(T::TYPE_NAME);
    let envelopes = ctx.fetch_envelopes(T::TYPE_NAME);

    let mut visited = 0;
    for envelope in &envelopes {
        let fields = FieldMap::from_value(pipeline.open_value(&descriptor, envelope)?)?;
        let upgraded = T::upgrade(fields, stored)?;
        let record: T = from_value(&upgraded.into_value())?;
        if record.record_id() != envelope.id {
            return Err(CoreError::migration_failed(
                T::TYPE_NAME,
                format!("upgrade changed the id of `{}`", envelope.id),
            ));
        }
        ctx.insert(pipeline.seal_record(&descriptor, &record)?);
        visited += 1;
        debug!(type_tag = T::TYPE_NAME, id = %envelope.id, "upgraded instance");
    }

    // Every persisted instance, and only those, must have been upgraded.
    if visited != committed {
        return Err(CoreError::migration_failed(
            T::TYPE_NAME,
            format!("visited {visited} instances but {committed} are persisted"),
        ));
    }
    Ok(visited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordId;
    use crate::strategy::EncryptionStrategy;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: String,
        value: u64,
    }

    impl Record for Counter {
        const TYPE_NAME: &'static str = "Counter";

        fn record_id(&self) -> RecordId {
            RecordId::new(self.id.clone())
        }
    }

    impl VersionedSchema for Counter {
        const SCHEMA_VERSION: &'static str = "1.0.0";

        fn upgrade(fields: FieldMap, _from: Option<&SchemaVersion>) -> CoreResult<FieldMap> {
            Ok(fields)
        }
    }

    fn counter(id: &str) -> Counter {
        Counter {
            id: id.into(),
            value: 1,
        }
    }

    #[test]
    fn migration_visits_persisted_instances() {
        let manager = StorageManager::open_in_memory(EncryptionStrategy::None).unwrap();
        manager.save(&counter("a")).unwrap();
        manager.save(&counter("b")).unwrap();

        let mut ctx = manager.writer_context();
        assert_eq!(migrate_instances::<Counter>(&mut ctx, None).unwrap(), 2);
    }

    #[test]
    fn migration_rejects_unpersisted_instances() {
        let manager = StorageManager::open_in_memory(EncryptionStrategy::None).unwrap();
        manager.save(&counter("a")).unwrap();

        let mut ctx = manager.writer_context();
        ctx.save(&counter("staged")).unwrap();
        let err = migrate_instances::<Counter>(&mut ctx, None).unwrap_err();
        assert!(matches!(err, CoreError::MigrationFailed { .. }), "{err}");
    }
}
