//! Schema versioning and migration support.
//!
//! Migrations in SealStore are:
//! - **Per type**: each [`VersionedSchema`] carries its own version
//! - **Forward-only**: a stored version newer than the code is an error
//! - **Explicit**: nothing migrates until the caller asks
//! - **Atomic**: one migration is one commit, or nothing
//!
//! ## Usage
//!
//! ```ignore
//! impl VersionedSchema for User {
//!     const SCHEMA_VERSION: &'static str = "2.0.0";
//!
//!     fn upgrade(mut fields: FieldMap, from: Option<&SchemaVersion>) -> CoreResult<FieldMap> {
//!         if !fields.contains("email") {
//!             fields.insert("email", Value::Text(String::new()));
//!         }
//!         Ok(fields)
//!     }
//! }
//!
//! let report = manager.perform_migration::<User>()?;
//! ```

use crate::context::Context;
use crate::envelope::Envelope;
use crate::error::{CoreError, CoreResult};
use crate::manager::StorageManager;
use crate::record::{Record, SCHEMA_VERSIONS_TAG};
use crate::types::{PayloadMode, RecordId};
use sealstore_codec::{decode, encode, FieldMap};
use std::fmt;
use std::str::FromStr;

/// A `MAJOR.MINOR.PATCH` schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl SchemaVersion {
    /// Creates a version.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `MAJOR.MINOR.PATCH`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] for anything else.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let invalid = || {
            CoreError::invalid_schema(format!(
                "schema version `{text}` is not MAJOR.MINOR.PATCH"
            ))
        };

        let mut parts = text.split('.');
        let mut next = || -> CoreResult<u64> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl FromStr for SchemaVersion {
    type Err = CoreError;

    fn from_str(text: &str) -> CoreResult<Self> {
        Self::parse(text)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A record type with a versioned schema.
///
/// `upgrade` receives one persisted instance as a field map, together with
/// the version recorded in the store (`None` if the type was never
/// migrated), and returns the instance in the current shape. It must be
/// idempotent: upgrading an already current instance returns it unchanged.
pub trait VersionedSchema: Record {
    /// Current schema version, `MAJOR.MINOR.PATCH`.
    const SCHEMA_VERSION: &'static str;

    /// Upgrades one persisted instance to the current shape.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole migration.
    fn upgrade(fields: FieldMap, from: Option<&SchemaVersion>) -> CoreResult<FieldMap>;
}

/// Outcome of one completed migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Migrated type.
    pub type_tag: String,
    /// Version recorded before the migration, if any.
    pub from_version: Option<SchemaVersion>,
    /// Version recorded by the migration.
    pub to_version: SchemaVersion,
    /// Instances visited and rewritten.
    pub migrated: usize,
}

type MigrateFn = fn(&StorageManager) -> CoreResult<MigrationReport>;
type CheckFn = fn(&StorageManager) -> CoreResult<bool>;

/// Information about a planned migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Type to migrate.
    pub type_tag: &'static str,
    /// Version the type migrates to.
    pub target_version: SchemaVersion,
}

struct MigrationStep {
    info: MigrationInfo,
    migrate: MigrateFn,
    is_current: CheckFn,
}

/// Result of running a migration plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRunResult {
    /// Reports of the migrations that ran, in plan order.
    pub reports: Vec<MigrationReport>,
    /// Types that were already current.
    pub skipped: Vec<&'static str>,
}

/// An ordered list of types to migrate.
///
/// ```ignore
/// let mut plan = MigrationPlan::new();
/// plan.add::<Department>()?.add::<Employee>()?;
/// let result = manager.run_migrations(&plan)?;
/// ```
#[derive(Default)]
pub struct MigrationPlan {
    steps: Vec<MigrationStep>,
}

impl fmt::Debug for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|step| &step.info))
            .finish()
    }
}

impl MigrationPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a type to the plan.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if the type's version string is
    /// invalid or the type is already planned.
    pub fn add<T: VersionedSchema>(&mut self) -> CoreResult<&mut Self> {
        let target_version = SchemaVersion::parse(T::SCHEMA_VERSION)?;
        if self.steps.iter().any(|step| step.info.type_tag == T::TYPE_NAME) {
            return Err(CoreError::invalid_schema(format!(
                "`{}` is already part of the migration plan",
                T::TYPE_NAME
            )));
        }
        self.steps.push(MigrationStep {
            info: MigrationInfo {
                type_tag: T::TYPE_NAME,
                target_version,
            },
            migrate: StorageManager::perform_migration::<T>,
            is_current: StorageManager::check_schema_version::<T>,
        });
        Ok(self)
    }

    /// Returns the planned migrations in order.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.steps.iter().map(|step| step.info.clone()).collect()
    }

    /// Returns the planned types that are not current in `manager`.
    ///
    /// # Errors
    ///
    /// Returns read errors from the version check.
    pub fn pending(&self, manager: &StorageManager) -> CoreResult<Vec<MigrationInfo>> {
        let mut pending = Vec::new();
        for step in &self.steps {
            if !(step.is_current)(manager)? {
                pending.push(step.info.clone());
            }
        }
        Ok(pending)
    }

    /// Runs every pending step in order, stopping at the first failure.
    pub(crate) fn run(&self, manager: &StorageManager) -> CoreResult<MigrationRunResult> {
        let mut result = MigrationRunResult::default();
        for step in &self.steps {
            if (step.is_current)(manager)? {
                result.skipped.push(step.info.type_tag);
                continue;
            }
            result.reports.push((step.migrate)(manager)?);
        }
        Ok(result)
    }

    /// Returns the number of planned steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns whether the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Version markers live in the store as plain envelopes keyed by type tag.
impl Context<'_> {
    /// Reads the stored schema version of a type.
    pub(crate) fn stored_version(&self, type_tag: &str) -> CoreResult<Option<SchemaVersion>> {
        match self.get(SCHEMA_VERSIONS_TAG, &RecordId::from(type_tag)) {
            Some(envelope) => {
                let text: String = decode(&envelope.payload)?;
                SchemaVersion::parse(&text).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Stages a new schema version marker for a type.
    pub(crate) fn set_stored_version(
        &mut self,
        type_tag: &str,
        version: &SchemaVersion,
    ) -> CoreResult<()> {
        let payload = encode(&version.to_string())?;
        self.insert(Envelope::new(
            RecordId::from(type_tag),
            SCHEMA_VERSIONS_TAG,
            PayloadMode::Plain,
            payload,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let version = SchemaVersion::parse("2.10.3").unwrap();
        assert_eq!(version, SchemaVersion::new(2, 10, 3));
        assert_eq!(version.to_string(), "2.10.3");
        assert_eq!("0.0.1".parse::<SchemaVersion>().unwrap(), SchemaVersion::new(0, 0, 1));
    }

    #[test]
    fn invalid_versions_rejected() {
        for text in ["", "1", "1.2", "1.2.3.4", "1..3", "a.b.c", "1.2.-3", "+1.2.3", "1.2.3 "] {
            assert!(
                matches!(SchemaVersion::parse(text), Err(CoreError::InvalidSchema { .. })),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn versions_order_numerically() {
        let v = |s| SchemaVersion::parse(s).unwrap();
        assert!(v("1.9.0") < v("1.10.0"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("1.0.1") > v("1.0.0"));
    }

    #[test]
    fn empty_plan() {
        let plan = MigrationPlan::new();
        assert!(plan.is_empty());
        assert!(plan.list().is_empty());
        assert_eq!(format!("{plan:?}"), "[]");
    }
}
