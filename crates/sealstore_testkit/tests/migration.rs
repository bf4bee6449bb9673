//! Explicit schema migrations.

use sealstore_codec::{FieldMap, Value};
use sealstore_core::{
    Config, CoreError, CoreResult, EncryptionKey, EncryptionStrategy, MigrationPlan, Record,
    RecordId, SchemaVersion, StorageManager, VersionedSchema,
};
use sealstore_storage::InMemoryBackend;
use sealstore_testkit::prelude::*;
use serde::{Deserialize, Serialize};

fn open(backend: &InMemoryBackend, strategy: &EncryptionStrategy) -> StorageManager {
    StorageManager::open_with_backend(Box::new(backend.share()), strategy.clone(), Config::default())
        .unwrap()
}

fn seed_contacts(backend: &InMemoryBackend, strategy: &EncryptionStrategy) {
    let manager = open(backend, strategy);
    for (id, name) in [("c1", "Ada Lovelace"), ("c2", "Alan Turing"), ("c3", "Grace")] {
        manager
            .save(&ContactV1 {
                id: id.into(),
                name: name.into(),
            })
            .unwrap();
    }
}

#[test]
fn migration_upgrades_every_instance() {
    let strategy = EncryptionStrategy::Selective(EncryptionKey::generate());
    let backend = InMemoryBackend::new();
    seed_contacts(&backend, &strategy);

    let manager = open(&backend, &strategy);
    assert!(!manager.check_schema_version::<Contact>().unwrap());
    let err = manager.ensure_schema_version::<Contact>().unwrap_err();
    assert!(
        matches!(err, CoreError::VersionMismatch { ref stored, .. } if stored == "none"),
        "{err}"
    );

    let report = manager.perform_migration::<Contact>().unwrap();
    assert_eq!(report.type_tag, "Contact");
    assert_eq!(report.from_version, None);
    assert_eq!(report.to_version, SchemaVersion::new(2, 0, 0));
    assert_eq!(report.migrated, 3);

    let ada: Contact = manager.fetch(&RecordId::from("c1")).unwrap().unwrap();
    assert_eq!((ada.first_name.as_str(), ada.last_name.as_str()), ("Ada", "Lovelace"));
    let grace: Contact = manager.fetch(&RecordId::from("c3")).unwrap().unwrap();
    assert_eq!(grace.last_name, "");

    assert!(manager.check_schema_version::<Contact>().unwrap());
    manager.ensure_schema_version::<Contact>().unwrap();
    assert_eq!(
        manager.stored_schema_version::<Contact>().unwrap(),
        Some(SchemaVersion::new(2, 0, 0))
    );
    // Markers are internal and never counted as records.
    assert_eq!(manager.count::<Contact>(), 3);
}

#[test]
fn migration_is_idempotent() {
    let strategy = EncryptionStrategy::Full(EncryptionKey::generate());
    let backend = InMemoryBackend::new();
    seed_contacts(&backend, &strategy);

    let manager = open(&backend, &strategy);
    manager.perform_migration::<Contact>().unwrap();
    let first = manager.fetch_all::<Contact>(None).unwrap();

    let again = manager.perform_migration::<Contact>().unwrap();
    assert_eq!(again.from_version, Some(SchemaVersion::new(2, 0, 0)));
    assert_eq!(again.migrated, 3);
    assert_eq!(manager.fetch_all::<Contact>(None).unwrap(), first);
}

#[test]
fn empty_type_is_current_without_marker() {
    with_memory_store(EncryptionStrategy::None, |manager| {
        assert!(manager.check_schema_version::<Contact>().unwrap());
        assert_eq!(manager.stored_schema_version::<Contact>().unwrap(), None);
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ledger {
    id: String,
    cents: i64,
}

impl Record for Ledger {
    const TYPE_NAME: &'static str = "Ledger";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.clone())
    }
}

/// Rejects negative balances during upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StrictLedger {
    id: String,
    cents: i64,
}

impl Record for StrictLedger {
    const TYPE_NAME: &'static str = "Ledger";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.clone())
    }
}

impl VersionedSchema for StrictLedger {
    const SCHEMA_VERSION: &'static str = "1.1.0";

    fn upgrade(fields: FieldMap, _from: Option<&SchemaVersion>) -> CoreResult<FieldMap> {
        match fields.get("cents") {
            Some(Value::Integer(cents)) if i128::from(*cents) < 0 => {
                Err(CoreError::invalid_operation("negative balance"))
            }
            _ => Ok(fields),
        }
    }
}

/// Declares an older version than the store holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OldLedger {
    id: String,
    cents: i64,
}

impl Record for OldLedger {
    const TYPE_NAME: &'static str = "Ledger";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.clone())
    }
}

impl VersionedSchema for OldLedger {
    const SCHEMA_VERSION: &'static str = "1.0.0";

    fn upgrade(fields: FieldMap, _from: Option<&SchemaVersion>) -> CoreResult<FieldMap> {
        Ok(fields)
    }
}

/// Changes the identity of the record it upgrades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RenamingLedger {
    id: String,
    cents: i64,
}

impl Record for RenamingLedger {
    const TYPE_NAME: &'static str = "Ledger";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.clone())
    }
}

impl VersionedSchema for RenamingLedger {
    const SCHEMA_VERSION: &'static str = "3.0.0";

    fn upgrade(mut fields: FieldMap, _from: Option<&SchemaVersion>) -> CoreResult<FieldMap> {
        fields.insert("id", Value::Text("renamed".into()));
        Ok(fields)
    }
}

#[test]
fn failing_upgrade_commits_nothing() {
    with_memory_store(EncryptionStrategy::None, |manager| {
        for (id, cents) in [("a", 10), ("b", -5), ("c", 7)] {
            manager.save(&Ledger { id: id.into(), cents }).unwrap();
        }

        let err = manager.perform_migration::<StrictLedger>().unwrap_err();
        assert!(
            matches!(err, CoreError::MigrationFailed { ref type_tag, .. } if type_tag == "Ledger"),
            "{err}"
        );
        assert_eq!(manager.stored_schema_version::<StrictLedger>().unwrap(), None);
        assert_eq!(manager.count::<Ledger>(), 3);

        let err = manager.perform_migration::<RenamingLedger>().unwrap_err();
        assert!(matches!(err, CoreError::MigrationFailed { .. }), "{err}");
        assert!(manager.fetch::<Ledger>(&RecordId::from("renamed")).unwrap().is_none());
    });
}

#[test]
fn downgrade_is_rejected() {
    with_memory_store(EncryptionStrategy::None, |manager| {
        manager.save(&Ledger { id: "a".into(), cents: 1 }).unwrap();
        manager.perform_migration::<StrictLedger>().unwrap();

        let err = manager.perform_migration::<OldLedger>().unwrap_err();
        assert!(
            matches!(err, CoreError::VersionMismatch { ref stored, ref current, .. }
                if stored == "1.1.0" && current == "1.0.0"),
            "{err}"
        );
        assert!(!manager.check_schema_version::<OldLedger>().unwrap());
    });
}

#[test]
fn plan_runs_pending_types_in_order() {
    let strategy = EncryptionStrategy::None;
    let backend = InMemoryBackend::new();
    seed_contacts(&backend, &strategy);
    let manager = open(&backend, &strategy);
    manager.save(&Ledger { id: "a".into(), cents: 3 }).unwrap();

    let mut plan = MigrationPlan::new();
    plan.add::<Contact>().unwrap().add::<StrictLedger>().unwrap();
    assert_eq!(plan.len(), 2);
    assert!(plan.add::<Contact>().is_err());
    assert_eq!(plan.pending(&manager).unwrap().len(), 2);

    let result = manager.run_migrations(&plan).unwrap();
    assert_eq!(result.reports.len(), 2);
    assert_eq!(result.reports[0].type_tag, "Contact");
    assert!(result.skipped.is_empty());

    let again = manager.run_migrations(&plan).unwrap();
    assert!(again.reports.is_empty());
    assert_eq!(again.skipped, ["Contact", "Ledger"]);
    assert!(plan.pending(&manager).unwrap().is_empty());
}
