//! Test fixtures and store helpers.
//!
//! Provides temporary stores and a small set of record types covering the
//! interesting shapes: encrypted fields, references between types and a
//! versioned schema.

use sealstore_codec::{FieldMap, Value};
use sealstore_core::{
    Config, CoreResult, EncryptionKey, EncryptionStrategy, Record, RecordId, RecordRef,
    SchemaVersion, StorageManager, VersionedSchema,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A file-backed store in a temporary directory.
pub struct TestStore {
    /// The manager.
    pub manager: StorageManager,
    /// Strategy the store was opened with, for reopening.
    pub strategy: EncryptionStrategy,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TestStore {
    /// Creates a new store under a fresh temporary directory.
    pub fn new(strategy: EncryptionStrategy) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("store");
        let manager =
            StorageManager::open(&path, strategy.clone()).expect("Failed to open test store");
        Self {
            manager,
            strategy,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a store encrypting whole records under a random key.
    pub fn full() -> Self {
        Self::new(EncryptionStrategy::Full(EncryptionKey::generate()))
    }

    /// Creates a store encrypting declared fields under a random key.
    pub fn selective() -> Self {
        Self::new(EncryptionStrategy::Selective(EncryptionKey::generate()))
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the manager and opens the store again with the same strategy.
    pub fn reopen(self) -> Self {
        let Self {
            manager,
            strategy,
            path,
            _temp_dir,
        } = self;
        drop(manager);
        let manager = StorageManager::open(&path, strategy.clone()).expect("Failed to reopen");
        Self {
            manager,
            strategy,
            path,
            _temp_dir,
        }
    }

    /// Opens a second manager on the same directory.
    pub fn open_again(&self, strategy: EncryptionStrategy) -> CoreResult<StorageManager> {
        StorageManager::open_with_config(&self.path, strategy, Config::default())
    }
}

impl std::ops::Deref for TestStore {
    type Target = StorageManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Runs a test with an in-memory store.
pub fn with_memory_store<F, R>(strategy: EncryptionStrategy, f: F) -> R
where
    F: FnOnce(&StorageManager) -> R,
{
    let manager = StorageManager::open_in_memory(strategy).expect("Failed to open memory store");
    f(&manager)
}

/// Runs a test with a file-backed store.
pub fn with_file_store<F, R>(strategy: EncryptionStrategy, f: F) -> R
where
    F: FnOnce(&StorageManager, &Path) -> R,
{
    let store = TestStore::new(strategy);
    f(&store.manager, store.path())
}

/// A user with a sensitive field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: u32,
    /// Sealed individually under `Selective`.
    pub ssn: String,
}

impl User {
    /// Builds a user with deterministic contents derived from `id`.
    pub fn sample(id: &str) -> Self {
        let n = id.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        Self {
            id: id.to_owned(),
            name: format!("user-{id}"),
            age: 18 + n % 60,
            ssn: format!("{:03}-{:02}-{:04}", n % 1000, n % 100, n % 10_000),
        }
    }
}

impl Record for User {
    const TYPE_NAME: &'static str = "User";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.clone())
    }

    fn encrypted_fields() -> &'static [&'static str] {
        &["ssn"]
    }
}

/// Builds `count` users with ids `u0000`, `u0001`, ...
pub fn sample_users(count: usize) -> Vec<User> {
    (0..count).map(|i| User::sample(&format!("u{i:04}"))).collect()
}

/// A department referencing its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    /// Identifier.
    pub id: String,
    /// Name.
    pub name: String,
    /// Member employee ids.
    pub members: Vec<String>,
}

impl Record for Department {
    const TYPE_NAME: &'static str = "Department";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.clone())
    }

    fn related(&self) -> Vec<RecordRef> {
        self.members
            .iter()
            .map(|id| RecordRef::to::<Employee>(id.as_str()))
            .collect()
    }
}

/// An employee referencing a department and, optionally, a manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    /// Identifier.
    pub id: String,
    /// Name.
    pub name: String,
    /// Department id.
    pub department: String,
    /// Manager's employee id.
    pub reports_to: Option<String>,
    /// Sealed individually under `Selective`.
    pub salary: u64,
}

impl Record for Employee {
    const TYPE_NAME: &'static str = "Employee";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.clone())
    }

    fn encrypted_fields() -> &'static [&'static str] {
        &["salary"]
    }

    fn related(&self) -> Vec<RecordRef> {
        let mut refs = vec![RecordRef::to::<Department>(self.department.as_str())];
        if let Some(manager) = &self.reports_to {
            refs.push(RecordRef::to::<Employee>(manager.as_str()));
        }
        refs
    }
}

/// A department of three employees, one of whom manages the others.
pub fn sample_org() -> (Department, Vec<Employee>) {
    let employee = |id: &str, reports_to: Option<&str>, salary| Employee {
        id: id.to_owned(),
        name: format!("employee-{id}"),
        department: "eng".to_owned(),
        reports_to: reports_to.map(str::to_owned),
        salary,
    };
    let employees = vec![
        employee("e1", None, 200),
        employee("e2", Some("e1"), 150),
        employee("e3", Some("e1"), 140),
    ];
    let department = Department {
        id: "eng".to_owned(),
        name: "Engineering".to_owned(),
        members: employees.iter().map(|e| e.id.clone()).collect(),
    };
    (department, employees)
}

/// First schema of a contact: a single `name` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactV1 {
    /// Identifier.
    pub id: String,
    /// Full name.
    pub name: String,
}

impl Record for ContactV1 {
    const TYPE_NAME: &'static str = "Contact";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.clone())
    }
}

/// Current schema of a contact: split name plus an email field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Identifier.
    pub id: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Email address, empty when unknown.
    pub email: String,
}

impl Record for Contact {
    const TYPE_NAME: &'static str = "Contact";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.clone())
    }

    fn encrypted_fields() -> &'static [&'static str] {
        &["email"]
    }
}

impl VersionedSchema for Contact {
    const SCHEMA_VERSION: &'static str = "2.0.0";

    fn upgrade(mut fields: FieldMap, _from: Option<&SchemaVersion>) -> CoreResult<FieldMap> {
        if let Some(Value::Text(name)) = fields.remove("name") {
            let (first, last) = name.split_once(' ').unwrap_or((name.as_str(), ""));
            fields.insert("first_name", Value::Text(first.to_owned()));
            fields.insert("last_name", Value::Text(last.to_owned()));
        }
        if !fields.contains("email") {
            fields.insert("email", Value::Text(String::new()));
        }
        Ok(fields)
    }
}
