//! Encryption strategy behavior across stores.

use proptest::prelude::*;
use sealstore_core::{
    log_path, Config, CoreError, EncryptionKey, EncryptionStrategy, PayloadMode, Predicate,
    RecordId, StorageManager,
};
use sealstore_storage::InMemoryBackend;
use sealstore_testkit::prelude::*;

fn open_shared(backend: &InMemoryBackend, strategy: EncryptionStrategy) -> StorageManager {
    StorageManager::open_with_backend(Box::new(backend.share()), strategy, Config::default())
        .unwrap()
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn round_trip_under_every_strategy(
        strategy in encryption_strategy(),
        users in prop::collection::vec(user_strategy(), 1..8),
    ) {
        let backend = InMemoryBackend::new();
        let manager = open_shared(&backend, strategy.clone());
        for user in &users {
            manager.save(user).unwrap();
        }
        drop(manager);

        let reopened = open_shared(&backend, strategy);
        for user in &users {
            let last = users.iter().rev().find(|u| u.id == user.id).unwrap();
            let loaded: Option<User> = reopened.fetch(&RecordId::from(user.id.as_str())).unwrap();
            prop_assert_eq!(loaded.as_ref(), Some(last));
        }
    }

    #[test]
    fn wrong_key_never_opens(user in user_strategy(), selective in any::<bool>()) {
        let wrap = |key| if selective {
            EncryptionStrategy::Selective(key)
        } else {
            EncryptionStrategy::Full(key)
        };
        let backend = InMemoryBackend::new();
        open_shared(&backend, wrap(EncryptionKey::generate())).save(&user).unwrap();

        let other = open_shared(&backend, wrap(EncryptionKey::generate()));
        let err = other.fetch::<User>(&RecordId::from(user.id.as_str())).unwrap_err();
        prop_assert!(matches!(err, CoreError::DecryptionFailed { .. }), "{err}");
    }
}

#[test]
fn mode_mismatch_is_a_decryption_failure() {
    let backend = InMemoryBackend::new();
    let key = EncryptionKey::generate();
    open_shared(&backend, EncryptionStrategy::Full(key.clone()))
        .save(&User::sample("1"))
        .unwrap();

    for strategy in [EncryptionStrategy::None, EncryptionStrategy::Selective(key)] {
        let manager = open_shared(&backend, strategy);
        let err = manager.fetch::<User>(&RecordId::from("1")).unwrap_err();
        assert!(matches!(err, CoreError::DecryptionFailed { .. }), "{err}");
        // Absence is still reported as absence.
        assert!(manager.fetch::<User>(&RecordId::from("2")).unwrap().is_none());
    }
}

#[test]
fn password_derived_key_reopens_store() {
    let store = TestStore::new(EncryptionStrategy::Full(
        EncryptionKey::derive_from_password(b"hunter2", b"sealstore-tests").unwrap(),
    ));
    store.save(&User::sample("1")).unwrap();
    let store = store.reopen();
    assert_eq!(
        store.fetch::<User>(&RecordId::from("1")).unwrap(),
        Some(User::sample("1"))
    );
}

#[test]
fn selective_predicates_see_only_clear_fields() {
    let store = TestStore::selective();
    let users = sample_users(20);
    store.batch_save(&users, Default::default()).unwrap();

    let adults = Predicate::field("age").ge(40u32);
    let mut expected: Vec<_> = users.iter().filter(|u| u.age >= 40).cloned().collect();
    expected.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(store.fetch_all::<User>(Some(&adults)).unwrap(), expected);

    let by_ssn = Predicate::field("ssn").eq(users[0].ssn.as_str());
    let err = store.fetch_all::<User>(Some(&by_ssn)).unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedPredicate { ref field } if field == "ssn"));
}

#[test]
fn encrypted_fields_never_reach_disk_in_clear() {
    let store = TestStore::selective();
    let user = User {
        id: "u1".into(),
        name: "Visible Name".into(),
        age: 33,
        ssn: "987-65-4321".into(),
    };
    store.save(&user).unwrap();

    let log = std::fs::read(log_path(store.path())).unwrap();
    let contains = |needle: &[u8]| log.windows(needle.len()).any(|w| w == needle);
    assert!(!contains(user.ssn.as_bytes()));
    assert!(contains(user.name.as_bytes()));

    let stats = store.stats().unwrap();
    assert_eq!(stats.type_stats("User").field_sealed, 1);
}

#[test]
fn full_encryption_hides_every_field() {
    let store = TestStore::full();
    store.save(&User::sample("secret-id")).unwrap();

    let log = std::fs::read(log_path(store.path())).unwrap();
    let name = User::sample("secret-id").name;
    assert!(!log.windows(name.len()).any(|w| w == name.as_bytes()));
    assert_eq!(store.stats().unwrap().type_stats("User").sealed, 1);
}

#[test]
fn reseal_moves_records_between_keys() {
    let source = TestStore::full();
    let users = sample_users(7);
    source.batch_save(&users, Default::default()).unwrap();

    let target = TestStore::selective();
    let report = source
        .reseal_into::<User>(&target, sealstore_core::BatchOptions::new().chunk_size(3))
        .unwrap();
    assert_eq!(report.processed, 7);
    assert_eq!(report.chunks, 3);
    assert_eq!(target.fetch_all::<User>(None).unwrap(), users);
    assert_eq!(
        target.stats().unwrap().type_stats("User").field_sealed,
        7,
        "target must use its own strategy"
    );
    assert_eq!(target.strategy().mode(), PayloadMode::FieldSealed);
}
