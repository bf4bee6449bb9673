//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, keys, encryption strategies
//! and operation sequences for model-based store tests.

use crate::fixtures::User;
use proptest::prelude::*;
use sealstore_core::{EncryptionKey, EncryptionStrategy, KEY_SIZE};

/// Strategy for generating record ids.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for generating users with arbitrary contents.
pub fn user_strategy() -> impl Strategy<Value = User> {
    (
        record_id_strategy(),
        ".{0,24}",
        0u32..120,
        prop::string::string_regex("[0-9]{3}-[0-9]{2}-[0-9]{4}").expect("Invalid regex"),
    )
        .prop_map(|(id, name, age, ssn)| User { id, name, age, ssn })
}

/// Strategy for generating encryption keys.
pub fn key_strategy() -> impl Strategy<Value = EncryptionKey> {
    prop::array::uniform32(any::<u8>())
        .prop_map(|bytes| EncryptionKey::from_bytes(&bytes[..KEY_SIZE]).expect("Key size"))
}

/// Strategy for generating encryption strategies of every kind.
pub fn encryption_strategy() -> impl Strategy<Value = EncryptionStrategy> {
    prop_oneof![
        Just(EncryptionStrategy::None),
        key_strategy().prop_map(EncryptionStrategy::Full),
        key_strategy().prop_map(EncryptionStrategy::Selective),
    ]
}

/// One step of a model-based store test.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Save (upsert) a user.
    Save(User),
    /// Delete a user by id, if present.
    Delete(String),
    /// Fetch a user by id.
    Fetch(String),
}

/// Strategy for generating store operations over a small id space, so that
/// updates and deletes hit existing records.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    let id = prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_owned);
    prop_oneof![
        3 => (id.clone(), user_strategy())
            .prop_map(|(id, user)| StoreOperation::Save(User { id, ..user })),
        1 => id.clone().prop_map(StoreOperation::Delete),
        2 => id.prop_map(StoreOperation::Fetch),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
