//! Record trait and the runtime type registry.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordId;
use parking_lot::RwLock;
use sealstore_codec::{from_value, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Prefix reserved for internal type tags.
pub const RESERVED_PREFIX: &str = "__";

/// Type tag under which schema version markers are stored.
pub const SCHEMA_VERSIONS_TAG: &str = "__schema_versions";

/// Trait for application values stored by SealStore.
///
/// Implementors provide:
/// - `TYPE_NAME`: the type tag partitioning the store
/// - `record_id()`: the stable, immutable identifier
/// - `encrypted_fields()`: fields sealed individually under `Selective`
/// - `related()`: references followed by related-record traversal
///
/// # Example
///
/// ```rust,ignore
/// use sealstore_core::{Record, RecordId};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     id: String,
///     name: String,
///     ssn: String,
/// }
///
/// impl Record for User {
///     const TYPE_NAME: &'static str = "User";
///
///     fn record_id(&self) -> RecordId {
///         RecordId::new(self.id.clone())
///     }
///
///     fn encrypted_fields() -> &'static [&'static str] {
///         &["ssn"]
///     }
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Type tag used to partition records. Must not start with `__`.
    const TYPE_NAME: &'static str;

    /// Returns the record's stable identifier.
    ///
    /// This ID must not change over the record's lifetime.
    fn record_id(&self) -> RecordId;

    /// Top-level fields encrypted individually under `Selective`.
    ///
    /// A non-empty list requires the record to serialize as a map.
    fn encrypted_fields() -> &'static [&'static str] {
        &[]
    }

    /// References to other records.
    fn related(&self) -> Vec<RecordRef> {
        Vec::new()
    }
}

/// A reference from one record to another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordRef {
    /// Type tag of the target.
    pub type_tag: String,
    /// Identifier of the target.
    pub id: RecordId,
}

impl RecordRef {
    /// Creates a reference to a record of type `T`.
    #[must_use]
    pub fn to<T: Record>(id: impl Into<RecordId>) -> Self {
        Self {
            type_tag: T::TYPE_NAME.to_owned(),
            id: id.into(),
        }
    }
}

type RelatedFn = fn(&Value) -> CoreResult<Vec<RecordRef>>;

fn related_of<T: Record>(value: &Value) -> CoreResult<Vec<RecordRef>> {
    let record: T = from_value(value)?;
    Ok(record.related())
}

/// Runtime description of a registered record type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    type_tag: &'static str,
    encrypted_fields: &'static [&'static str],
    related: RelatedFn,
}

impl TypeDescriptor {
    /// Builds and validates the descriptor for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] for an empty or reserved type
    /// name, or an empty or duplicated encrypted field name.
    pub fn of<T: Record>() -> CoreResult<Self> {
        let type_tag = T::TYPE_NAME;
        if type_tag.is_empty() {
            return Err(CoreError::invalid_schema("type name must not be empty"));
        }
        if type_tag.starts_with(RESERVED_PREFIX) {
            return Err(CoreError::invalid_schema(format!(
                "type name `{type_tag}` uses the reserved `{RESERVED_PREFIX}` prefix"
            )));
        }

        let fields = T::encrypted_fields();
        for (index, field) in fields.iter().enumerate() {
            if field.is_empty() {
                return Err(CoreError::invalid_schema(format!(
                    "`{type_tag}` declares an empty encrypted field name"
                )));
            }
            if fields[..index].contains(field) {
                return Err(CoreError::invalid_schema(format!(
                    "`{type_tag}` declares encrypted field `{field}` twice"
                )));
            }
        }

        Ok(Self {
            type_tag,
            encrypted_fields: fields,
            related: related_of::<T>,
        })
    }

    /// Returns the type tag.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// Returns the fields sealed individually under `Selective`.
    #[must_use]
    pub fn encrypted_fields(&self) -> &'static [&'static str] {
        self.encrypted_fields
    }

    /// Returns whether `field` is registered as encrypted.
    #[must_use]
    pub fn is_encrypted(&self, field: &str) -> bool {
        self.encrypted_fields.contains(&field)
    }

    /// Decodes `value` as this type and returns its declared references.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if `value` is not a valid instance.
    pub fn related(&self, value: &Value) -> CoreResult<Vec<RecordRef>> {
        (self.related)(value)
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.type_tag == other.type_tag && self.encrypted_fields == other.encrypted_fields
    }
}

/// Registry of record types known to a manager.
///
/// Typed operations register their type lazily. Value-level paths
/// (migration, traversal) look descriptors up by type tag.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<&'static str, TypeDescriptor>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`, returning its descriptor.
    ///
    /// Registering the same type again is a cheap lookup.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if `T` is invalid, or if another
    /// type already registered the same tag with different encrypted fields.
    pub fn register<T: Record>(&self) -> CoreResult<TypeDescriptor> {
        if let Some(existing) = self.types.read().get(T::TYPE_NAME) {
            if existing.encrypted_fields == T::encrypted_fields() {
                return Ok(existing.clone());
            }
        }

        let descriptor = TypeDescriptor::of::<T>()?;
        let mut types = self.types.write();
        match types.get(descriptor.type_tag) {
            Some(existing) if !existing.same_shape(&descriptor) => {
                Err(CoreError::invalid_schema(format!(
                    "type tag `{}` is already registered with different encrypted fields",
                    descriptor.type_tag
                )))
            }
            Some(existing) => Ok(existing.clone()),
            None => {
                debug!(
                    type_tag = descriptor.type_tag,
                    encrypted_fields = descriptor.encrypted_fields.len(),
                    "registered record type"
                );
                types.insert(descriptor.type_tag, descriptor.clone());
                Ok(descriptor)
            }
        }
    }

    /// Looks up a descriptor by type tag.
    #[must_use]
    pub fn get(&self, type_tag: &str) -> Option<TypeDescriptor> {
        self.types.read().get(type_tag).cloned()
    }

    /// Returns all registered type tags, sorted.
    #[must_use]
    pub fn type_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.types.read().keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}
