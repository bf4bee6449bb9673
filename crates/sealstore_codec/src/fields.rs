//! Named-field view over a record map.

use crate::canonical::{from_value, kind_of, to_value};
use crate::error::{CodecError, CodecResult};
use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// The top-level fields of a record, by name.
///
/// Records that declare encrypted fields or take part in predicates must
/// serialize as a map with text keys (any struct with named fields does).
/// `FieldMap` keeps the original field order; canonical ordering is applied
/// only when encoding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldMap {
    entries: Vec<(String, Value)>,
}

impl FieldMap {
    /// Creates an empty field map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a field map from a serializable record.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotAMap`] if the record does not serialize as a
    /// map, or [`CodecError::NonTextKey`] if a key is not a string.
    pub fn from_record<T: Serialize + ?Sized>(record: &T) -> CodecResult<Self> {
        Self::from_value(to_value(record)?)
    }

    /// Builds a field map from a dynamic value.
    ///
    /// # Errors
    ///
    /// Same as [`FieldMap::from_record`].
    pub fn from_value(value: Value) -> CodecResult<Self> {
        let pairs = match value {
            Value::Map(pairs) => pairs,
            other => {
                return Err(CodecError::NotAMap {
                    found: kind_of(&other),
                })
            }
        };

        let entries = pairs
            .into_iter()
            .map(|(key, value)| match key {
                Value::Text(name) => Ok((name, value)),
                _ => Err(CodecError::NonTextKey),
            })
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Converts back into a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::DecodingFailed`] if the fields do not match `T`.
    pub fn into_record<T: DeserializeOwned>(self) -> CodecResult<T> {
        from_value(&self.into_value())
    }

    /// Converts into a dynamic map value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Map(
            self.entries
                .into_iter()
                .map(|(name, value)| (Value::Text(name), value))
                .collect(),
        )
    }

    /// Returns the value of field `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Returns whether field `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets field `name`, returning the previous value if any.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        let name = name.into();
        match self.entries.iter_mut().find(|(field, _)| *field == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// Removes field `name`, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(field, _)| field == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Iterates over field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the map has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        ssn: String,
        age: u32,
    }

    #[test]
    fn fields_from_struct() {
        let profile = Profile {
            name: "Grace".into(),
            ssn: "123-45-6789".into(),
            age: 85,
        };
        let fields = FieldMap::from_record(&profile).unwrap();
        assert_eq!(fields.names().collect::<Vec<_>>(), ["name", "ssn", "age"]);
        assert_eq!(fields.get("name").and_then(Value::as_text), Some("Grace"));
        assert!(!fields.contains("email"));
    }

    #[test]
    fn replace_and_rebuild() {
        let profile = Profile {
            name: "Grace".into(),
            ssn: "123-45-6789".into(),
            age: 85,
        };
        let mut fields = FieldMap::from_record(&profile).unwrap();
        let old = fields.insert("ssn", Value::Text("redacted".into()));
        assert_eq!(old, Some(Value::Text("123-45-6789".into())));

        let back: Profile = fields.into_record().unwrap();
        assert_eq!(back.ssn, "redacted");
        assert_eq!(back.age, 85);
    }

    #[test]
    fn remove_and_add_field() {
        let mut fields = FieldMap::new();
        fields.insert("a", Value::Bool(true));
        fields.insert("b", Value::Null);
        assert_eq!(fields.remove("a"), Some(Value::Bool(true)));
        assert_eq!(fields.remove("a"), None);
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn non_map_rejected() {
        let result = FieldMap::from_record(&vec![1, 2, 3]);
        assert_eq!(result, Err(CodecError::NotAMap { found: "array" }));
    }

    #[test]
    fn non_text_key_rejected() {
        let value = Value::Map(vec![(Value::Integer(1.into()), Value::Null)]);
        assert_eq!(FieldMap::from_value(value), Err(CodecError::NonTextKey));
    }
}
