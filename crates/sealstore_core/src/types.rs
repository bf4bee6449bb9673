//! Core type definitions for SealStore.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Sequence number of a commit.
///
/// Every non-empty commit gets the next number; the first commit is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CommitSeq(pub u64);

impl CommitSeq {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CommitSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Stable identifier of a record within its type.
///
/// Identity is immutable: the same `(type_tag, id)` pair always denotes the
/// same logical entity. Any string is accepted; [`RecordId::generate`] yields
/// a random UUID.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates an identifier from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a new random (UUID v4) identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the identifier, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an envelope's payload was produced.
///
/// Stored alongside every payload so a read under the wrong strategy fails
/// loudly instead of returning garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PayloadMode {
    /// Codec output, unencrypted.
    Plain = 0,
    /// One AEAD blob over the whole codec output.
    Sealed = 1,
    /// Codec map with the registered encrypted fields sealed individually.
    FieldSealed = 2,
}

impl PayloadMode {
    /// Returns the on-disk tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses an on-disk tag.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Plain),
            1 => Some(Self::Sealed),
            2 => Some(Self::FieldSealed),
            _ => None,
        }
    }

    /// Returns a short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Sealed => "sealed",
            Self::FieldSealed => "field_sealed",
        }
    }
}

impl fmt::Display for PayloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_seq_ordering() {
        let s1 = CommitSeq::new(1);
        assert!(s1 < s1.next());
        assert_eq!(s1.next().as_u64(), 2);
        assert_eq!(format!("{s1}"), "seq:1");
    }

    #[test]
    fn generated_ids_are_uuids() {
        let a = RecordId::generate();
        let b = RecordId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn record_id_conversions() {
        let id = RecordId::from("user-1");
        assert_eq!(id, RecordId::new(String::from("user-1")));
        assert_eq!(id.to_string(), "user-1");
        assert_eq!(format!("{id:?}"), "RecordId(user-1)");
        assert_eq!(id.into_string(), "user-1");
    }

    #[test]
    fn payload_mode_bytes() {
        for mode in [PayloadMode::Plain, PayloadMode::Sealed, PayloadMode::FieldSealed] {
            assert_eq!(PayloadMode::from_byte(mode.as_byte()), Some(mode));
        }
        assert_eq!(PayloadMode::from_byte(9), None);
        assert_eq!(PayloadMode::FieldSealed.to_string(), "field_sealed");
    }
}
