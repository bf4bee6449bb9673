//! The persisted unit of storage.

use crate::types::{PayloadMode, RecordId};
use bytes::Bytes;
use std::fmt;

/// Identity of an envelope: one per `(type_tag, id)` pair.
///
/// Ordering is by type tag, then id, so one type's envelopes form a
/// contiguous range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvelopeKey {
    /// Type tag.
    pub type_tag: String,
    /// Record identifier.
    pub id: RecordId,
}

impl EnvelopeKey {
    /// Creates a key.
    #[must_use]
    pub fn new(type_tag: impl Into<String>, id: RecordId) -> Self {
        Self {
            type_tag: type_tag.into(),
            id,
        }
    }

    /// Returns the smallest key of a type.
    #[must_use]
    pub fn first_of(type_tag: &str) -> Self {
        Self::new(type_tag, RecordId::default())
    }
}

impl fmt::Display for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_tag, self.id)
    }
}

/// A stored record: identity, payload mode and payload bytes.
///
/// Payload bytes are shared, so cloning an envelope does not copy them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Record identifier.
    pub id: RecordId,
    /// Type tag.
    pub type_tag: String,
    /// How the payload was produced.
    pub mode: PayloadMode,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Envelope {
    /// Creates an envelope.
    #[must_use]
    pub fn new(
        id: RecordId,
        type_tag: impl Into<String>,
        mode: PayloadMode,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            id,
            type_tag: type_tag.into(),
            mode,
            payload: payload.into(),
        }
    }

    /// Returns the envelope's key.
    #[must_use]
    pub fn key(&self) -> EnvelopeKey {
        EnvelopeKey::new(self.type_tag.clone(), self.id.clone())
    }

    /// Returns whether this envelope has the given identity.
    #[must_use]
    pub fn is(&self, type_tag: &str, id: &RecordId) -> bool {
        self.type_tag == type_tag && &self.id == id
    }
}
