//! Encryption strategy selection.

use crate::crypto::EncryptionKey;
use crate::types::PayloadMode;

/// How record payloads are protected at rest.
///
/// The strategy is fixed when a manager is opened. `Full` and `Selective`
/// are mutually exclusive; a store written under one can only be read under
/// the same strategy and key.
#[derive(Debug, Clone, Default)]
pub enum EncryptionStrategy {
    /// Payloads are stored as codec output.
    #[default]
    None,
    /// Every payload is one AEAD blob.
    Full(EncryptionKey),
    /// Only the fields a record type registers as encrypted are sealed.
    Selective(EncryptionKey),
}

impl EncryptionStrategy {
    /// Returns the payload mode this strategy writes.
    #[must_use]
    pub const fn mode(&self) -> PayloadMode {
        match self {
            Self::None => PayloadMode::Plain,
            Self::Full(_) => PayloadMode::Sealed,
            Self::Selective(_) => PayloadMode::FieldSealed,
        }
    }

    /// Returns the key, if the strategy encrypts.
    #[must_use]
    pub const fn key(&self) -> Option<&EncryptionKey> {
        match self {
            Self::None => None,
            Self::Full(key) | Self::Selective(key) => Some(key),
        }
    }

    /// Returns a short lowercase name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Full(_) => "full",
            Self::Selective(_) => "selective",
        }
    }
}
