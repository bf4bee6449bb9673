//! Error types for SealStore core.

use sealstore_codec::CodecError;
use sealstore_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SealStore core operations.
///
/// Every error reaches the immediate caller unchanged. The store never
/// retries and never turns a failure into "not found".
#[derive(Debug, Error)]
pub enum CoreError {
    /// A record could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the codec failure.
        message: String,
    },

    /// Sealing a payload failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Opening a payload failed: wrong key, tampered or malformed ciphertext,
    /// or an envelope written under a different encryption mode.
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Key material has the wrong length.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivationFailed {
        /// Description of the failure.
        message: String,
    },

    /// The record targeted by an update or delete does not exist.
    #[error("model not found: {type_tag}/{id}")]
    ModelNotFound {
        /// Type tag of the missing record.
        type_tag: String,
        /// Identifier of the missing record.
        id: String,
    },

    /// A commit could not be persisted. Nothing from the commit is visible.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// The backing store could not be opened, created or recovered.
    #[error("store initialization failed: {message}")]
    ContainerInit {
        /// Description of the failure.
        message: String,
    },

    /// Another manager already owns the store directory.
    #[error("store locked: another manager has exclusive access")]
    StoreLocked,

    /// A schema migration failed; none of its writes were committed.
    #[error("migration of {type_tag} failed: {message}")]
    MigrationFailed {
        /// Type being migrated.
        type_tag: String,
        /// Description of the underlying failure.
        message: String,
    },

    /// The stored schema version does not match the declared one.
    #[error("schema version mismatch for {type_tag}: stored {stored}, current {current}")]
    VersionMismatch {
        /// Type whose versions differ.
        type_tag: String,
        /// Version recorded in the store (`none` if no marker exists).
        stored: String,
        /// Version declared by the record type.
        current: String,
    },

    /// A record type or version declaration is invalid.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// A predicate referenced a field that is stored encrypted.
    #[error("predicate over encrypted field `{field}` is not supported")]
    UnsupportedPredicate {
        /// The encrypted field named by the predicate.
        field: String,
    },

    /// A batch was cancelled between chunks.
    #[error("batch cancelled after {processed} records")]
    Cancelled {
        /// Records committed before cancellation.
        processed: usize,
    },

    /// Operation not permitted with the given arguments or state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Directory-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for CoreError {
    fn from(err: CodecError) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl CoreError {
    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a key derivation error.
    pub fn key_derivation_failed(message: impl Into<String>) -> Self {
        Self::KeyDerivationFailed {
            message: message.into(),
        }
    }

    /// Creates a model not found error.
    pub fn model_not_found(type_tag: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ModelNotFound {
            type_tag: type_tag.into(),
            id: id.into(),
        }
    }

    /// Creates a store initialization error.
    pub fn container_init(message: impl Into<String>) -> Self {
        Self::ContainerInit {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(type_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            type_tag: type_tag.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for [`CoreError::ModelNotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModelNotFound { .. })
    }
}
