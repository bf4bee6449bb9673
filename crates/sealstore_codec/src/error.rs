//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes into the requested shape.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Input contained bytes after the first complete item.
    #[error("{count} trailing bytes after CBOR item")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },

    /// A record was expected to serialize as a map of named fields.
    #[error("expected a map of named fields, found {found}")]
    NotAMap {
        /// Kind of value that was found instead.
        found: &'static str,
    },

    /// A map key was not a text string.
    #[error("map keys must be text strings")]
    NonTextKey,
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
