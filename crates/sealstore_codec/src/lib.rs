//! # SealStore Codec
//!
//! Deterministic CBOR encoding for SealStore records.
//!
//! Records are plain serde types. This crate lowers them to CBOR with
//! canonical map ordering so that:
//! - identical records produce identical bytes
//! - payloads are stable across platforms and field declaration order
//! - the store can inspect top-level fields without knowing the record type
//!
//! ## Usage
//!
//! ```
//! use sealstore_codec::{decode, encode};
//!
//! let bytes = encode(&("alice", 42u32)).unwrap();
//! let decoded: (String, u32) = decode(&bytes).unwrap();
//! assert_eq!(decoded, ("alice".to_string(), 42));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod error;
mod fields;

pub use canonical::{decode, decode_value, encode, encode_value, from_value, kind_of, to_value};
pub use ciborium::Value;
pub use error::{CodecError, CodecResult};
pub use fields::FieldMap;
