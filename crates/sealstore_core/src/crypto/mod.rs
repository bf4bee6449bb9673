//! Cryptographic primitives for SealStore.
//!
//! ## Security Model
//!
//! - AES-256-GCM authenticated encryption by default
//! - Fresh random nonce per seal
//! - Associated data binds every ciphertext to its envelope
//! - Keys are zeroized on drop and never logged
//!
//! Providers are pluggable through [`EncryptionProvider`]; the store only
//! requires that `open` rejects anything `seal` did not produce for the same
//! key and associated data.

mod key;
mod provider;

pub use key::{EncryptionKey, KEY_SIZE};
pub use provider::{AesGcmProvider, EncryptionProvider, NONCE_SIZE, TAG_SIZE};
