//! # SealStore Storage
//!
//! Byte-store backends for SealStore.
//!
//! This crate is the lowest layer of the store. A backend is an **opaque,
//! append-oriented byte store**: it knows nothing about envelopes, frames or
//! encryption. The commit log in `sealstore_core` owns the on-disk format and
//! uses a backend only to append frames, read them back during recovery and
//! truncate a frame that failed to commit.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Ephemeral stores and tests
//! - [`FileBackend`] - Persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use sealstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
