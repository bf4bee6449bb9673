//! # SealStore Testkit
//!
//! Test utilities for SealStore.
//!
//! This crate provides:
//! - Test fixtures: temporary stores and sample record types
//! - Property-based test generators using proptest
//! - A fault-injecting storage backend for commit failure and recovery tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sealstore_testkit::prelude::*;
//!
//! #[test]
//! fn saves_users() {
//!     with_memory_store(EncryptionStrategy::None, |manager| {
//!         manager.save(&User::sample("1")).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use sealstore_core::{EncryptionKey, EncryptionStrategy};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
