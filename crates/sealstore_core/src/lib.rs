//! # SealStore Core
//!
//! Encrypted embedded record store.
//!
//! This crate provides:
//! - Per-store encryption strategies (none, whole-record, per-field)
//! - An append-only commit log with checksummed, atomic frames
//! - Staged contexts on an exclusive writer path and a non-blocking reader path
//! - Chunked batch operations with progress and cancellation
//! - Explicit, per-type schema migrations
//! - Related-record traversal
//!
//! ## Example
//!
//! ```rust,ignore
//! use sealstore_core::{EncryptionKey, EncryptionStrategy, Predicate, StorageManager};
//!
//! let key = EncryptionKey::derive_from_password(b"passphrase", b"app-salt")?;
//! let manager = StorageManager::open(path, EncryptionStrategy::Selective(key))?;
//!
//! manager.save(&user)?;
//! let adults: Vec<User> = manager.fetch_all(Some(&Predicate::field("age").ge(18)))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod crypto;
mod dir;
mod envelope;
mod error;
mod graph;
mod log;
mod manager;
mod migration;
mod pipeline;
mod predicate;
mod record;
mod stats;
mod store;
mod strategy;
mod types;

pub use config::{Config, DEFAULT_BATCH_CHUNK_SIZE, DEFAULT_MAX_GRAPH_DEPTH};
pub use context::{Context, ContextKind};
pub use crypto::{AesGcmProvider, EncryptionKey, EncryptionProvider, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use dir::log_path;
pub use envelope::{Envelope, EnvelopeKey};
pub use error::{CoreError, CoreResult};
pub use graph::{GraphEdge, GraphNode, RecordGraph};
pub use log::{encode_frame, scan, Frame, LogOp, LogScan, LOG_MAGIC, LOG_VERSION};
pub use manager::{BatchOptions, BatchReport, CancelToken, StorageManager};
pub use migration::{
    MigrationInfo, MigrationPlan, MigrationReport, MigrationRunResult, SchemaVersion,
    VersionedSchema,
};
pub use pipeline::{field_aad, record_aad, Pipeline};
pub use predicate::{Clause, ClauseBuilder, Comparison, Predicate};
pub use record::{Record, RecordRef, TypeDescriptor, TypeRegistry, RESERVED_PREFIX, SCHEMA_VERSIONS_TAG};
pub use stats::{OperationSnapshot, StoreStats, TypeStats};
pub use strategy::EncryptionStrategy;
pub use types::{CommitSeq, PayloadMode, RecordId};

pub use sealstore_codec::{FieldMap, Value};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
