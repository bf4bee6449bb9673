//! CLI command implementations.

pub mod inspect;
pub mod verify;

use sealstore_core::{log_path, scan, LogScan};
use sealstore_storage::FileBackend;
use std::path::Path;

/// Scans the commit log of the store at `path` without taking ownership of
/// the store or modifying the log.
pub fn scan_store(path: &Path) -> Result<LogScan, Box<dyn std::error::Error>> {
    let log = log_path(path);
    if !log.is_file() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    let backend = FileBackend::open(&log)?;
    Ok(scan(&backend)?)
}
