//! Inspect command implementation.

use super::scan_store;
use crate::Format;
use sealstore_core::{StoreStats, TypeStats, SCHEMA_VERSIONS_TAG};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Commit log size in bytes.
    pub log_size: u64,
    /// Verified frames.
    pub frames: usize,
    /// Bytes after the last verified frame.
    pub torn_bytes: u64,
    /// Live records, schema markers excluded.
    pub records: usize,
    /// Census per record type.
    pub types: BTreeMap<String, TypeStats>,
    /// Schema versions recorded by migrations.
    pub schema_versions: usize,
}

impl InspectResult {
    fn from_stats(path: &Path, stats: StoreStats, frames: usize, torn_bytes: u64) -> Self {
        let mut types = stats.types;
        let schema_versions = types
            .remove(SCHEMA_VERSIONS_TAG)
            .map_or(0, |markers| markers.envelopes);
        Self {
            path: path.display().to_string(),
            log_size: stats.log_bytes,
            frames,
            torn_bytes,
            records: stats.envelopes - schema_versions,
            types,
            schema_versions,
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Format::Text => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Builds the inspection report for the store at `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let scan = scan_store(path)?;
    if scan.torn_bytes() > 0 {
        warn!(
            torn_bytes = scan.torn_bytes(),
            "log has an incomplete tail; it will be truncated on next open"
        );
    }

    let envelopes = scan.replay();
    let mut stats = StoreStats::from_envelopes(envelopes.values());
    stats.commits = scan.frames.len() as u64;
    stats.log_bytes = scan.total_len;
    Ok(InspectResult::from_stats(
        path,
        stats,
        scan.frames.len(),
        scan.torn_bytes(),
    ))
}

fn print_text_output(result: &InspectResult) {
    println!("SealStore Inspection");
    println!("====================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Log:");
    println!("  Size:        {}", format_size(result.log_size));
    println!("  Frames:      {}", result.frames);
    println!("  Torn bytes:  {}", result.torn_bytes);
    println!();
    println!("Records:       {}", result.records);
    println!("Schema marks:  {}", result.schema_versions);

    if !result.types.is_empty() {
        println!();
        println!("Types:");
        for (tag, stats) in &result.types {
            println!(
                "  {tag}: {} records ({} plain, {} sealed, {} field-sealed), {}",
                stats.envelopes,
                stats.plain,
                stats.sealed,
                stats.field_sealed,
                format_size(stats.payload_bytes)
            );
        }
    }
}

fn format_size(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", value / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", value / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", value / (1024.0 * 1024.0 * 1024.0))
    }
}
