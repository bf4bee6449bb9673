//! Verify command implementation.

use super::scan_store;
use sealstore_codec::decode_value;
use sealstore_core::{
    AesGcmProvider, CoreError, EncryptionKey, EncryptionStrategy, Envelope, PayloadMode, Pipeline,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Frames checked.
    pub frames_checked: usize,
    /// Bytes after the last valid frame.
    pub torn_bytes: u64,
    /// Payloads that opened and decoded.
    pub payloads_ok: usize,
    /// Encrypted payloads skipped for lack of a key.
    pub payloads_skipped: usize,
    /// Individually sealed fields that opened.
    pub fields_opened: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, key_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {}", path.display());
    println!();

    let key = key_file.map(read_key).transpose()?;
    let result = verify(path, key.as_ref())?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}

fn read_key(path: &Path) -> Result<EncryptionKey, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    Ok(EncryptionKey::from_bytes(&bytes)?)
}

/// Checks the commit log and every live payload of the store at `path`.
pub fn verify(
    path: &Path,
    key: Option<&EncryptionKey>,
) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();

    let scan = match scan_store(path) {
        Ok(scan) => scan,
        Err(err) => match err.downcast::<CoreError>() {
            Ok(corrupt) => {
                result.errors.push(corrupt.to_string());
                return Ok(result);
            }
            Err(other) => return Err(other),
        },
    };
    result.frames_checked = scan.frames.len();
    result.torn_bytes = scan.torn_bytes();

    let full = key.map(|key| pipeline(EncryptionStrategy::Full(key.clone())));
    let selective = key.map(|key| pipeline(EncryptionStrategy::Selective(key.clone())));

    for envelope in scan.replay().values() {
        let checked = match envelope.mode {
            PayloadMode::Plain => decode_value(&envelope.payload).map(|_| ()).map_err(CoreError::from),
            PayloadMode::Sealed => match &full {
                Some(pipeline) => open_sealed(pipeline, envelope),
                None => {
                    result.payloads_skipped += 1;
                    continue;
                }
            },
            PayloadMode::FieldSealed => match &selective {
                Some(pipeline) => pipeline.open_untyped(envelope).map(|(_, opened)| {
                    result.fields_opened += opened;
                }),
                None => decode_value(&envelope.payload).map(|_| ()).map_err(CoreError::from),
            },
        };

        match checked {
            Ok(()) => {
                result.payloads_ok += 1;
                debug!(envelope = %envelope.key(), mode = %envelope.mode, "payload ok");
            }
            Err(err) => result.errors.push(format!("{}: {err}", envelope.key())),
        }
    }

    info!(
        frames = result.frames_checked,
        payloads = result.payloads_ok,
        errors = result.errors.len(),
        "verification finished"
    );
    Ok(result)
}

fn pipeline(strategy: EncryptionStrategy) -> Pipeline {
    Pipeline::new(strategy, Arc::new(AesGcmProvider))
}

fn open_sealed(pipeline: &Pipeline, envelope: &Envelope) -> Result<(), CoreError> {
    let clear = pipeline.transform_on_read(envelope)?;
    decode_value(&clear)?;
    Ok(())
}

fn print_result(result: &VerifyResult) {
    println!("  Frames checked:    {}", result.frames_checked);
    println!("  Payloads ok:       {}", result.payloads_ok);
    if result.payloads_skipped > 0 {
        println!(
            "  Payloads skipped:  {} (encrypted, no key given)",
            result.payloads_skipped
        );
    }
    if result.fields_opened > 0 {
        println!("  Fields opened:     {}", result.fields_opened);
    }
    if result.torn_bytes > 0 {
        println!(
            "  Torn tail:         {} bytes (truncated on next open)",
            result.torn_bytes
        );
    }
    for error in &result.errors {
        println!("  Error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::populated_store;
    use sealstore_core::log_path;
    use std::fs::OpenOptions;
    use std::io::Write;

    #[test]
    fn test_verify_with_key() {
        let key = EncryptionKey::generate();
        let (_dir, path) = populated_store(EncryptionStrategy::Selective(key.clone()));

        let result = verify(&path, Some(&key)).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.payloads_ok, 3);
        assert_eq!(result.fields_opened, 3);
    }

    #[test]
    fn test_verify_without_key_skips_sealed() {
        let (_dir, path) = populated_store(EncryptionStrategy::Full(EncryptionKey::generate()));
        let result = verify(&path, None).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.payloads_skipped, 3);
    }

    #[test]
    fn test_verify_wrong_key_fails() {
        let (_dir, path) = populated_store(EncryptionStrategy::Full(EncryptionKey::generate()));
        let result = verify(&path, Some(&EncryptionKey::generate())).unwrap();
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_verify_reports_torn_tail() {
        let (_dir, path) = populated_store(EncryptionStrategy::None);
        let mut log = OpenOptions::new()
            .append(true)
            .open(log_path(&path))
            .unwrap();
        log.write_all(b"SSLG").unwrap();

        let result = verify(&path, None).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.torn_bytes, 4);
    }
}
