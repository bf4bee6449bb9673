//! Authenticated encryption providers.

use super::key::EncryptionKey;
use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// An AEAD implementation used by the encryption pipeline.
///
/// `open` must fail with [`CoreError::DecryptionFailed`] for any input that
/// `seal` did not produce under the same key and associated data.
pub trait EncryptionProvider: Send + Sync {
    /// Short algorithm name, used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EncryptionFailed`] if the cipher rejects the input.
    fn seal(&self, key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>>;

    /// Decrypts and authenticates a blob produced by [`seal`](Self::seal).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DecryptionFailed`] on a wrong key, wrong `aad`,
    /// tampering or malformed input.
    fn open(&self, key: &EncryptionKey, ciphertext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>>;
}

/// AES-256-GCM with a random 96-bit nonce per seal.
///
/// Output format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmProvider;

impl AesGcmProvider {
    fn cipher(key: &EncryptionKey) -> Aes256Gcm {
        Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()))
    }
}

impl EncryptionProvider for AesGcmProvider {
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }

    fn seal(&self, key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = Self::cipher(key)
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CoreError::encryption_failed("AES-GCM seal rejected input"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn open(&self, key: &EncryptionKey, ciphertext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::decryption_failed("ciphertext too short"));
        }

        let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
        Self::cipher(key)
            .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
            .map_err(|_| CoreError::decryption_failed("authentication failed"))
    }
}
