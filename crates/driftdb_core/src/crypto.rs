//! Encryption at rest for the commit log.
//!
//! Records are sealed with AES-256-GCM. The 64-byte key file splits into a
//! 32-byte cipher key and a 32-byte nonce-seed key; nonces derive
//! deterministically from the nonce seed and the record ordinal, so replay
//! on open reproduces the exact nonce sequence without storing nonces on
//! disk.

use crate::error::{CoreError, CoreResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the key material in bytes: a 32-byte AES-256 key followed by a
/// 32-byte nonce-seed key.
pub const KEY_SIZE: usize = 64;

/// Size of the cipher half of the key.
const CIPHER_KEY_SIZE: usize = 32;

/// Size of a GCM nonce in bytes.
const NONCE_SIZE: usize = 12;

/// Encryption key for a database file.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeySize` if the slice is not exactly 64 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    fn cipher_key(&self) -> &[u8] {
        &self.bytes[..CIPHER_KEY_SIZE]
    }

    fn nonce_seed(&self) -> &[u8] {
        &self.bytes[CIPHER_KEY_SIZE..]
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals and opens commit log record payloads.
pub(crate) struct RecordCipher {
    cipher: Aes256Gcm,
    nonce_seed: [u8; CIPHER_KEY_SIZE],
}

impl RecordCipher {
    /// Creates a cipher from key material.
    pub fn new(key: &EncryptionKey) -> CoreResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(key.cipher_key())
            .map_err(|_| CoreError::encryption_failed("invalid cipher key length"))?;
        let mut nonce_seed = [0u8; CIPHER_KEY_SIZE];
        nonce_seed.copy_from_slice(key.nonce_seed());
        Ok(Self { cipher, nonce_seed })
    }

    /// Derives the nonce for a record ordinal.
    fn nonce_for(&self, ordinal: u64) -> [u8; NONCE_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(self.nonce_seed);
        hasher.update(ordinal.to_le_bytes());
        let digest = hasher.finalize();
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&digest[..NONCE_SIZE]);
        nonce
    }

    /// Encrypts a record payload.
    pub fn seal(&self, ordinal: u64, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        let nonce = self.nonce_for(ordinal);
        self.cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CoreError::encryption_failed("AEAD seal failed"))
    }

    /// Decrypts a record payload.
    ///
    /// # Errors
    ///
    /// Returns `DecryptionFailed` on a wrong key or tampered ciphertext.
    pub fn open(&self, ordinal: u64, ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
        let nonce = self.nonce_for(ordinal);
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| {
                CoreError::decryption_failed(format!("record {ordinal} failed authentication"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EncryptionKey {
        let mut bytes = [0u8; KEY_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        EncryptionKey::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn key_size_is_checked() {
        assert!(matches!(
            EncryptionKey::from_bytes(&[0u8; 32]),
            Err(CoreError::InvalidKeySize {
                expected: 64,
                actual: 32
            })
        ));
    }

    #[test]
    fn seal_open_roundtrip() {
        let cipher = RecordCipher::new(&test_key()).unwrap();
        let sealed = cipher.seal(7, b"payload").unwrap();
        assert_ne!(sealed, b"payload");
        assert_eq!(cipher.open(7, &sealed).unwrap(), b"payload");
    }

    #[test]
    fn wrong_ordinal_fails_authentication() {
        let cipher = RecordCipher::new(&test_key()).unwrap();
        let sealed = cipher.seal(7, b"payload").unwrap();
        assert!(cipher.open(8, &sealed).is_err());
    }

    #[test]
    fn nonces_are_deterministic_and_distinct() {
        let cipher = RecordCipher::new(&test_key()).unwrap();
        assert_eq!(cipher.nonce_for(1), cipher.nonce_for(1));
        assert_ne!(cipher.nonce_for(1), cipher.nonce_for(2));
    }

    #[test]
    fn debug_redacts_key_material() {
        let key = test_key();
        assert!(!format!("{key:?}").contains("01"));
    }
}
