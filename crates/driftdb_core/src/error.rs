//! Error types for DriftDB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in DriftDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The commit log is corrupted.
    #[error("commit log corruption at offset {offset}: {message}")]
    LogCorruption {
        /// Byte offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// The file is encrypted but no key was supplied.
    #[error("database is encrypted and requires an encryption key")]
    EncryptionKeyRequired,

    /// A key was supplied but the file is not encrypted.
    #[error("database is not encrypted but an encryption key was supplied")]
    UnexpectedEncryptionKey,

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed (wrong key or tampered record).
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a commit log corruption error.
    pub fn log_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::LogCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
