//! Error types for the sync engine.

use driftdb_core::CoreError;
use driftdb_sync_protocol::{ChangesetDecodeError, SaltedFileIdent};
use thiserror::Error;

/// Result type for integration operations.
pub type IntegrationResult<T> = Result<T, IntegrationError>;

/// Errors raised when the history engine refuses or fails to integrate.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Changeset versions in the batch are not strictly increasing and
    /// contiguous with previously integrated state.
    #[error(
        "changeset batch is out of order: previously integrated server \
         version {previous}, received {received}"
    )]
    BadChangesetOrder {
        /// Last server version integrated before the offending changeset.
        previous: u64,
        /// Server version of the offending changeset.
        received: u64,
    },

    /// The stored client file identity differs from the received one.
    #[error("client file ident already set to {stored:?}, refusing {received:?}")]
    FileIdentMismatch {
        /// Identity recorded in the history.
        stored: SaltedFileIdent,
        /// Identity carried by the message.
        received: SaltedFileIdent,
    },

    /// The received progress would move a cursor backwards.
    #[error("sync progress would regress: stored server version {stored}, received {received}")]
    ProgressRegression {
        /// Server version recorded in the history.
        stored: u64,
        /// Server version carried by the message.
        received: u64,
    },

    /// A changeset payload violates the binary schema.
    #[error("changeset decode failed: {0}")]
    Changeset(#[from] ChangesetDecodeError),

    /// Stored history metadata does not decode.
    #[error("history metadata is corrupted: {message}")]
    CorruptMetadata {
        /// Description of the corruption.
        message: String,
    },

    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(#[from] CoreError),
}

impl IntegrationError {
    /// Creates a corrupt metadata error.
    pub fn corrupt_metadata(message: impl Into<String>) -> Self {
        Self::CorruptMetadata {
            message: message.into(),
        }
    }

    /// Returns true for failures of the machinery underneath the engine
    /// (as opposed to the engine refusing a batch).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::CorruptMetadata { .. })
    }
}
