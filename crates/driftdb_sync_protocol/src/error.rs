//! Error types for the wire layer.

use crate::changeset::ChangesetDecodeError;
use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while parsing the message stream.
#[derive(Debug, Error)]
pub enum WireError {
    /// Input ended in the middle of a field or body.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A field was empty where a value is required.
    #[error("empty field where a value is required")]
    EmptyField,

    /// A field was not followed by the expected delimiter.
    #[error("missing field delimiter")]
    MissingDelimiter,

    /// A numeric field overflows its declared width.
    #[error("integer field overflows its declared width")]
    IntegerOverflow,

    /// The message-type token is not valid UTF-8.
    #[error("message type token is not valid UTF-8")]
    BadToken,

    /// The message-type token names no known message.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A declared body size exceeds the available bytes.
    #[error("message body is bigger ({declared}) than available bytes ({available})")]
    BodyTooShort {
        /// Declared body size.
        declared: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The decompressor rejected the payload or produced the wrong size.
    #[error("error decompressing message body: {message}")]
    Decompression {
        /// Description of the failure.
        message: String,
    },

    /// A changeset's declared length exceeds the remaining body.
    #[error("changeset length is {declared} but buffer size is {available}")]
    ChangesetOverrun {
        /// Declared changeset size.
        declared: usize,
        /// Bytes remaining in the body.
        available: usize,
    },

    /// The changeset payload violates the binary schema.
    #[error("changeset decode failed: {0}")]
    Changeset(#[from] ChangesetDecodeError),
}

impl WireError {
    /// Creates a decompression error.
    pub fn decompression(message: impl Into<String>) -> Self {
        Self::Decompression {
            message: message.into(),
        }
    }
}
