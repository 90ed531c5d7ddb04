//! # DriftDB Sync Protocol
//!
//! Wire format for the DriftDB sync message stream.
//!
//! This crate provides:
//! - `InputCursor` and `HeaderScanner` for the text headers
//! - `MessageBody` framing with optional zlib compression
//! - `Message` parsing and encoding (`ident`, `download`, `upload`)
//! - The binary changeset codec (`Instruction` lists)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod body;
mod changeset;
mod error;
mod input;
mod messages;
mod types;

pub use body::{compress_body, MessageBody};
pub use changeset::{
    decode_instructions, encode_instructions, Changeset, ChangesetDecodeError, ChangesetResult,
    Instruction, RemoteChangeset,
};
pub use error::{WireError, WireResult};
pub use input::{HeaderScanner, InputCursor};
pub use messages::{
    parse_message, DownloadMessage, Message, ServerIdentMessage, SessionIdent, UploadMessage,
};
pub use types::{DownloadCursor, SaltedFileIdent, SaltedVersion, SyncProgress, UploadCursor};
