//! # DriftDB Core
//!
//! Minimal embedded object store backing the DriftDB sync tooling.
//!
//! This crate provides:
//! - A single-file commit log with CRC-protected records
//! - Write transactions with strictly increasing commit versions
//! - Optional AES-256-GCM encryption at rest
//! - Crash recovery on open (a torn tail ends the log)
//!
//! The store is single-writer: `Database::begin_write()` hands out a
//! `WriteTransaction` that holds the write lock for its whole lifetime.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crypto;
mod database;
mod error;
mod transaction;
mod types;
mod wal;

pub use crypto::{EncryptionKey, KEY_SIZE};
pub use database::{Database, Options};
pub use error::{CoreError, CoreResult};
pub use transaction::WriteTransaction;
pub use types::{CollectionId, EntityId, Version};
pub use wal::{compute_crc32, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};

/// Release identifier of the DriftDB core engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
