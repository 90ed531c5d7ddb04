//! # DriftDB Sync Engine
//!
//! History tracking and state application for the DriftDB sync protocol.
//!
//! This crate provides:
//! - `ClientHistory`: append-only log of integrated changesets with
//!   progress cursors, persisted in a reserved collection
//! - `InstructionApplier`: applies changeset instructions inside a
//!   write transaction
//! - `apply_message_stream`: the driver loop that consumes a captured
//!   message stream and brings a database to the described state

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod applier;
mod apply;
mod error;
mod history;

pub use applier::InstructionApplier;
pub use apply::{apply_message_stream, ApplyError, ApplyStats};
pub use error::{IntegrationError, IntegrationResult};
pub use history::{ClientHistory, VersionInfo};
