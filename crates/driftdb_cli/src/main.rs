//! driftdb-apply
//!
//! Applies a captured stream of sync messages (`ident`, `download`,
//! `upload`) to a DriftDB database file, bringing it to the state the
//! messages describe.
//!
//! ```text
//! driftdb-apply -d <PATH-TO-DATABASE> -i <PATH-TO-MESSAGES> [OPTIONS]
//! ```

use clap::Parser;
use driftdb_core::{Database, EncryptionKey, Options, KEY_SIZE};
use driftdb_sync_engine::{apply_message_stream, ApplyError, ClientHistory};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Apply a captured sync message stream to a database file.
#[derive(Parser)]
#[command(name = "driftdb-apply", disable_version_flag = true)]
struct Cli {
    /// Database file to create and/or have state applied to
    #[arg(short = 'd', long)]
    database: Option<PathBuf>,

    /// File containing the captured message stream
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    /// File containing exactly 64 bytes of encryption key material
    #[arg(short = 'e', long)]
    encryption_key: Option<PathBuf>,

    /// Log all levels (including trace) to stderr; default is error only
    #[arg(long)]
    verbose: bool,

    /// Print the release identifier and exit
    #[arg(short = 'v', long)]
    version: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("trace")
    } else {
        EnvFilter::new("error")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if cli.version {
        println!("driftdb-apply {}", driftdb_core::VERSION);
        return ExitCode::SUCCESS;
    }

    let Some(database_path) = cli.database else {
        error!("missing path to database to apply changesets to");
        return ExitCode::FAILURE;
    };
    let Some(input_path) = cli.input else {
        error!("missing path to messages to apply to database");
        return ExitCode::FAILURE;
    };

    let encryption_key = match cli.encryption_key {
        None => None,
        Some(key_path) => match load_key(&key_path) {
            Ok(key) => Some(key),
            Err(message) => {
                error!("{message}");
                return ExitCode::FAILURE;
            }
        },
    };

    let options = Options {
        create_if_missing: true,
        encryption_key,
    };
    let db = match Database::open(&database_path, options) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("failed to open database {}: {e}", database_path.display());
            return ExitCode::FAILURE;
        }
    };
    let history = ClientHistory::new(Arc::clone(&db));

    let input = match std::fs::read(&input_path) {
        Ok(contents) => contents,
        Err(e) => {
            error!("failed to read input {}: {e}", input_path.display());
            return ExitCode::FAILURE;
        }
    };

    match apply_message_stream(&db, &history, &input) {
        Ok(stats) => {
            debug!(
                "applied {} messages ({} downloads, {} upload changesets, {} refusals)",
                stats.messages,
                stats.downloads_integrated,
                stats.upload_changesets_applied,
                stats.integration_failures
            );
            ExitCode::SUCCESS
        }
        // The driver already logged the parse failure.
        Err(ApplyError::Parse(_)) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Loads the 64-byte key file.
fn load_key(path: &std::path::Path) -> Result<EncryptionKey, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("failed to read encryption key {}: {e}", path.display()))?;
    if bytes.len() != KEY_SIZE {
        return Err(format!(
            "encryption key {} is {} bytes, expected exactly {KEY_SIZE}",
            path.display(),
            bytes.len()
        ));
    }
    EncryptionKey::from_bytes(&bytes).map_err(|e| e.to_string())
}
