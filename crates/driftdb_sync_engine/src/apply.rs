//! Message-stream driver.
//!
//! Consumes a captured stream of `ident`, `download`, and `upload`
//! messages and brings a database to the state they describe. Messages
//! are processed in strict stream order; a parse failure is fatal, while
//! an engine refusal (bad ordering, ident mismatch) is logged and
//! counted but does not stop the run.

use crate::applier::InstructionApplier;
use crate::error::IntegrationError;
use crate::history::ClientHistory;
use driftdb_core::{CoreError, Database};
use driftdb_sync_protocol::{parse_message, InputCursor, Message, WireError};
use std::sync::Arc;
use tracing::{debug, error};

/// Counters describing one driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Messages parsed off the stream.
    pub messages: u64,
    /// Download batches the history accepted.
    pub downloads_integrated: u64,
    /// Upload changesets applied as write transactions.
    pub upload_changesets_applied: u64,
    /// Engine refusals that were logged and skipped.
    pub integration_failures: u64,
}

/// Fatal driver failures.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// The stream does not parse.
    #[error("could not find message in input file")]
    Parse(#[source] WireError),

    /// The database failed underneath the driver.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// History metadata does not decode.
    #[error(transparent)]
    Integration(IntegrationError),
}

/// Applies every message in `input` to the database, in order.
///
/// Returns the run's counters on success.
///
/// # Errors
///
/// Returns [`ApplyError::Parse`] on the first unparseable message (after
/// logging it), and database/metadata errors when the machinery under
/// the engine fails. Engine refusals are not fatal; they increment
/// `integration_failures` and the run continues.
pub fn apply_message_stream(
    db: &Arc<Database>,
    history: &ClientHistory,
    input: &[u8],
) -> Result<ApplyStats, ApplyError> {
    let mut cursor = InputCursor::new(input);
    let mut stats = ApplyStats::default();

    while !cursor.is_empty() {
        let (message, rest) = match parse_message(cursor) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("could not find message in input file");
                return Err(ApplyError::Parse(e));
            }
        };
        cursor = rest;
        stats.messages += 1;

        match message {
            Message::Ident(ident) => {
                match history.set_client_file_ident(ident.file_ident, true) {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(ApplyError::Integration(e)),
                    Err(e) => {
                        error!("failed to record client file ident: {e}");
                        stats.integration_failures += 1;
                    }
                }
            }
            Message::Download(download) => {
                match history.integrate_server_changesets(
                    &download.progress,
                    download.downloadable_bytes,
                    &download.changesets,
                ) {
                    Ok(info) => {
                        stats.downloads_integrated += 1;
                        debug!(
                            "integrated server changesets up to version {} as {}",
                            info.server_version, info.local_version
                        );
                    }
                    Err(e) if e.is_fatal() => return Err(ApplyError::Integration(e)),
                    Err(e) => {
                        error!("failed to integrate server changesets: {e}");
                        stats.integration_failures += 1;
                    }
                }
            }
            Message::Upload(upload) => {
                for changeset in &upload.changesets {
                    let mut txn = db.begin_write();
                    InstructionApplier::new(&mut txn).apply(changeset);
                    history.record_local_changeset(&mut txn, changeset);
                    let version = txn.commit()?;
                    debug!("integrated local changesets as version {version}");
                    stats.upload_changesets_applied += 1;
                }
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_core::Options;

    #[test]
    fn empty_input_is_a_clean_run() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("db"), Options::default()).unwrap());
        let history = ClientHistory::new(Arc::clone(&db));

        let stats = apply_message_stream(&db, &history, b"").unwrap();
        assert_eq!(stats, ApplyStats::default());
    }
}
