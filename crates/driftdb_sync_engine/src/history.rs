//! Client-side sync history.
//!
//! History state lives in a reserved collection of the database itself,
//! so every integration commits the applied entities, the history log
//! row, and the progress advance in one crash-atomic transaction.

use crate::applier::InstructionApplier;
use crate::error::{IntegrationError, IntegrationResult};
use driftdb_core::{CollectionId, Database, EntityId, Version, WriteTransaction};
use driftdb_sync_protocol::{
    decode_instructions, Changeset, DownloadCursor, RemoteChangeset, SaltedFileIdent,
    SyncProgress, UploadCursor,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// Reserved collection holding sync metadata and the history log.
pub(crate) const SYNC_METADATA_COLLECTION: CollectionId = CollectionId::new(0xFFFF_FF00);

const FILE_IDENT_ENTITY: EntityId = EntityId::from_bytes([
    0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC,
    0x01,
]);
const PROGRESS_ENTITY: EntityId = EntityId::from_bytes([
    0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC,
    0x02,
]);
const DOWNLOADABLE_ENTITY: EntityId = EntityId::from_bytes([
    0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC,
    0x03,
]);

/// History log entity for an integrated remote changeset.
fn remote_log_entity(server_version: u64) -> EntityId {
    let mut bytes = [0u8; 16];
    bytes[0] = 0xA0;
    bytes[8..].copy_from_slice(&server_version.to_be_bytes());
    EntityId::from_bytes(bytes)
}

/// History log entity for a locally-applied changeset.
fn local_log_entity(client_version: u64) -> EntityId {
    let mut bytes = [0u8; 16];
    bytes[0] = 0xA1;
    bytes[8..].copy_from_slice(&client_version.to_be_bytes());
    EntityId::from_bytes(bytes)
}

/// Versions produced by an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    /// Database version produced by the integrating commit.
    pub local_version: Version,
    /// Server version the history now reflects.
    pub server_version: u64,
}

/// Append-only log of integrated changesets with progress cursors.
///
/// One `ClientHistory` owns the sync state of a database file. Remote
/// batches go through [`ClientHistory::integrate_server_changesets`];
/// locally-applied changesets are recorded inside the caller's
/// transaction via [`ClientHistory::record_local_changeset`].
pub struct ClientHistory {
    db: Arc<Database>,
}

impl ClientHistory {
    /// Creates a history bound to a database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Returns the underlying database.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Returns the recorded client file identity, if any.
    pub fn client_file_ident(&self) -> IntegrationResult<Option<SaltedFileIdent>> {
        match self.db.get(SYNC_METADATA_COLLECTION, FILE_IDENT_ENTITY) {
            None => Ok(None),
            Some(bytes) => {
                let values = decode_u64_row(&bytes, 2, "file ident")?;
                Ok(Some(SaltedFileIdent {
                    ident: values[0],
                    salt: values[1],
                }))
            }
        }
    }

    /// Records the server-assigned file identity.
    ///
    /// Idempotent when called with the identity already stored.
    ///
    /// # Errors
    ///
    /// Returns `FileIdentMismatch` when a different identity is already
    /// recorded.
    pub fn set_client_file_ident(
        &self,
        file_ident: SaltedFileIdent,
        fix_up_entity_ids: bool,
    ) -> IntegrationResult<()> {
        if let Some(stored) = self.client_file_ident()? {
            if stored == file_ident {
                return Ok(());
            }
            return Err(IntegrationError::FileIdentMismatch {
                stored,
                received: file_ident,
            });
        }

        let mut txn = self.db.begin_write();
        txn.put(
            SYNC_METADATA_COLLECTION,
            FILE_IDENT_ENTITY,
            encode_u64_row(&[file_ident.ident, file_ident.salt]),
        );
        txn.commit()?;
        debug!(
            "recorded client file ident {}/{}",
            file_ident.ident, file_ident.salt
        );
        if fix_up_entity_ids {
            // Entity ids are stable 128-bit values; there is nothing to
            // rewrite when the identity arrives.
            trace!("no entity id fix-up required");
        }
        Ok(())
    }

    /// Returns the stored sync progress (zeroed for a fresh file).
    pub fn progress(&self) -> IntegrationResult<SyncProgress> {
        match self.db.get(SYNC_METADATA_COLLECTION, PROGRESS_ENTITY) {
            None => Ok(SyncProgress::default()),
            Some(bytes) => {
                let values = decode_u64_row(&bytes, 4, "progress")?;
                Ok(SyncProgress {
                    download: DownloadCursor {
                        server_version: values[0],
                        last_integrated_client_version: values[1],
                    },
                    upload: UploadCursor {
                        client_version: values[2],
                        last_integrated_server_version: values[3],
                    },
                })
            }
        }
    }

    /// Returns the stored downloadable-bytes hint.
    pub fn downloadable_bytes(&self) -> IntegrationResult<u64> {
        match self.db.get(SYNC_METADATA_COLLECTION, DOWNLOADABLE_ENTITY) {
            None => Ok(0),
            Some(bytes) => Ok(decode_u64_row(&bytes, 1, "downloadable bytes")?[0]),
        }
    }

    /// Returns true when a remote changeset at `server_version` has been
    /// integrated.
    #[must_use]
    pub fn is_remote_integrated(&self, server_version: u64) -> bool {
        self.db
            .get(SYNC_METADATA_COLLECTION, remote_log_entity(server_version))
            .is_some()
    }

    /// Returns true when a local changeset at `client_version` has been
    /// recorded.
    #[must_use]
    pub fn is_local_recorded(&self, client_version: u64) -> bool {
        self.db
            .get(SYNC_METADATA_COLLECTION, local_log_entity(client_version))
            .is_some()
    }

    /// Atomically absorbs a contiguous run of remote changesets.
    ///
    /// In one write transaction: validates ordering, decodes and applies
    /// each changeset's instructions, appends one history row per
    /// changeset, and stores the advanced progress. A zero-length batch
    /// still persists the progress advance.
    ///
    /// # Errors
    ///
    /// Returns `BadChangesetOrder` when `remote_version` within the batch
    /// is not strictly increasing past the stored progress,
    /// `ProgressRegression` when the reported progress moves backwards,
    /// and decode or database errors otherwise. Nothing persists on
    /// error.
    pub fn integrate_server_changesets(
        &self,
        progress: &SyncProgress,
        downloadable_bytes: u64,
        changesets: &[RemoteChangeset],
    ) -> IntegrationResult<VersionInfo> {
        let stored = self.progress()?;
        if progress.download.server_version < stored.download.server_version {
            return Err(IntegrationError::ProgressRegression {
                stored: stored.download.server_version,
                received: progress.download.server_version,
            });
        }

        let mut txn = self.db.begin_write();
        let mut last = stored.download.server_version;
        for changeset in changesets {
            if changeset.remote_version <= last {
                return Err(IntegrationError::BadChangesetOrder {
                    previous: last,
                    received: changeset.remote_version,
                });
            }
            let instructions = decode_instructions(&changeset.payload)?;
            InstructionApplier::new(&mut txn).apply_instructions(&instructions);
            txn.put(
                SYNC_METADATA_COLLECTION,
                remote_log_entity(changeset.remote_version),
                encode_u64_row(&[
                    changeset.last_integrated_local_version,
                    changeset.origin_timestamp,
                    changeset.origin_file_ident,
                    changeset.original_size,
                ]),
            );
            last = changeset.remote_version;
        }

        txn.put(
            SYNC_METADATA_COLLECTION,
            PROGRESS_ENTITY,
            encode_u64_row(&[
                progress.download.server_version,
                progress.download.last_integrated_client_version,
                progress.upload.client_version,
                progress.upload.last_integrated_server_version,
            ]),
        );
        txn.put(
            SYNC_METADATA_COLLECTION,
            DOWNLOADABLE_ENTITY,
            encode_u64_row(&[downloadable_bytes]),
        );

        let local_version = txn.commit()?;
        debug!(
            "integrated {} server changesets as version {}",
            changesets.len(),
            local_version
        );
        Ok(VersionInfo {
            local_version,
            server_version: progress.download.server_version,
        })
    }

    /// Appends the history row for a locally-applied changeset inside
    /// the caller's transaction.
    pub fn record_local_changeset(&self, txn: &mut WriteTransaction<'_>, changeset: &Changeset) {
        txn.put(
            SYNC_METADATA_COLLECTION,
            local_log_entity(changeset.version),
            encode_u64_row(&[
                changeset.last_integrated_remote_version,
                changeset.origin_timestamp,
                changeset.origin_file_ident,
            ]),
        );
    }
}

fn encode_u64_row(values: &[u64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_u64_row(bytes: &[u8], count: usize, what: &str) -> IntegrationResult<Vec<u64>> {
    if bytes.len() != count * 8 {
        return Err(IntegrationError::corrupt_metadata(format!(
            "{what} row is {} bytes, expected {}",
            bytes.len(),
            count * 8
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            u64::from_le_bytes(raw)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_core::Options;
    use driftdb_sync_protocol::{encode_instructions, DownloadCursor, Instruction};

    fn open_history(dir: &tempfile::TempDir) -> ClientHistory {
        let db = Database::open(&dir.path().join("db"), Options::default()).unwrap();
        ClientHistory::new(Arc::new(db))
    }

    fn remote_changeset(version: u64, instructions: &[Instruction]) -> RemoteChangeset {
        let payload = encode_instructions(instructions);
        RemoteChangeset {
            remote_version: version,
            last_integrated_local_version: 0,
            origin_timestamp: 1_700_000_000,
            origin_file_ident: 1,
            original_size: payload.len() as u64,
            payload,
        }
    }

    fn progress_at(server_version: u64) -> SyncProgress {
        SyncProgress {
            download: DownloadCursor {
                server_version,
                last_integrated_client_version: 0,
            },
            ..SyncProgress::default()
        }
    }

    #[test]
    fn file_ident_is_idempotent_once_set() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir);
        let ident = SaltedFileIdent { ident: 7, salt: 13 };

        assert_eq!(history.client_file_ident().unwrap(), None);
        history.set_client_file_ident(ident, true).unwrap();
        assert_eq!(history.client_file_ident().unwrap(), Some(ident));

        // Same identity again is a no-op.
        history.set_client_file_ident(ident, true).unwrap();

        // A different identity is refused.
        let other = SaltedFileIdent { ident: 8, salt: 13 };
        assert!(matches!(
            history.set_client_file_ident(other, true),
            Err(IntegrationError::FileIdentMismatch { .. })
        ));
    }

    #[test]
    fn integration_applies_and_advances_progress() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir);

        let changesets = vec![
            remote_changeset(
                1,
                &[Instruction::Put {
                    collection_id: 10,
                    entity_id: [1u8; 16],
                    payload: vec![0xAA],
                }],
            ),
            remote_changeset(
                2,
                &[Instruction::Put {
                    collection_id: 10,
                    entity_id: [2u8; 16],
                    payload: vec![0xBB],
                }],
            ),
        ];

        let info = history
            .integrate_server_changesets(&progress_at(2), 128, &changesets)
            .unwrap();
        assert_eq!(info.server_version, 2);
        assert_eq!(info.local_version.as_u64(), 1);

        assert_eq!(history.progress().unwrap().download.server_version, 2);
        assert_eq!(history.downloadable_bytes().unwrap(), 128);
        assert!(history.is_remote_integrated(1));
        assert!(history.is_remote_integrated(2));
        assert!(!history.is_remote_integrated(3));

        let db = history.database();
        assert_eq!(
            db.get(CollectionId::new(10), EntityId::from_bytes([1u8; 16])),
            Some(vec![0xAA])
        );
    }

    #[test]
    fn empty_batch_still_advances_progress() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir);

        let info = history
            .integrate_server_changesets(&progress_at(5), 0, &[])
            .unwrap();
        assert_eq!(info.server_version, 5);
        assert_eq!(history.progress().unwrap().download.server_version, 5);
    }

    #[test]
    fn out_of_order_batch_is_refused_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir);

        history
            .integrate_server_changesets(&progress_at(3), 0, &[remote_changeset(3, &[])])
            .unwrap();
        let version_before = history.database().version();

        // Version 3 is already integrated.
        let stale = vec![
            remote_changeset(
                3,
                &[Instruction::Put {
                    collection_id: 10,
                    entity_id: [9u8; 16],
                    payload: vec![1],
                }],
            ),
            remote_changeset(4, &[]),
        ];
        assert!(matches!(
            history.integrate_server_changesets(&progress_at(4), 0, &stale),
            Err(IntegrationError::BadChangesetOrder {
                previous: 3,
                received: 3
            })
        ));

        // Nothing from the refused batch persisted.
        assert_eq!(history.database().version(), version_before);
        assert!(!history.is_remote_integrated(4));
        assert_eq!(
            history
                .database()
                .get(CollectionId::new(10), EntityId::from_bytes([9u8; 16])),
            None
        );
    }

    #[test]
    fn non_increasing_versions_within_batch_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir);

        let batch = vec![remote_changeset(2, &[]), remote_changeset(2, &[])];
        assert!(matches!(
            history.integrate_server_changesets(&progress_at(2), 0, &batch),
            Err(IntegrationError::BadChangesetOrder {
                previous: 2,
                received: 2
            })
        ));
    }

    #[test]
    fn progress_regression_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir);

        history
            .integrate_server_changesets(&progress_at(5), 0, &[])
            .unwrap();
        assert!(matches!(
            history.integrate_server_changesets(&progress_at(4), 0, &[]),
            Err(IntegrationError::ProgressRegression {
                stored: 5,
                received: 4
            })
        ));
    }

    #[test]
    fn undecodable_payload_refuses_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir);

        let bad = RemoteChangeset {
            remote_version: 1,
            last_integrated_local_version: 0,
            origin_timestamp: 0,
            origin_file_ident: 1,
            original_size: 7,
            payload: b"XXXXXXX".to_vec(),
        };
        assert!(matches!(
            history.integrate_server_changesets(&progress_at(1), 0, &[bad]),
            Err(IntegrationError::Changeset(_))
        ));
        assert_eq!(history.progress().unwrap().download.server_version, 0);
    }

    #[test]
    fn local_changesets_are_recorded_in_the_same_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let history = open_history(&dir);

        let changeset = Changeset {
            version: 9,
            last_integrated_remote_version: 2,
            origin_timestamp: 1_700_000_000,
            origin_file_ident: 7,
            instructions: Vec::new(),
        };

        let db = Arc::clone(history.database());
        let mut txn = db.begin_write();
        history.record_local_changeset(&mut txn, &changeset);
        txn.commit().unwrap();

        assert!(history.is_local_recorded(9));
        assert!(!history.is_local_recorded(8));
    }
}
