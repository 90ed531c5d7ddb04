//! Database facade and recovery.

use crate::crypto::{EncryptionKey, RecordCipher};
use crate::error::{CoreError, CoreResult};
use crate::transaction::WriteTransaction;
use crate::types::{CollectionId, EntityId, Version};
use crate::wal::{
    compute_crc32, frame_record, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION,
    RECORD_HEADER_SIZE, RECORD_TRAILER_SIZE,
};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Magic bytes at the start of a database file.
const FILE_MAGIC: [u8; 8] = *b"DRIFTDB\x01";

/// Size of the file header.
const FILE_HEADER_SIZE: usize = 16;

/// Current file format version.
const FORMAT_VERSION: u32 = 1;

/// Header flag: commit log payloads are encrypted.
const FLAG_ENCRYPTED: u32 = 1;

/// Options for opening a database.
#[derive(Debug)]
pub struct Options {
    /// Create the file when it does not exist.
    pub create_if_missing: bool,
    /// Encrypt record payloads at rest.
    pub encryption_key: Option<EncryptionKey>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            encryption_key: None,
        }
    }
}

/// Committed database state.
struct State {
    entities: HashMap<(CollectionId, EntityId), Vec<u8>>,
    version: Version,
}

/// The main database handle.
///
/// `Database` owns a single-file commit log. All writes go through
/// [`Database::begin_write`], which enforces single-writer semantics by
/// holding an exclusive lock for the transaction's lifetime. The file
/// itself carries an exclusive OS lock so two processes cannot open the
/// same database concurrently.
pub struct Database {
    file: Mutex<std::fs::File>,
    state: RwLock<State>,
    write_lock: Mutex<()>,
    cipher: Option<RecordCipher>,
    /// Ordinal of the next record to be written; drives nonce derivation.
    record_seq: AtomicU64,
}

impl Database {
    /// Opens a database file, creating it when missing (per `options`).
    ///
    /// Replays the commit log to rebuild in-memory state. A torn tail
    /// (an incomplete record, or records after the last commit marker)
    /// is truncated; a corrupt record before the last commit is an error.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` if another process holds the file,
    /// `EncryptionKeyRequired`/`UnexpectedEncryptionKey` on a key/flag
    /// mismatch, and corruption or I/O errors from replay.
    pub fn open(path: &Path, options: Options) -> CoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(options.create_if_missing)
            .open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| CoreError::DatabaseLocked)?;

        let cipher = match &options.encryption_key {
            Some(key) => Some(RecordCipher::new(key)?),
            None => None,
        };

        let file_len = file.metadata()?.len();
        let mut state = State {
            entities: HashMap::new(),
            version: Version::new(0),
        };
        let record_seq;

        if file_len == 0 {
            let mut header = [0u8; FILE_HEADER_SIZE];
            header[..8].copy_from_slice(&FILE_MAGIC);
            header[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
            let flags = if cipher.is_some() { FLAG_ENCRYPTED } else { 0 };
            header[12..16].copy_from_slice(&flags.to_le_bytes());
            file.write_all(&header)?;
            file.sync_data()?;
            record_seq = 0;
        } else {
            let mut contents = Vec::new();
            file.seek(SeekFrom::Start(0))?;
            file.read_to_end(&mut contents)?;
            let (replayed, valid_len) = Self::replay(&contents, cipher.as_ref(), &mut state)?;
            record_seq = replayed;
            if (valid_len as u64) < file_len {
                file.set_len(valid_len as u64)?;
                file.sync_data()?;
            }
        }

        file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file: Mutex::new(file),
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
            cipher,
            record_seq: AtomicU64::new(record_seq),
        })
    }

    /// Validates the file header and replays committed records.
    ///
    /// Returns the number of durable records and the byte length of the
    /// durable prefix (everything after the last commit marker is torn).
    fn replay(
        contents: &[u8],
        cipher: Option<&RecordCipher>,
        state: &mut State,
    ) -> CoreResult<(u64, usize)> {
        if contents.len() < FILE_HEADER_SIZE {
            return Err(CoreError::invalid_format("file too small for header"));
        }
        if contents[..8] != FILE_MAGIC {
            return Err(CoreError::invalid_format("bad file magic"));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&contents[8..12]);
        let format_version = u32::from_le_bytes(raw);
        if format_version != FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported format version {format_version}"
            )));
        }
        raw.copy_from_slice(&contents[12..16]);
        let flags = u32::from_le_bytes(raw);
        let encrypted = flags & FLAG_ENCRYPTED != 0;
        if encrypted && cipher.is_none() {
            return Err(CoreError::EncryptionKeyRequired);
        }
        if !encrypted && cipher.is_some() {
            return Err(CoreError::UnexpectedEncryptionKey);
        }

        let mut pos = FILE_HEADER_SIZE;
        let mut ordinal: u64 = 0;
        let mut staged: Vec<LogRecord> = Vec::new();
        // Durable high-water marks, advanced at each commit record.
        let mut durable_len = FILE_HEADER_SIZE;
        let mut durable_records: u64 = 0;

        while pos < contents.len() {
            let remaining = &contents[pos..];
            if remaining.len() < RECORD_HEADER_SIZE {
                break; // torn tail
            }
            if remaining[..4] != LOG_MAGIC {
                return Err(CoreError::log_corruption(pos as u64, "bad record magic"));
            }
            let mut raw2 = [0u8; 2];
            raw2.copy_from_slice(&remaining[4..6]);
            if u16::from_le_bytes(raw2) != LOG_VERSION {
                return Err(CoreError::log_corruption(
                    pos as u64,
                    "unsupported record version",
                ));
            }
            let record_type = LogRecordType::from_byte(remaining[6]).ok_or_else(|| {
                CoreError::log_corruption(pos as u64, "unknown record type")
            })?;
            raw.copy_from_slice(&remaining[7..11]);
            let payload_len = u32::from_le_bytes(raw) as usize;
            let total = RECORD_HEADER_SIZE + payload_len + RECORD_TRAILER_SIZE;
            if remaining.len() < total {
                break; // torn tail
            }

            let mut stored_crc = [0u8; 4];
            stored_crc.copy_from_slice(&remaining[total - RECORD_TRAILER_SIZE..total]);
            let expected = u32::from_le_bytes(stored_crc);
            let actual = compute_crc32(&remaining[..total - RECORD_TRAILER_SIZE]);
            if expected != actual {
                return Err(CoreError::ChecksumMismatch { expected, actual });
            }

            let payload = &remaining[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + payload_len];
            let plain = match cipher {
                Some(cipher) => cipher.open(ordinal, payload)?,
                None => payload.to_vec(),
            };
            let record = LogRecord::decode_payload(record_type, &plain).map_err(|e| match e {
                CoreError::LogCorruption { message, .. } => {
                    CoreError::log_corruption(pos as u64, message)
                }
                other => other,
            })?;

            ordinal += 1;
            pos += total;

            match record {
                LogRecord::Commit { version } => {
                    for op in staged.drain(..) {
                        Self::apply_record(state, op);
                    }
                    state.version = version;
                    durable_len = pos;
                    durable_records = ordinal;
                }
                op => staged.push(op),
            }
        }

        Ok((durable_records, durable_len))
    }

    fn apply_record(state: &mut State, record: LogRecord) {
        match record {
            LogRecord::Put {
                collection,
                entity,
                payload,
            } => {
                state.entities.insert((collection, entity), payload);
            }
            LogRecord::Delete { collection, entity } => {
                state.entities.remove(&(collection, entity));
            }
            LogRecord::Clear { collection } => {
                state.entities.retain(|(c, _), _| *c != collection);
            }
            LogRecord::Commit { .. } => {}
        }
    }

    /// Starts a write transaction.
    ///
    /// Blocks until the exclusive write lock is available; the returned
    /// transaction holds the lock until committed or dropped.
    pub fn begin_write(&self) -> WriteTransaction<'_> {
        WriteTransaction::new(self, self.write_lock.lock())
    }

    /// Returns the committed payload for an entity, if present.
    #[must_use]
    pub fn get(&self, collection: CollectionId, entity: EntityId) -> Option<Vec<u8>> {
        self.state.read().entities.get(&(collection, entity)).cloned()
    }

    /// Returns the current committed version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.state.read().version
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Appends the staged records plus a commit marker, fsyncs, and
    /// applies the batch to in-memory state.
    ///
    /// Caller must hold the write lock (enforced by `WriteTransaction`).
    pub(crate) fn commit_staged(&self, staged: Vec<LogRecord>) -> CoreResult<Version> {
        let version = self.state.read().version.next();
        let commit = LogRecord::Commit { version };

        let mut buf = Vec::new();
        let mut ordinal = self.record_seq.load(Ordering::Acquire);
        for record in staged.iter().chain(std::iter::once(&commit)) {
            let mut payload = record.encode_payload()?;
            if let Some(cipher) = &self.cipher {
                payload = cipher.seal(ordinal, &payload)?;
            }
            buf.extend_from_slice(&frame_record(record.record_type(), &payload));
            ordinal += 1;
        }

        {
            let mut file = self.file.lock();
            file.write_all(&buf)?;
            file.sync_data()?;
        }
        self.record_seq.store(ordinal, Ordering::Release);

        let mut state = self.state.write();
        for record in staged {
            Self::apply_record(&mut state, record);
        }
        state.version = version;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;

    fn collection(id: u32) -> CollectionId {
        CollectionId::new(id)
    }

    fn entity(fill: u8) -> EntityId {
        EntityId::from_bytes([fill; 16])
    }

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes(&[0x5Au8; KEY_SIZE]).unwrap()
    }

    #[test]
    fn put_commit_get() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("db"), Options::default()).unwrap();

        let mut txn = db.begin_write();
        txn.put(collection(1), entity(1), vec![1, 2, 3]);
        let version = txn.commit().unwrap();

        assert_eq!(version, Version::new(1));
        assert_eq!(db.get(collection(1), entity(1)), Some(vec![1, 2, 3]));
    }

    #[test]
    fn versions_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("db"), Options::default()).unwrap();

        let mut versions = Vec::new();
        for i in 0..5u8 {
            let mut txn = db.begin_write();
            txn.put(collection(1), entity(i), vec![i]);
            versions.push(txn.commit().unwrap());
        }
        for pair in versions.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn dropped_transaction_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("db"), Options::default()).unwrap();

        {
            let mut txn = db.begin_write();
            txn.put(collection(1), entity(1), vec![1]);
            // dropped without commit
        }
        assert_eq!(db.get(collection(1), entity(1)), None);
        assert_eq!(db.version(), Version::new(0));
    }

    #[test]
    fn reopen_replays_committed_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let db = Database::open(&path, Options::default()).unwrap();
            let mut txn = db.begin_write();
            txn.put(collection(1), entity(1), vec![9]);
            txn.delete(collection(1), entity(2));
            txn.commit().unwrap();
        }

        let db = Database::open(&path, Options::default()).unwrap();
        assert_eq!(db.get(collection(1), entity(1)), Some(vec![9]));
        assert_eq!(db.version(), Version::new(1));
    }

    #[test]
    fn clear_removes_only_that_collection() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("db"), Options::default()).unwrap();

        let mut txn = db.begin_write();
        txn.put(collection(1), entity(1), vec![1]);
        txn.put(collection(2), entity(1), vec![2]);
        txn.commit().unwrap();

        let mut txn = db.begin_write();
        txn.clear(collection(1));
        txn.commit().unwrap();

        assert_eq!(db.get(collection(1), entity(1)), None);
        assert_eq!(db.get(collection(2), entity(1)), Some(vec![2]));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let db = Database::open(&path, Options::default()).unwrap();
            let mut txn = db.begin_write();
            txn.put(collection(1), entity(1), vec![1]);
            txn.commit().unwrap();
        }

        // Append a partial record to simulate a crash mid-write.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&LOG_MAGIC).unwrap();
            file.write_all(&[0x01]).unwrap();
        }

        let db = Database::open(&path, Options::default()).unwrap();
        assert_eq!(db.get(collection(1), entity(1)), Some(vec![1]));
        assert_eq!(db.version(), Version::new(1));

        // The next commit lands cleanly after truncation.
        let mut txn = db.begin_write();
        txn.put(collection(1), entity(2), vec![2]);
        assert_eq!(txn.commit().unwrap(), Version::new(2));
    }

    #[test]
    fn encrypted_roundtrip_and_wrong_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let options = Options {
                encryption_key: Some(test_key()),
                ..Options::default()
            };
            let db = Database::open(&path, options).unwrap();
            let mut txn = db.begin_write();
            txn.put(collection(1), entity(1), vec![0xCA, 0xFE]);
            txn.commit().unwrap();
        }

        // Correct key sees the data.
        {
            let options = Options {
                encryption_key: Some(test_key()),
                ..Options::default()
            };
            let db = Database::open(&path, options).unwrap();
            assert_eq!(db.get(collection(1), entity(1)), Some(vec![0xCA, 0xFE]));
        }

        // Wrong key fails authentication instead of yielding garbage.
        let options = Options {
            encryption_key: Some(EncryptionKey::from_bytes(&[0x11u8; KEY_SIZE]).unwrap()),
            ..Options::default()
        };
        assert!(matches!(
            Database::open(&path, options),
            Err(CoreError::DecryptionFailed { .. })
        ));

        // Missing key is rejected up front.
        assert!(matches!(
            Database::open(&path, Options::default()),
            Err(CoreError::EncryptionKeyRequired)
        ));
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        let _db = Database::open(&path, Options::default()).unwrap();
        assert!(matches!(
            Database::open(&path, Options::default()),
            Err(CoreError::DatabaseLocked)
        ));
    }
}
