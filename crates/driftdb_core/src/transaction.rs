//! Write transactions.

use crate::database::Database;
use crate::error::CoreResult;
use crate::types::{CollectionId, EntityId, Version};
use crate::wal::LogRecord;
use parking_lot::MutexGuard;

/// A write transaction holding the database's exclusive write lock.
///
/// Operations are staged in memory and become durable only at
/// [`WriteTransaction::commit`], which appends the staged records plus a
/// commit marker to the log and fsyncs. Dropping the transaction discards
/// all staged operations and releases the lock.
pub struct WriteTransaction<'db> {
    db: &'db Database,
    staged: Vec<LogRecord>,
    _guard: MutexGuard<'db, ()>,
}

impl<'db> WriteTransaction<'db> {
    pub(crate) fn new(db: &'db Database, guard: MutexGuard<'db, ()>) -> Self {
        Self {
            db,
            staged: Vec::new(),
            _guard: guard,
        }
    }

    /// Stages a put (insert or update) of an entity.
    pub fn put(&mut self, collection: CollectionId, entity: EntityId, payload: Vec<u8>) {
        self.staged.push(LogRecord::Put {
            collection,
            entity,
            payload,
        });
    }

    /// Stages the deletion of an entity.
    pub fn delete(&mut self, collection: CollectionId, entity: EntityId) {
        self.staged.push(LogRecord::Delete { collection, entity });
    }

    /// Stages the removal of every entity in a collection.
    pub fn clear(&mut self, collection: CollectionId) {
        self.staged.push(LogRecord::Clear { collection });
    }

    /// Reads an entity, observing this transaction's staged operations.
    #[must_use]
    pub fn get(&self, collection: CollectionId, entity: EntityId) -> Option<Vec<u8>> {
        for record in self.staged.iter().rev() {
            match record {
                LogRecord::Put {
                    collection: c,
                    entity: e,
                    payload,
                } if *c == collection && *e == entity => return Some(payload.clone()),
                LogRecord::Delete {
                    collection: c,
                    entity: e,
                } if *c == collection && *e == entity => return None,
                LogRecord::Clear { collection: c } if *c == collection => return None,
                _ => {}
            }
        }
        self.db.get(collection, entity)
    }

    /// Returns the number of staged operations.
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Commits the staged operations, producing a new version.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, encryption, or the log append fails;
    /// nothing is applied to committed state in that case.
    pub fn commit(self) -> CoreResult<Version> {
        let Self { db, staged, _guard } = self;
        db.commit_staged(staged)
        // _guard drops here, releasing the write lock
    }
}
