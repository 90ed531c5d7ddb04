//! Transactional instruction applier.

use driftdb_core::{CollectionId, EntityId, WriteTransaction};
use driftdb_sync_protocol::{Changeset, Instruction};
use tracing::trace;

/// Applies changeset instructions against live entities inside a write
/// transaction.
///
/// The applier is bound to a transaction for its lifetime; instructions
/// are applied in order and become durable only when the caller commits.
/// Dropping the transaction without committing discards everything the
/// applier staged.
pub struct InstructionApplier<'a, 'db> {
    txn: &'a mut WriteTransaction<'db>,
}

impl<'a, 'db> InstructionApplier<'a, 'db> {
    /// Binds an applier to a write transaction.
    pub fn new(txn: &'a mut WriteTransaction<'db>) -> Self {
        Self { txn }
    }

    /// Applies every instruction of a changeset in order.
    pub fn apply(&mut self, changeset: &Changeset) {
        trace!(
            "applying changeset version {} with {} instructions",
            changeset.version,
            changeset.instructions.len()
        );
        self.apply_instructions(&changeset.instructions);
    }

    /// Applies a bare instruction list in order.
    pub fn apply_instructions(&mut self, instructions: &[Instruction]) {
        for instruction in instructions {
            self.apply_instruction(instruction);
        }
    }

    fn apply_instruction(&mut self, instruction: &Instruction) {
        match instruction {
            Instruction::Put {
                collection_id,
                entity_id,
                payload,
            } => {
                self.txn.put(
                    CollectionId::new(*collection_id),
                    EntityId::from_bytes(*entity_id),
                    payload.clone(),
                );
            }
            Instruction::Delete {
                collection_id,
                entity_id,
            } => {
                self.txn
                    .delete(CollectionId::new(*collection_id), EntityId::from_bytes(*entity_id));
            }
            Instruction::Clear { collection_id } => {
                self.txn.clear(CollectionId::new(*collection_id));
            }
        }
    }
}
