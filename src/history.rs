//! Undo/redo history over committed edit transactions.
//!
//! The manager maintains two stacks:
//! - `undo_stack`: committed transactions that can be reverted
//! - `redo_stack`: reverted transactions that can be re-applied
//!
//! When a new transaction commits, it is pushed to the undo stack and the
//! redo stack is cleared (branching creates a new timeline). Each entry is
//! one whole gesture's batch, so a drag of hundreds of pointer-motion frames
//! costs exactly one history slot.

use crate::transaction::AppliedTransaction;

/// Maximum number of undo/redo entries to keep.
const MAX_HISTORY_SIZE: usize = 64;

/// Manages undo/redo history of committed transactions.
#[derive(Debug, Default)]
pub struct HistoryManager {
    /// Transactions to undo (most recent last).
    undo_stack: Vec<AppliedTransaction>,

    /// Transactions to redo (most recent last).
    redo_stack: Vec<AppliedTransaction>,
}

impl HistoryManager {
    /// Creates a new empty history manager.
    pub fn new() -> Self {
        Self {
            undo_stack: Vec::with_capacity(MAX_HISTORY_SIZE),
            redo_stack: Vec::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    /// Records a committed transaction.
    ///
    /// The redo stack is cleared since this starts a new branch of history.
    pub fn push_undo(&mut self, record: AppliedTransaction) {
        self.redo_stack.clear();
        self.push_undo_preserve_redo(record);
    }

    /// Pushes to the undo stack WITHOUT clearing the redo stack.
    ///
    /// Used during redo: the re-applied transaction must become undoable
    /// again, but the remaining redo entries must survive.
    pub fn push_undo_preserve_redo(&mut self, record: AppliedTransaction) {
        self.undo_stack.push(record);
        while self.undo_stack.len() > MAX_HISTORY_SIZE {
            self.undo_stack.remove(0);
        }
    }

    /// Pops the most recent undoable transaction.
    ///
    /// The caller applies its inverse batch and then pushes it to the redo
    /// stack.
    pub fn pop_undo(&mut self) -> Option<AppliedTransaction> {
        self.undo_stack.pop()
    }

    /// Pushes a reverted transaction for potential redo.
    pub fn push_redo(&mut self, record: AppliedTransaction) {
        self.redo_stack.push(record);
        while self.redo_stack.len() > MAX_HISTORY_SIZE {
            self.redo_stack.remove(0);
        }
    }

    /// Pops the most recent redoable transaction.
    pub fn pop_redo(&mut self) -> Option<AppliedTransaction> {
        self.redo_stack.pop()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Clears all history. Called on region change or when an entry can no
    /// longer be applied.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

/// Test-only helper methods.
#[cfg(test)]
impl HistoryManager {
    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Beats, Event, EventSequence, MemorySequence, NoteEvent, SequenceOp};
    use crate::transaction::EditTransaction;

    fn committed(seq: &mut MemorySequence, name: &str, pitch: u8) -> AppliedTransaction {
        let mut tx = EditTransaction::new(name);
        tx.record_add(Event::Note(NoteEvent::new(
            pitch,
            0.8,
            0,
            Beats::ZERO,
            Beats::from_beats(1),
        )));
        tx.commit(seq).unwrap()
    }

    #[test]
    fn test_history_push_and_pop() {
        let mut history = HistoryManager::new();
        let mut seq = MemorySequence::new();

        history.push_undo(committed(&mut seq, "add note", 60));
        assert!(history.can_undo());
        assert!(!history.can_redo());

        let record = history.pop_undo().unwrap();
        assert_eq!(record.name, "add note");
        assert!(!history.can_undo());
    }

    #[test]
    fn test_history_max_size() {
        let mut history = HistoryManager::new();
        let mut seq = MemorySequence::new();

        for i in 0..MAX_HISTORY_SIZE + 5 {
            history.push_undo(committed(&mut seq, &format!("edit {}", i), 60));
        }
        assert_eq!(history.undo_count(), MAX_HISTORY_SIZE);

        let last = history.pop_undo().unwrap();
        assert_eq!(last.name, format!("edit {}", MAX_HISTORY_SIZE + 4));
    }

    #[test]
    fn test_redo_cleared_on_new_action() {
        let mut history = HistoryManager::new();
        let mut seq = MemorySequence::new();

        history.push_undo(committed(&mut seq, "first", 60));
        let undone = history.pop_undo().unwrap();
        history.push_redo(undone);
        assert!(history.can_redo());

        history.push_undo(committed(&mut seq, "second", 62));
        assert!(!history.can_redo());
    }

    #[test]
    fn test_multi_level_undo_redo() {
        // Undoing four edits must allow redoing the same four.
        let mut history = HistoryManager::new();
        let mut seq = MemorySequence::new();

        for i in 0..4u8 {
            history.push_undo(committed(&mut seq, &format!("edit {}", i), 60 + i));
        }
        assert_eq!(history.undo_count(), 4);

        for _ in 0..4 {
            let record = history.pop_undo().unwrap();
            seq.apply(&record.inverse_ops()).unwrap();
            history.push_redo(record);
        }
        assert_eq!(history.undo_count(), 0);
        assert_eq!(history.redo_count(), 4);
        assert!(seq.is_empty());

        for _ in 0..4 {
            let record = history.pop_redo().unwrap();
            seq.apply(&record.redo_ops()).unwrap();
            // Preserve the remaining redo entries.
            history.push_undo_preserve_redo(record);
        }
        assert_eq!(history.undo_count(), 4);
        assert_eq!(history.redo_count(), 0);
        assert_eq!(seq.len(), 4);
    }

    #[test]
    fn test_undo_batch_restores_sequence() {
        let mut seq = MemorySequence::new();
        let note = Event::Note(NoteEvent::new(
            60,
            0.8,
            0,
            Beats::ZERO,
            Beats::from_beats(1),
        ));
        seq.apply(&[SequenceOp::Insert(note)]).unwrap();
        let before = seq.events();

        let mut history = HistoryManager::new();
        history.push_undo(committed(&mut seq, "add note", 64));
        assert_eq!(seq.len(), 2);

        let record = history.pop_undo().unwrap();
        seq.apply(&record.inverse_ops()).unwrap();
        assert_eq!(seq.events(), before);
    }
}
