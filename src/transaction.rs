//! Batched, named edit transactions.
//!
//! A transaction accumulates property changes and add/remove operations
//! during one logical user action (typically a drag) and is then either
//! committed, which applies it to the backing sequence as a single atomic
//! batch recorded as one undoable action, or aborted, with no observable
//! side effect. Recording the same (identity, property) twice keeps the old value
//! captured at first touch and overwrites the new value, so a multi-step
//! drag always collapses to one clean before/after pair per property.

use crate::model::{
    Event, EventId, EventSequence, Property, PropertyValue, SequenceError, SequenceOp,
};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the transaction protocol.
#[derive(Debug, Error)]
pub enum EditError {
    /// `begin` while another transaction is open; transactions do not nest.
    #[error("a transaction named `{0}` is already open")]
    TransactionAlreadyOpen(String),

    /// A record or commit call without an open transaction.
    #[error("no transaction is open")]
    NoOpenTransaction,

    /// The backing sequence rejected the batch; nothing was applied.
    #[error("commit of `{name}` failed")]
    CommitFailed {
        name: String,
        #[source]
        source: SequenceError,
    },
}

/// One before/after pair for a single property of a single event.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub id: EventId,
    pub property: Property,
    /// Value at first touch.
    pub old: PropertyValue,
    /// Value from the most recent record call.
    pub new: PropertyValue,
}

/// A named, pending changeset against the backing sequence.
#[derive(Debug)]
pub struct EditTransaction {
    name: String,
    changes: Vec<PropertyChange>,
    change_index: HashMap<(EventId, Property), usize>,
    adds: Vec<Event>,
    removes: Vec<EventId>,
}

impl EditTransaction {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            changes: Vec::new(),
            change_index: HashMap::new(),
            adds: Vec::new(),
            removes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.adds.is_empty() && self.removes.is_empty()
    }

    /// Records a property change.
    ///
    /// The old value is captured from the live sequence the first time the
    /// (identity, property) pair is touched; later calls only replace the
    /// new value. Stale identities and inapplicable properties are dropped
    /// silently; a following resync restores consistency.
    pub fn record_change<S: EventSequence + ?Sized>(
        &mut self,
        sequence: &S,
        id: EventId,
        value: PropertyValue,
    ) {
        let property = value.property();
        if let Some(&slot) = self.change_index.get(&(id, property)) {
            self.changes[slot].new = value;
            return;
        }
        let Some(event) = sequence.get(id) else {
            debug!(id = id.as_u64(), "change recorded for stale event, dropped");
            return;
        };
        let Some(old) = event.get(property) else {
            warn!(
                id = id.as_u64(),
                ?property,
                "property does not apply to event kind, dropped"
            );
            return;
        };
        self.change_index
            .insert((id, property), self.changes.len());
        self.changes.push(PropertyChange {
            id,
            property,
            old,
            new: value,
        });
    }

    /// Records a pending insertion.
    pub fn record_add(&mut self, event: Event) {
        self.adds.push(event);
    }

    /// Records a pending removal. Stale identities are dropped silently.
    pub fn record_remove<S: EventSequence + ?Sized>(&mut self, sequence: &S, id: EventId) {
        if sequence.get(id).is_none() {
            debug!(id = id.as_u64(), "remove recorded for stale event, dropped");
            return;
        }
        if !self.removes.contains(&id) {
            self.removes.push(id);
        }
    }

    /// Returns the pending value for a property, if one has been recorded.
    pub fn pending_value(&self, id: EventId, property: Property) -> Option<PropertyValue> {
        self.change_index
            .get(&(id, property))
            .map(|&slot| self.changes[slot].new)
    }

    /// Identities of pending additions, in recording order.
    pub fn pending_add_ids(&self) -> Vec<EventId> {
        self.adds.iter().map(|e| e.id()).collect()
    }

    /// Applies the pending changes for one event to a shadow copy, for
    /// preview rendering during a drag. The backing sequence is untouched.
    pub fn preview(&self, mut event: Event) -> Event {
        let id = event.id();
        for change in &self.changes {
            if change.id == id {
                event.set(change.new);
            }
        }
        event
    }

    pub fn changes(&self) -> &[PropertyChange] {
        &self.changes
    }

    /// Consumes the transaction and applies it to the sequence as one atomic
    /// batch.
    ///
    /// Entries referencing identities that vanished since recording are
    /// filtered out first (the stale-reference policy); any remaining
    /// failure means the sequence was left untouched, and the error carries
    /// the transaction name. On success the returned record captures enough
    /// state to undo the whole batch as one unit.
    pub fn commit<S: EventSequence + ?Sized>(
        self,
        sequence: &mut S,
    ) -> Result<AppliedTransaction, EditError> {
        let mut changes: Vec<PropertyChange> = Vec::new();
        let mut removed: Vec<Event> = Vec::new();

        for change in self.changes {
            if sequence.get(change.id).is_some() {
                changes.push(change);
            } else {
                debug!(id = change.id.as_u64(), "stale change dropped at commit");
            }
        }
        for id in &self.removes {
            match sequence.get(*id) {
                Some(event) => removed.push(event),
                None => debug!(id = id.as_u64(), "stale remove dropped at commit"),
            }
        }

        let mut ops: Vec<SequenceOp> = Vec::new();
        for change in &changes {
            // Changes to events which are about to be removed are pointless;
            // skip them so undo does not resurrect intermediate values.
            if removed.iter().any(|e| e.id() == change.id) {
                continue;
            }
            ops.push(SequenceOp::Update {
                id: change.id,
                value: change.new,
            });
        }
        changes.retain(|c| !removed.iter().any(|e| e.id() == c.id));
        for event in &removed {
            ops.push(SequenceOp::Remove(event.id()));
        }
        for event in &self.adds {
            ops.push(SequenceOp::Insert(event.clone()));
        }

        sequence.apply(&ops).map_err(|source| EditError::CommitFailed {
            name: self.name.clone(),
            source,
        })?;

        Ok(AppliedTransaction {
            name: self.name,
            changes,
            added: self.adds,
            removed,
        })
    }
}

/// A committed transaction, stored in the undo history.
///
/// Holds full copies of removed events so undo can reinsert them, and the
/// before/after property pairs so undo/redo replay through the normal
/// sequence batch path.
#[derive(Debug, Clone)]
pub struct AppliedTransaction {
    pub name: String,
    changes: Vec<PropertyChange>,
    added: Vec<Event>,
    removed: Vec<Event>,
}

impl AppliedTransaction {
    /// The batch that reverses this transaction.
    pub fn inverse_ops(&self) -> Vec<SequenceOp> {
        let mut ops: Vec<SequenceOp> = Vec::new();
        for event in &self.added {
            ops.push(SequenceOp::Remove(event.id()));
        }
        for event in &self.removed {
            ops.push(SequenceOp::Insert(event.clone()));
        }
        for change in self.changes.iter().rev() {
            ops.push(SequenceOp::Update {
                id: change.id,
                value: change.old,
            });
        }
        ops
    }

    /// The batch that re-applies this transaction.
    pub fn redo_ops(&self) -> Vec<SequenceOp> {
        let mut ops: Vec<SequenceOp> = Vec::new();
        for change in &self.changes {
            ops.push(SequenceOp::Update {
                id: change.id,
                value: change.new,
            });
        }
        for event in &self.removed {
            ops.push(SequenceOp::Remove(event.id()));
        }
        for event in &self.added {
            ops.push(SequenceOp::Insert(event.clone()));
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Beats, MemorySequence, NoteEvent};

    fn note(pitch: u8, start_ticks: i64) -> Event {
        Event::Note(NoteEvent::new(
            pitch,
            0.8,
            0,
            Beats::from_ticks(start_ticks),
            Beats::from_beats(1),
        ))
    }

    fn seq_with(events: Vec<Event>) -> MemorySequence {
        let mut seq = MemorySequence::new();
        let ops: Vec<SequenceOp> = events.into_iter().map(SequenceOp::Insert).collect();
        seq.apply(&ops).unwrap();
        seq.drain_deltas();
        seq
    }

    #[test]
    fn test_first_touch_old_value_preserved() {
        let ev = note(60, 0);
        let id = ev.id();
        let seq = seq_with(vec![ev]);

        let mut tx = EditTransaction::new("move notes");
        // Three motion steps during a drag.
        tx.record_change(&seq, id, PropertyValue::Pitch(61));
        tx.record_change(&seq, id, PropertyValue::Pitch(63));
        tx.record_change(&seq, id, PropertyValue::Pitch(65));

        assert_eq!(tx.changes().len(), 1);
        let change = &tx.changes()[0];
        assert_eq!(change.old, PropertyValue::Pitch(60));
        assert_eq!(change.new, PropertyValue::Pitch(65));
    }

    #[test]
    fn test_abort_leaves_sequence_untouched() {
        let ev = note(60, 0);
        let id = ev.id();
        let mut seq = seq_with(vec![ev]);
        let before = seq.events();

        let mut tx = EditTransaction::new("resize notes");
        tx.record_change(&seq, id, PropertyValue::Length(Beats::from_beats(4)));
        tx.record_add(note(64, 480));
        tx.record_remove(&seq, id);
        drop(tx); // abort

        assert_eq!(seq.events(), before);
        assert!(seq.drain_deltas().is_empty());
    }

    #[test]
    fn test_commit_applies_and_inverts() {
        let ev = note(60, 0);
        let id = ev.id();
        let mut seq = seq_with(vec![ev]);
        let before = seq.events();

        let added = note(64, 480);
        let mut tx = EditTransaction::new("edit");
        tx.record_change(&seq, id, PropertyValue::Pitch(62));
        tx.record_add(added);
        let applied = tx.commit(&mut seq).unwrap();

        assert_eq!(seq.len(), 2);
        let changed = seq.get(id).unwrap();
        assert_eq!(changed.get(Property::Pitch), Some(PropertyValue::Pitch(62)));

        seq.apply(&applied.inverse_ops()).unwrap();
        assert_eq!(seq.events(), before);

        seq.apply(&applied.redo_ops()).unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_commit_failure_rolls_back_wholesale() {
        let ev = note(60, 0);
        let id = ev.id();
        let mut seq = seq_with(vec![ev]);
        seq.set_read_only(true);
        let before = seq.events();

        let mut tx = EditTransaction::new("edit");
        tx.record_change(&seq, id, PropertyValue::Pitch(62));
        tx.record_add(note(64, 480));
        let err = tx.commit(&mut seq).unwrap_err();

        assert!(matches!(err, EditError::CommitFailed { .. }));
        assert_eq!(seq.events(), before);
        assert!(seq.drain_deltas().is_empty());
    }

    #[test]
    fn test_stale_entries_filtered_at_commit() {
        let keep = note(60, 0);
        let gone = note(64, 480);
        let keep_id = keep.id();
        let gone_id = gone.id();
        let mut seq = seq_with(vec![keep, gone]);

        let mut tx = EditTransaction::new("edit");
        tx.record_change(&seq, keep_id, PropertyValue::Pitch(61));
        tx.record_change(&seq, gone_id, PropertyValue::Pitch(65));

        // The second event vanishes underneath the transaction.
        seq.apply(&[SequenceOp::Remove(gone_id)]).unwrap();
        seq.drain_deltas();

        let applied = tx.commit(&mut seq).unwrap();
        assert_eq!(applied.changes.len(), 1);
        assert_eq!(
            seq.get(keep_id).unwrap().get(Property::Pitch),
            Some(PropertyValue::Pitch(61))
        );
    }

    #[test]
    fn test_remove_skips_pending_changes_for_same_event() {
        let ev = note(60, 0);
        let id = ev.id();
        let mut seq = seq_with(vec![ev]);

        let mut tx = EditTransaction::new("delete");
        tx.record_change(&seq, id, PropertyValue::Pitch(61));
        tx.record_remove(&seq, id);
        let applied = tx.commit(&mut seq).unwrap();

        assert!(seq.is_empty());
        // Undo restores the original pitch, not the pending change.
        seq.apply(&applied.inverse_ops()).unwrap();
        assert_eq!(
            seq.get(id).unwrap().get(Property::Pitch),
            Some(PropertyValue::Pitch(60))
        );
    }

    #[test]
    fn test_pending_values_track_latest_recording() {
        let ev = note(60, 0);
        let id = ev.id();
        let seq = seq_with(vec![ev]);

        let mut tx = EditTransaction::new("edit");
        assert_eq!(tx.pending_value(id, Property::Pitch), None);
        tx.record_change(&seq, id, PropertyValue::Pitch(61));
        tx.record_change(&seq, id, PropertyValue::Pitch(63));
        assert_eq!(
            tx.pending_value(id, Property::Pitch),
            Some(PropertyValue::Pitch(63))
        );
        assert_eq!(tx.pending_value(id, Property::Velocity), None);

        let added = note(64, 480);
        let added_id = added.id();
        tx.record_add(added);
        assert_eq!(tx.pending_add_ids(), vec![added_id]);
    }

    #[test]
    fn test_preview_does_not_touch_sequence() {
        let ev = note(60, 0);
        let id = ev.id();
        let seq = seq_with(vec![ev.clone()]);

        let mut tx = EditTransaction::new("move notes");
        tx.record_change(&seq, id, PropertyValue::Pitch(72));
        let shadow = tx.preview(ev);
        assert_eq!(shadow.get(Property::Pitch), Some(PropertyValue::Pitch(72)));
        assert_eq!(
            seq.get(id).unwrap().get(Property::Pitch),
            Some(PropertyValue::Pitch(60))
        );
    }

    #[test]
    fn test_record_against_stale_id_is_noop() {
        let seq = seq_with(vec![]);
        let mut tx = EditTransaction::new("edit");
        tx.record_change(&seq, EventId::new(), PropertyValue::Pitch(61));
        tx.record_remove(&seq, EventId::new());
        assert!(tx.is_empty());
    }
}
