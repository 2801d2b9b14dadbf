//! The backing-sequence boundary.
//!
//! The editor never owns event data; it drives a sequence through the
//! [`EventSequence`] trait. Mutations go through [`EventSequence::apply`] as
//! atomic batches (the primitive an edit transaction maps 1:1 onto), and
//! come back as [`SequenceDelta`] change notifications queued inside the
//! sequence and drained on the UI thread. That queue is the single
//! synchronization point with a realtime recording thread: the recorder
//! mutates the sequence and enqueues deltas, and never touches the view.

use super::event::{Event, Property, PropertyValue};
use super::note::EventId;
use super::Beats;
use thiserror::Error;

/// Errors the backing sequence can report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    /// The sequence rejects all mutation (e.g. a read-only region).
    #[error("sequence is read-only")]
    ReadOnly,

    /// An operation referenced an identity the sequence does not contain.
    #[error("unknown event id {0}")]
    UnknownEvent(u64),

    /// An insert reused an identity already present.
    #[error("duplicate event id {0}")]
    DuplicateEvent(u64),

    /// An update carried a property the target event kind does not have.
    #[error("property {0:?} does not apply to event id {1}")]
    PropertyMismatch(Property, u64),
}

/// One primitive mutation in an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOp {
    Insert(Event),
    Remove(EventId),
    Update { id: EventId, value: PropertyValue },
}

/// A change notification raised by the sequence.
///
/// Deltas only carry identities; consumers re-read current event data when
/// processing, because an arbitrary number of further mutations may have
/// happened between notification and processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceDelta {
    Added(EventId),
    Removed(EventId),
    Changed(EventId),
}

impl SequenceDelta {
    pub fn id(&self) -> EventId {
        match self {
            SequenceDelta::Added(id)
            | SequenceDelta::Removed(id)
            | SequenceDelta::Changed(id) => *id,
        }
    }
}

/// A time-ordered sequence of events with atomic batch mutation and queued
/// change notifications.
pub trait EventSequence {
    /// Returns all events ordered by (time, identity).
    fn events(&self) -> Vec<Event>;

    /// Returns events overlapping `[start, end)`, ordered by (time, identity).
    fn events_between(&self, start: Beats, end: Beats) -> Vec<Event>;

    /// Looks up a single event by identity.
    fn get(&self, id: EventId) -> Option<Event>;

    /// Applies a batch of operations atomically: either every operation
    /// succeeds, or the sequence is left untouched and an error is returned.
    fn apply(&mut self, ops: &[SequenceOp]) -> Result<(), SequenceError>;

    /// Drains queued change notifications, in the order they were raised.
    fn drain_deltas(&mut self) -> Vec<SequenceDelta>;

    /// True if the sequence rejects mutation.
    fn is_read_only(&self) -> bool {
        false
    }
}

/// In-memory reference implementation of [`EventSequence`].
///
/// Events are kept sorted by (time, identity) so enumeration order is
/// deterministic. Used by the crate's tests and usable by hosts that have no
/// store of their own; `record_live` plays the role of the realtime
/// recording thread, inserting an event and queuing its delta without any
/// view involvement.
#[derive(Debug, Default)]
pub struct MemorySequence {
    events: Vec<Event>,
    pending: Vec<SequenceDelta>,
    read_only: bool,
}

impl MemorySequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the sequence read-only; `apply` will fail until cleared.
    pub fn set_read_only(&mut self, yn: bool) {
        self.read_only = yn;
    }

    /// Inserts an event as a live recording would: directly, with a queued
    /// `Added` delta and no batch protocol.
    pub fn record_live(&mut self, event: Event) {
        let id = event.id();
        self.insert_sorted(event);
        self.pending.push(SequenceDelta::Added(id));
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn position(&self, id: EventId) -> Option<usize> {
        self.events.iter().position(|e| e.id() == id)
    }

    fn insert_sorted(&mut self, event: Event) {
        let key = (event.time(), event.id());
        let pos = self
            .events
            .partition_point(|e| (e.time(), e.id()) < key);
        self.events.insert(pos, event);
    }

    fn resort(&mut self) {
        self.events.sort_by_key(|e| (e.time(), e.id()));
    }

    /// Checks a batch without mutating anything.
    fn validate(&self, ops: &[SequenceOp]) -> Result<(), SequenceError> {
        if self.read_only {
            return Err(SequenceError::ReadOnly);
        }
        // Track identities added/removed earlier in the same batch so the
        // batch is validated against the state it would produce.
        let mut added: Vec<EventId> = Vec::new();
        let mut removed: Vec<EventId> = Vec::new();
        for op in ops {
            match op {
                SequenceOp::Insert(ev) => {
                    let id = ev.id();
                    let exists = (self.position(id).is_some() || added.contains(&id))
                        && !removed.contains(&id);
                    if exists {
                        return Err(SequenceError::DuplicateEvent(id.as_u64()));
                    }
                    added.push(id);
                }
                SequenceOp::Remove(id) => {
                    let exists = (self.position(*id).is_some() || added.contains(id))
                        && !removed.contains(id);
                    if !exists {
                        return Err(SequenceError::UnknownEvent(id.as_u64()));
                    }
                    removed.push(*id);
                }
                SequenceOp::Update { id, value } => {
                    if removed.contains(id) {
                        return Err(SequenceError::UnknownEvent(id.as_u64()));
                    }
                    let target = self.events.iter().find(|e| e.id() == *id);
                    match target {
                        Some(ev) => {
                            if ev.get(value.property()).is_none() {
                                return Err(SequenceError::PropertyMismatch(
                                    value.property(),
                                    id.as_u64(),
                                ));
                            }
                        }
                        None if added.contains(id) => {}
                        None => return Err(SequenceError::UnknownEvent(id.as_u64())),
                    }
                }
            }
        }
        Ok(())
    }
}

impl EventSequence for MemorySequence {
    fn events(&self) -> Vec<Event> {
        self.events.clone()
    }

    fn events_between(&self, start: Beats, end: Beats) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| match e {
                Event::Note(n) => n.overlaps_range(start, end),
                other => {
                    let t = other.time();
                    t >= start && t < end
                }
            })
            .cloned()
            .collect()
    }

    fn get(&self, id: EventId) -> Option<Event> {
        self.position(id).map(|pos| self.events[pos].clone())
    }

    fn apply(&mut self, ops: &[SequenceOp]) -> Result<(), SequenceError> {
        self.validate(ops)?;

        let mut needs_resort = false;
        for op in ops {
            match op {
                SequenceOp::Insert(ev) => {
                    self.insert_sorted(ev.clone());
                    self.pending.push(SequenceDelta::Added(ev.id()));
                }
                SequenceOp::Remove(id) => {
                    if let Some(pos) = self.position(*id) {
                        self.events.remove(pos);
                        self.pending.push(SequenceDelta::Removed(*id));
                    }
                }
                SequenceOp::Update { id, value } => {
                    if let Some(pos) = self.position(*id) {
                        let time_property = matches!(
                            value.property(),
                            Property::Start | Property::Time
                        );
                        self.events[pos].set(*value);
                        needs_resort |= time_property;
                        self.pending.push(SequenceDelta::Changed(*id));
                    }
                }
            }
        }
        if needs_resort {
            self.resort();
        }
        Ok(())
    }

    fn drain_deltas(&mut self) -> Vec<SequenceDelta> {
        std::mem::take(&mut self.pending)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NoteEvent;

    fn note(pitch: u8, start_ticks: i64) -> Event {
        Event::Note(NoteEvent::new(
            pitch,
            0.8,
            0,
            Beats::from_ticks(start_ticks),
            Beats::from_beats(1),
        ))
    }

    #[test]
    fn test_insert_keeps_time_order() {
        let mut seq = MemorySequence::new();
        let a = note(60, 480);
        let b = note(62, 0);
        let c = note(64, 960);
        seq.apply(&[
            SequenceOp::Insert(a),
            SequenceOp::Insert(b),
            SequenceOp::Insert(c),
        ])
        .unwrap();

        let times: Vec<i64> = seq.events().iter().map(|e| e.time().to_ticks()).collect();
        assert_eq!(times, vec![0, 480, 960]);
    }

    #[test]
    fn test_apply_is_atomic() {
        let mut seq = MemorySequence::new();
        let a = note(60, 0);
        seq.apply(&[SequenceOp::Insert(a)]).unwrap();
        seq.drain_deltas();

        let before = seq.events();
        // Second op references an unknown id, so the first must not apply.
        let err = seq.apply(&[
            SequenceOp::Insert(note(64, 480)),
            SequenceOp::Remove(EventId::new()),
        ]);
        assert!(matches!(err, Err(SequenceError::UnknownEvent(_))));
        assert_eq!(seq.events(), before);
        assert!(seq.drain_deltas().is_empty());
    }

    #[test]
    fn test_read_only_rejects() {
        let mut seq = MemorySequence::new();
        seq.set_read_only(true);
        let err = seq.apply(&[SequenceOp::Insert(note(60, 0))]);
        assert_eq!(err, Err(SequenceError::ReadOnly));
        assert!(seq.is_empty());
    }

    #[test]
    fn test_update_requeues_and_resorts() {
        let mut seq = MemorySequence::new();
        let a = note(60, 0);
        let b = note(62, 480);
        let a_id = a.id();
        seq.apply(&[SequenceOp::Insert(a), SequenceOp::Insert(b)])
            .unwrap();
        seq.drain_deltas();

        seq.apply(&[SequenceOp::Update {
            id: a_id,
            value: PropertyValue::Start(Beats::from_ticks(960)),
        }])
        .unwrap();

        let times: Vec<i64> = seq.events().iter().map(|e| e.time().to_ticks()).collect();
        assert_eq!(times, vec![480, 960]);
        assert_eq!(seq.drain_deltas(), vec![SequenceDelta::Changed(a_id)]);
    }

    #[test]
    fn test_property_mismatch_rejected() {
        let mut seq = MemorySequence::new();
        let a = note(60, 0);
        let a_id = a.id();
        seq.apply(&[SequenceOp::Insert(a)]).unwrap();

        let err = seq.apply(&[SequenceOp::Update {
            id: a_id,
            value: PropertyValue::Bank(3),
        }]);
        assert!(matches!(err, Err(SequenceError::PropertyMismatch(..))));
    }

    #[test]
    fn test_record_live_queues_delta() {
        let mut seq = MemorySequence::new();
        let a = note(60, 0);
        let a_id = a.id();
        seq.record_live(a);
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.drain_deltas(), vec![SequenceDelta::Added(a_id)]);
        assert!(seq.drain_deltas().is_empty());
    }

    #[test]
    fn test_events_between() {
        let mut seq = MemorySequence::new();
        seq.apply(&[
            SequenceOp::Insert(note(60, 0)),
            SequenceOp::Insert(note(62, 480)),
            SequenceOp::Insert(note(64, 960)),
        ])
        .unwrap();

        // The first note (0..480) does not overlap [480, 960); the second does.
        let hits = seq.events_between(Beats::from_ticks(480), Beats::from_ticks(960));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].time().to_ticks(), 480);
    }

    #[test]
    fn test_remove_then_insert_same_batch() {
        let mut seq = MemorySequence::new();
        let a = note(60, 0);
        let a_id = a.id();
        seq.apply(&[SequenceOp::Insert(a)]).unwrap();

        let replacement = note(61, 0);
        seq.apply(&[
            SequenceOp::Remove(a_id),
            SequenceOp::Insert(replacement.clone()),
        ])
        .unwrap();
        assert_eq!(seq.get(a_id), None);
        assert_eq!(seq.get(replacement.id()), Some(replacement));
    }
}
