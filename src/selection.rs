//! The set of currently selected presentation objects.
//!
//! Members are identities that must be present in the event index; every
//! mutation method takes the index and silently ignores identities it does
//! not contain. When the index drops an object the owner must call `evict`
//! before any other observer runs, so no dangling selection is ever
//! observable.

use crate::index::{EventIndex, ViewItem};
use crate::model::{Beats, EventId};
use std::collections::HashSet;

/// The current selection, keyed by event identity.
#[derive(Debug, Default)]
pub struct SelectionSet {
    ids: HashSet<EventId>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Identities in ascending identity order.
    ///
    /// Traversal order is independent of insertion order so downstream batch
    /// edits are reproducible.
    pub fn iter_sorted(&self) -> Vec<EventId> {
        let mut ids: Vec<EventId> = self.ids.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Adds a member. Returns true if the selection changed.
    pub fn add(&mut self, id: EventId, index: &EventIndex) -> bool {
        if !index.contains(id) {
            return false;
        }
        self.ids.insert(id)
    }

    /// Removes a member. Returns true if the selection changed.
    pub fn remove(&mut self, id: EventId) -> bool {
        self.ids.remove(&id)
    }

    /// Toggles membership. Returns true if the selection changed.
    pub fn toggle(&mut self, id: EventId, index: &EventIndex) -> bool {
        if self.ids.contains(&id) {
            self.ids.remove(&id)
        } else {
            self.add(id, index)
        }
    }

    /// Clears the selection. Returns true if it was non-empty.
    pub fn clear(&mut self) -> bool {
        if self.ids.is_empty() {
            return false;
        }
        self.ids.clear();
        true
    }

    /// Selects every indexed object. Returns true if the selection changed.
    pub fn select_all(&mut self, index: &EventIndex) -> bool {
        let mut changed = false;
        for id in index.ids_sorted() {
            changed |= self.ids.insert(id);
        }
        changed
    }

    /// Inverts the selection over every indexed object.
    pub fn invert(&mut self, index: &EventIndex) -> bool {
        let mut next = HashSet::new();
        for id in index.ids_sorted() {
            if !self.ids.contains(&id) {
                next.insert(id);
            }
        }
        let changed = next != self.ids;
        self.ids = next;
        changed
    }

    /// Selects notes inside a time/pitch box.
    ///
    /// Without `extend` the previous selection is replaced. Only notes have
    /// a pitch, so only notes participate.
    pub fn select_range(
        &mut self,
        time_start: Beats,
        time_end: Beats,
        pitch_low: u8,
        pitch_high: u8,
        extend: bool,
        index: &EventIndex,
    ) -> bool {
        let before = self.ids.clone();
        if !extend {
            self.ids.clear();
        }
        for id in index.ids_sorted() {
            if let Some(ViewItem::Note(v)) = index.lookup(id) {
                let n = &v.event;
                if n.pitch >= pitch_low
                    && n.pitch <= pitch_high
                    && n.overlaps_range(time_start, time_end)
                {
                    self.ids.insert(id);
                }
            }
        }
        self.ids != before
    }

    /// Extends the selection to every note between the earliest and latest
    /// currently selected note times.
    pub fn extend_to_span(&mut self, index: &EventIndex) -> bool {
        let mut earliest: Option<Beats> = None;
        let mut latest: Option<Beats> = None;
        for id in self.iter_sorted() {
            if let Some(ViewItem::Note(v)) = index.lookup(id) {
                let start = v.event.start;
                let end = v.event.end();
                earliest = Some(earliest.map_or(start, |e| e.min(start)));
                latest = Some(latest.map_or(end, |l| l.max(end)));
            }
        }
        let (Some(t0), Some(t1)) = (earliest, latest) else {
            return false;
        };
        self.select_range(t0, t1, 0, 127, true, index)
    }

    /// Adds (or replaces with) every note of the given pitch.
    pub fn select_matching_pitch(&mut self, pitch: u8, add: bool, index: &EventIndex) -> bool {
        let before = self.ids.clone();
        if !add {
            self.ids.clear();
        }
        for id in index.ids_sorted() {
            if let Some(ViewItem::Note(v)) = index.lookup(id) {
                if v.event.pitch == pitch {
                    self.ids.insert(id);
                }
            }
        }
        self.ids != before
    }

    /// Drops a member whose presentation object was removed from the index.
    ///
    /// Called synchronously by the view while applying index changes, before
    /// any other observer can see the removal. Returns true if the member
    /// was present.
    pub fn evict(&mut self, id: EventId) -> bool {
        self.ids.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CoordinateMapper;
    use crate::model::{Event, EventSequence, MemorySequence, NoteEvent, SequenceOp};

    fn setup(notes: &[(u8, i64)]) -> (MemorySequence, EventIndex, Vec<EventId>) {
        let mut seq = MemorySequence::new();
        let mut ids = Vec::new();
        let ops: Vec<SequenceOp> = notes
            .iter()
            .map(|&(pitch, start)| {
                let ev = Event::Note(NoteEvent::new(
                    pitch,
                    0.8,
                    0,
                    Beats::from_ticks(start),
                    Beats::from_beats(1),
                ));
                ids.push(ev.id());
                SequenceOp::Insert(ev)
            })
            .collect();
        seq.apply(&ops).unwrap();
        seq.drain_deltas();

        let mapper = CoordinateMapper::new(36, 84, 40.0, 490.0, Beats::from_beats(16));
        let mut index = EventIndex::new();
        index.full_resync(&seq, &mapper);
        (seq, index, ids)
    }

    #[test]
    fn test_add_requires_index_membership() {
        let (_, index, ids) = setup(&[(60, 0)]);
        let mut sel = SelectionSet::new();
        assert!(sel.add(ids[0], &index));
        assert!(!sel.add(EventId::new(), &index));
        assert_eq!(sel.len(), 1);
    }

    #[test]
    fn test_toggle() {
        let (_, index, ids) = setup(&[(60, 0)]);
        let mut sel = SelectionSet::new();
        assert!(sel.toggle(ids[0], &index));
        assert!(sel.contains(ids[0]));
        assert!(sel.toggle(ids[0], &index));
        assert!(!sel.contains(ids[0]));
    }

    #[test]
    fn test_select_range_replaces_or_extends() {
        let (_, index, ids) = setup(&[(60, 0), (64, 480), (72, 960)]);
        let mut sel = SelectionSet::new();

        sel.select_range(
            Beats::ZERO,
            Beats::from_ticks(480),
            55,
            65,
            false,
            &index,
        );
        assert_eq!(sel.iter_sorted(), vec![ids[0]]);

        // Extend with the second note's box.
        sel.select_range(
            Beats::from_ticks(480),
            Beats::from_ticks(960),
            60,
            70,
            true,
            &index,
        );
        assert_eq!(sel.len(), 2);
        assert!(sel.contains(ids[1]));

        // Replace selects just the third.
        sel.select_range(
            Beats::from_ticks(960),
            Beats::from_ticks(1440),
            0,
            127,
            false,
            &index,
        );
        assert_eq!(sel.iter_sorted(), vec![ids[2]]);
    }

    #[test]
    fn test_invert() {
        let (_, index, ids) = setup(&[(60, 0), (64, 480)]);
        let mut sel = SelectionSet::new();
        sel.add(ids[0], &index);
        assert!(sel.invert(&index));
        assert!(!sel.contains(ids[0]));
        assert!(sel.contains(ids[1]));
    }

    #[test]
    fn test_extend_to_span() {
        let (_, index, ids) = setup(&[(60, 0), (64, 480), (72, 960)]);
        let mut sel = SelectionSet::new();
        sel.add(ids[0], &index);
        sel.add(ids[2], &index);
        assert!(sel.extend_to_span(&index));
        // The middle note lies between the two ends and is picked up.
        assert!(sel.contains(ids[1]));
    }

    #[test]
    fn test_select_matching_pitch() {
        let (_, index, ids) = setup(&[(60, 0), (60, 480), (64, 960)]);
        let mut sel = SelectionSet::new();
        sel.select_matching_pitch(60, false, &index);
        assert_eq!(sel.iter_sorted(), vec![ids[0], ids[1]]);
    }

    #[test]
    fn test_eviction() {
        let (_, index, ids) = setup(&[(60, 0)]);
        let mut sel = SelectionSet::new();
        sel.add(ids[0], &index);
        assert!(sel.evict(ids[0]));
        assert!(!sel.evict(ids[0]));
        assert!(sel.is_empty());
    }

    #[test]
    fn test_sorted_traversal_is_insertion_order_independent() {
        let (_, index, ids) = setup(&[(60, 0), (64, 480), (72, 960)]);
        let mut a = SelectionSet::new();
        a.add(ids[2], &index);
        a.add(ids[0], &index);
        a.add(ids[1], &index);
        let mut b = SelectionSet::new();
        b.add(ids[0], &index);
        b.add(ids[1], &index);
        b.add(ids[2], &index);
        assert_eq!(a.iter_sorted(), b.iter_sorted());
    }
}
