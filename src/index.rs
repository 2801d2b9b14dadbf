//! The event index: presentation objects keyed by event identity.
//!
//! For every backing-sequence event inside the displayed time/pitch window
//! the index owns exactly one presentation object ([`ViewNote`],
//! [`ViewPatch`], or [`ViewSysex`]), looked up by identity in O(1). Objects
//! hold a shadow copy of their event plus a cached pixel rectangle tagged
//! with the mapper generation that produced it. The backing event is only
//! referenced by identity; the index is the sole owner of the presentation
//! side, so there is no bidirectional pointer pair to keep alive.
//!
//! Deltas may arrive out of order or twice: the sequence can be mutated by a
//! realtime thread whose notifications are delivered asynchronously. `sync`
//! therefore re-reads current event data for every delta and treats unknown
//! identities as silent no-ops; a later `full_resync` restores consistency.

use crate::geometry::{CoordinateMapper, Rect};
use crate::model::{
    Event, EventId, EventSequence, NoteEvent, PatchChangeEvent, SequenceDelta, SysExEvent,
};
use std::collections::HashMap;
use tracing::debug;

/// Pixel distance from a note edge that counts as a resize handle.
pub const EDGE_HIT_ZONE_PX: f64 = 3.0;

/// Presentation shadow of a note.
#[derive(Debug, Clone)]
pub struct ViewNote {
    pub event: NoteEvent,
    pub rect: Rect,
    pub generation: u64,
}

/// Presentation shadow of a patch change.
#[derive(Debug, Clone)]
pub struct ViewPatch {
    pub event: PatchChangeEvent,
    pub rect: Rect,
    pub generation: u64,
}

/// Presentation shadow of a sysex event.
#[derive(Debug, Clone)]
pub struct ViewSysex {
    pub event: SysExEvent,
    pub rect: Rect,
    pub generation: u64,
}

/// Any presentation object owned by the index.
#[derive(Debug, Clone)]
pub enum ViewItem {
    Note(ViewNote),
    Patch(ViewPatch),
    Sysex(ViewSysex),
}

impl ViewItem {
    fn from_event(event: &Event, mapper: &CoordinateMapper) -> Self {
        let generation = mapper.generation();
        match event {
            Event::Note(n) => ViewItem::Note(ViewNote {
                rect: mapper.note_rect(n),
                event: n.clone(),
                generation,
            }),
            Event::PatchChange(p) => ViewItem::Patch(ViewPatch {
                rect: mapper.flag_rect(p.time),
                event: p.clone(),
                generation,
            }),
            Event::SysEx(s) => ViewItem::Sysex(ViewSysex {
                rect: mapper.flag_rect(s.time),
                event: s.clone(),
                generation,
            }),
        }
    }

    pub fn id(&self) -> EventId {
        match self {
            ViewItem::Note(v) => v.event.id,
            ViewItem::Patch(v) => v.event.id,
            ViewItem::Sysex(v) => v.event.id,
        }
    }

    pub fn rect(&self) -> Rect {
        match self {
            ViewItem::Note(v) => v.rect,
            ViewItem::Patch(v) => v.rect,
            ViewItem::Sysex(v) => v.rect,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            ViewItem::Note(v) => v.generation,
            ViewItem::Patch(v) => v.generation,
            ViewItem::Sysex(v) => v.generation,
        }
    }

    pub fn as_note(&self) -> Option<&ViewNote> {
        match self {
            ViewItem::Note(v) => Some(v),
            _ => None,
        }
    }

    fn refresh(&mut self, mapper: &CoordinateMapper) {
        let generation = mapper.generation();
        match self {
            ViewItem::Note(v) => {
                v.rect = mapper.note_rect(&v.event);
                v.generation = generation;
            }
            ViewItem::Patch(v) => {
                v.rect = mapper.flag_rect(v.event.time);
                v.generation = generation;
            }
            ViewItem::Sysex(v) => {
                v.rect = mapper.flag_rect(v.event.time);
                v.generation = generation;
            }
        }
    }
}

/// Which part of a note a pixel position lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitZone {
    /// The note body.
    Body,
    /// Within [`EDGE_HIT_ZONE_PX`] of the note-on edge.
    Front,
    /// Within [`EDGE_HIT_ZONE_PX`] of the note-off edge.
    Back,
}

/// A change the index made to its presentation objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexChange {
    Added(EventId),
    Removed(EventId),
    Changed(EventId),
}

/// Bidirectional mapping between visible events and presentation objects.
#[derive(Debug, Default)]
pub struct EventIndex {
    items: HashMap<EventId, ViewItem>,
}

impl EventIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the presentation object for an identity.
    pub fn lookup(&self, id: EventId) -> Option<&ViewItem> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewItem> {
        self.items.values()
    }

    /// Iterates identities in a deterministic order.
    pub fn ids_sorted(&self) -> Vec<EventId> {
        let mut ids: Vec<EventId> = self.items.keys().copied().collect();
        ids.sort();
        ids
    }

    fn is_visible(event: &Event, mapper: &CoordinateMapper) -> bool {
        match event {
            Event::Note(n) => {
                mapper.pitch_in_window(n.pitch) && mapper.range_in_window(n.start, n.end())
            }
            other => mapper.time_in_window(other.time()),
        }
    }

    /// Applies one change notification.
    ///
    /// Idempotent with respect to already-applied adds and removes, and a
    /// no-op for identities the sequence no longer contains; this is the
    /// deliberate best-effort policy for racing a realtime writer, not a
    /// correctness guarantee.
    pub fn sync(
        &mut self,
        delta: SequenceDelta,
        sequence: &dyn EventSequence,
        mapper: &CoordinateMapper,
    ) -> Vec<IndexChange> {
        let id = delta.id();
        match delta {
            SequenceDelta::Removed(_) => {
                if self.items.remove(&id).is_some() {
                    vec![IndexChange::Removed(id)]
                } else {
                    debug!(id = id.as_u64(), "remove delta for unindexed event");
                    Vec::new()
                }
            }
            SequenceDelta::Added(_) | SequenceDelta::Changed(_) => {
                match sequence.get(id) {
                    Some(event) if Self::is_visible(&event, mapper) => {
                        let item = ViewItem::from_event(&event, mapper);
                        let existed = self.items.insert(id, item).is_some();
                        if existed {
                            vec![IndexChange::Changed(id)]
                        } else {
                            vec![IndexChange::Added(id)]
                        }
                    }
                    Some(_) => {
                        // Event moved outside the displayed window.
                        if self.items.remove(&id).is_some() {
                            vec![IndexChange::Removed(id)]
                        } else {
                            Vec::new()
                        }
                    }
                    None => {
                        // Raced with a concurrent removal.
                        debug!(id = id.as_u64(), "delta for event no longer in sequence");
                        if self.items.remove(&id).is_some() {
                            vec![IndexChange::Removed(id)]
                        } else {
                            Vec::new()
                        }
                    }
                }
            }
        }
    }

    /// Rebuilds the index from a fresh enumeration of the sequence.
    ///
    /// O(n) in visible event count. Reports the difference against the
    /// previous contents so observers see removals for objects that are gone.
    pub fn full_resync(
        &mut self,
        sequence: &dyn EventSequence,
        mapper: &CoordinateMapper,
    ) -> Vec<IndexChange> {
        let mut changes = Vec::new();
        let mut fresh: HashMap<EventId, ViewItem> = HashMap::new();

        for event in sequence.events() {
            if !Self::is_visible(&event, mapper) {
                continue;
            }
            let id = event.id();
            fresh.insert(id, ViewItem::from_event(&event, mapper));
            if self.items.contains_key(&id) {
                changes.push(IndexChange::Changed(id));
            } else {
                changes.push(IndexChange::Added(id));
            }
        }
        for id in self.items.keys() {
            if !fresh.contains_key(id) {
                changes.push(IndexChange::Removed(*id));
            }
        }
        self.items = fresh;
        changes
    }

    /// Recomputes pixel rectangles that were cached at an older mapper
    /// generation. Cheap when nothing changed.
    pub fn refresh_geometry(&mut self, mapper: &CoordinateMapper) {
        let generation = mapper.generation();
        for item in self.items.values_mut() {
            if item.generation() != generation {
                item.refresh(mapper);
            }
        }
    }

    /// Finds the topmost object at a pixel position.
    ///
    /// For notes the zone distinguishes the resize handles at either edge
    /// from the body. Ties are broken by identity so hit testing is
    /// deterministic.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<(EventId, HitZone)> {
        let mut hit: Option<(EventId, HitZone)> = None;
        for id in self.ids_sorted() {
            let item = &self.items[&id];
            let rect = item.rect();
            if !rect.contains(x, y) {
                continue;
            }
            let zone = match item {
                ViewItem::Note(_) => {
                    // Only use edge zones when the note is wide enough that
                    // the body remains grabbable.
                    if rect.width > EDGE_HIT_ZONE_PX * 3.0 {
                        if x < rect.x + EDGE_HIT_ZONE_PX {
                            HitZone::Front
                        } else if x >= rect.right() - EDGE_HIT_ZONE_PX {
                            HitZone::Back
                        } else {
                            HitZone::Body
                        }
                    } else {
                        HitZone::Body
                    }
                }
                _ => HitZone::Body,
            };
            hit = Some((id, zone));
        }
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Beats, MemorySequence, SequenceOp};

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new(36, 84, 40.0, 490.0, Beats::from_beats(8))
    }

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
    fn test_lookup_defined_iff_visible() {
        let m = mapper();
        let visible = note(60, 0);
        let off_pitch = note(20, 0);
        let off_time = note(60, Beats::from_beats(20).to_ticks());
        let ids = [visible.id(), off_pitch.id(), off_time.id()];
        let seq = seq_with(vec![visible, off_pitch, off_time]);

        let mut index = EventIndex::new();
        index.full_resync(&seq, &m);

        assert!(index.lookup(ids[0]).is_some());
        assert!(index.lookup(ids[1]).is_none());
        assert!(index.lookup(ids[2]).is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_sync_add_and_duplicate_delivery() {
        let m = mapper();
        let ev = note(60, 0);
        let id = ev.id();
        let seq = seq_with(vec![ev]);
        let mut index = EventIndex::new();

        let first = index.sync(SequenceDelta::Added(id), &seq, &m);
        assert_eq!(first, vec![IndexChange::Added(id)]);

        // Duplicate delivery degrades to a change, never a double add.
        let second = index.sync(SequenceDelta::Added(id), &seq, &m);
        assert_eq!(second, vec![IndexChange::Changed(id)]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_sync_stale_identity_is_noop() {
        let m = mapper();
        let seq = seq_with(vec![]);
        let mut index = EventIndex::new();

        let ghost = EventId::new();
        assert!(index.sync(SequenceDelta::Changed(ghost), &seq, &m).is_empty());
        assert!(index.sync(SequenceDelta::Removed(ghost), &seq, &m).is_empty());
    }

    #[test]
    fn test_sync_out_of_order_remove_then_add() {
        // A Removed delta processed before the Added delta of the same id:
        // the remove is a no-op, the add then indexes the live event.
        let m = mapper();
        let ev = note(60, 0);
        let id = ev.id();
        let seq = seq_with(vec![ev]);
        let mut index = EventIndex::new();

        assert!(index.sync(SequenceDelta::Removed(id), &seq, &m).is_empty());
        assert_eq!(
            index.sync(SequenceDelta::Added(id), &seq, &m),
            vec![IndexChange::Added(id)]
        );
    }

    #[test]
    fn test_change_moving_event_out_of_window_removes() {
        let m = mapper();
        let ev = note(60, 0);
        let id = ev.id();
        let mut seq = seq_with(vec![ev]);
        let mut index = EventIndex::new();
        index.full_resync(&seq, &m);
        assert!(index.contains(id));

        seq.apply(&[SequenceOp::Update {
            id,
            value: crate::model::PropertyValue::Pitch(10),
        }])
        .unwrap();
        seq.drain_deltas();

        assert_eq!(
            index.sync(SequenceDelta::Changed(id), &seq, &m),
            vec![IndexChange::Removed(id)]
        );
        assert!(!index.contains(id));
    }

    #[test]
    fn test_full_resync_reports_diff() {
        let m = mapper();
        let keep = note(60, 0);
        let drop = note(62, 480);
        let keep_id = keep.id();
        let drop_id = drop.id();
        let mut seq = seq_with(vec![keep, drop]);

        let mut index = EventIndex::new();
        index.full_resync(&seq, &m);

        seq.apply(&[SequenceOp::Remove(drop_id)]).unwrap();
        seq.drain_deltas();

        let changes = index.full_resync(&seq, &m);
        assert!(changes.contains(&IndexChange::Changed(keep_id)));
        assert!(changes.contains(&IndexChange::Removed(drop_id)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_hit_zones() {
        let m = mapper();
        let ev = note(60, 0); // one beat long: 40 px wide at x=0
        let id = ev.id();
        let seq = seq_with(vec![ev]);
        let mut index = EventIndex::new();
        index.full_resync(&seq, &m);

        let y = m.pitch_to_y(60) + 1.0;
        assert_eq!(index.hit_test(1.0, y), Some((id, HitZone::Front)));
        assert_eq!(index.hit_test(20.0, y), Some((id, HitZone::Body)));
        assert_eq!(index.hit_test(38.0, y), Some((id, HitZone::Back)));
        assert_eq!(index.hit_test(60.0, y), None);
    }

    #[test]
    fn test_refresh_geometry_after_zoom() {
        let mut m = mapper();
        let ev = note(60, 480);
        let id = ev.id();
        let seq = seq_with(vec![ev]);
        let mut index = EventIndex::new();
        index.full_resync(&seq, &m);

        let before = index.lookup(id).unwrap().rect();
        m.set_pixels_per_beat(80.0);
        index.refresh_geometry(&m);
        let after = index.lookup(id).unwrap();
        assert_eq!(after.generation(), m.generation());
        assert_eq!(after.rect().x, before.x * 2.0);
    }

    #[test]
    fn test_patch_and_sysex_indexed_by_time() {
        let m = mapper();
        let patch = Event::PatchChange(crate::model::PatchChangeEvent::new(
            Beats::from_beats(1),
            0,
            0,
            5,
        ));
        let sysex = Event::SysEx(crate::model::SysExEvent::new(
            Beats::from_beats(40),
            vec![0xf0, 0xf7],
        ));
        let patch_id = patch.id();
        let sysex_id = sysex.id();
        let seq = seq_with(vec![patch, sysex]);

        let mut index = EventIndex::new();
        index.full_resync(&seq, &m);
        assert!(index.contains(patch_id));
        assert!(!index.contains(sysex_id)); // outside the 8-beat window
    }
}
