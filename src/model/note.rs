//! Note event representation.
//!
//! A note pairs a stable identity with mutable attributes: pitch, velocity,
//! channel, start time, length, and a fine time-offset. The backing sequence
//! owns the authoritative copy; the view layer only ever holds shadows.

use super::Beats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for generating unique event IDs.
/// Using atomic for thread-safety in case the recording thread creates events.
static EVENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Default velocity for newly drawn notes (100/127 in normalized units).
pub const DEFAULT_VELOCITY: f32 = 100.0 / 127.0;

/// Stable, opaque identity of an event within a sequence.
///
/// Identity survives every attribute edit, which is what lets selections and
/// pending transactions refer to events without index-based lookups.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventId(u64);

impl EventId {
    /// Generates a new unique event ID.
    ///
    /// Thread-safe: uses atomic increment internally.
    pub fn new() -> Self {
        Self(EVENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value (for serialization/debugging).
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// A single note with timing and dynamics.
///
/// Velocity is normalized to `0.0..=1.0`; `0.0` means the note is switched
/// off. `offset` is a fine time-offset added to `start` for display and
/// playback without disturbing the note's grid position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Unique identifier for this note instance.
    pub id: EventId,

    /// MIDI note number (0-127). 60 = Middle C (C4).
    pub pitch: u8,

    /// Normalized velocity (0.0-1.0). 0.0 is off.
    pub velocity: f32,

    /// Normalized release velocity (0.0-1.0).
    pub off_velocity: f32,

    /// MIDI channel (0-15).
    pub channel: u8,

    /// Start position.
    pub start: Beats,

    /// Duration. Always at least one tick.
    pub length: Beats,

    /// Fine time-offset applied on top of `start`.
    pub offset: Beats,
}

impl NoteEvent {
    /// Creates a new note with a fresh identity, clamping out-of-range values.
    pub fn new(pitch: u8, velocity: f32, channel: u8, start: Beats, length: Beats) -> Self {
        Self {
            id: EventId::new(),
            pitch: pitch.min(127),
            velocity: velocity.clamp(0.0, 1.0),
            off_velocity: 0.0,
            channel: channel.min(15),
            start: start.max_zero(),
            length: length.max(Beats::ONE_TICK),
            offset: Beats::ZERO,
        }
    }

    /// Returns the end time of this note (start + length).
    pub fn end(&self) -> Beats {
        self.start + self.length
    }

    /// Returns the start position with the fine offset applied.
    pub fn display_start(&self) -> Beats {
        self.start + self.offset
    }

    /// Checks if the note is sounding at a specific time.
    pub fn is_active_at(&self, t: Beats) -> bool {
        t >= self.start && t < self.end()
    }

    /// Checks if any part of the note falls within `[start, end)`.
    pub fn overlaps_range(&self, start: Beats, end: Beats) -> bool {
        self.start < end && self.end() > start
    }

    /// Creates a copy of this note with a new unique identity.
    pub fn duplicate(&self) -> Self {
        Self {
            id: EventId::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_creation() {
        let note = NoteEvent::new(60, 0.8, 0, Beats::ZERO, Beats::from_beats(1));
        assert_eq!(note.pitch, 60);
        assert_eq!(note.velocity, 0.8);
        assert_eq!(note.channel, 0);
        assert_eq!(note.length, Beats::from_beats(1));
        assert_eq!(note.offset, Beats::ZERO);
    }

    #[test]
    fn test_note_clamping() {
        let note = NoteEvent::new(200, 2.0, 99, Beats::from_ticks(-5), Beats::ZERO);
        assert_eq!(note.pitch, 127);
        assert_eq!(note.velocity, 1.0);
        assert_eq!(note.channel, 15);
        assert_eq!(note.start, Beats::ZERO);
        assert_eq!(note.length, Beats::ONE_TICK);
    }

    #[test]
    fn test_note_active() {
        let note = NoteEvent::new(
            60,
            0.8,
            0,
            Beats::from_ticks(100),
            Beats::from_ticks(200),
        );
        assert!(!note.is_active_at(Beats::from_ticks(99)));
        assert!(note.is_active_at(Beats::from_ticks(100)));
        assert!(note.is_active_at(Beats::from_ticks(299)));
        assert!(!note.is_active_at(Beats::from_ticks(300)));
    }

    #[test]
    fn test_note_overlap() {
        let note = NoteEvent::new(
            60,
            0.8,
            0,
            Beats::from_ticks(100),
            Beats::from_ticks(200),
        );
        assert!(note.overlaps_range(Beats::ZERO, Beats::from_ticks(150)));
        assert!(note.overlaps_range(Beats::from_ticks(200), Beats::from_ticks(400)));
        assert!(!note.overlaps_range(Beats::ZERO, Beats::from_ticks(100)));
        assert!(!note.overlaps_range(Beats::from_ticks(300), Beats::from_ticks(400)));
    }

    #[test]
    fn test_duplicate_gets_new_identity() {
        let note = NoteEvent::new(60, 0.8, 0, Beats::ZERO, Beats::from_beats(1));
        let copy = note.duplicate();
        assert_ne!(note.id, copy.id);
        assert_eq!(note.pitch, copy.pitch);
        assert_eq!(note.start, copy.start);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }
}
