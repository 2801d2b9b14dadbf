//! Event data model: musical time, note/patch-change/sysex events, and the
//! backing-sequence boundary.
//!
//! Everything the editor manipulates lives here. Times are exact integer
//! tick counts so that repeated nudges and rational length scaling never
//! accumulate floating-point drift.

mod event;
mod note;
mod sequence;

pub use event::{Event, PatchChangeEvent, Property, PropertyValue, SysExEvent};
pub use note::{EventId, NoteEvent, DEFAULT_VELOCITY};
pub use sequence::{EventSequence, MemorySequence, SequenceDelta, SequenceError, SequenceOp};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Ticks per beat (quarter note). Higher values allow finer rhythmic precision.
pub const TICKS_PER_BEAT: i64 = 480;

/// Musical time as an exact tick count.
///
/// `Beats` is a thin wrapper over a signed tick count at [`TICKS_PER_BEAT`]
/// resolution. Negative values are legal as intermediate deltas; event
/// positions themselves are kept non-negative by their owners.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Beats(i64);

impl Beats {
    pub const ZERO: Beats = Beats(0);

    /// The smallest representable duration.
    pub const ONE_TICK: Beats = Beats(1);

    /// Creates a time from a raw tick count.
    pub fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    /// Creates a time from a whole number of beats.
    pub fn from_beats(beats: i64) -> Self {
        Self(beats * TICKS_PER_BEAT)
    }

    /// Creates a time from a fractional beat count, rounding to the nearest tick.
    ///
    /// Only used at the pixel-mapping boundary; model arithmetic stays in ticks.
    pub fn from_beats_f64(beats: f64) -> Self {
        Self((beats * TICKS_PER_BEAT as f64).round() as i64)
    }

    /// Returns the raw tick count.
    pub fn to_ticks(self) -> i64 {
        self.0
    }

    /// Returns the time as a fractional beat count.
    pub fn as_beats_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_BEAT as f64
    }

    /// Scales the time by the exact rational `num / den` in tick space.
    ///
    /// The intermediate product is computed in `i128`, so repeated scaling
    /// (e.g. nudging a duration up and back down) is lossless apart from the
    /// single final integer division.
    pub fn scale(self, num: i64, den: i64) -> Self {
        debug_assert!(den != 0);
        Self((self.0 as i128 * num as i128 / den as i128) as i64)
    }

    /// Snaps down to the previous multiple of `grid` (grid-down policy).
    pub fn snap_down(self, grid: Beats) -> Self {
        if grid.0 <= 0 {
            return self;
        }
        Self(self.0.div_euclid(grid.0) * grid.0)
    }

    /// Snaps to the nearest multiple of `grid` (grid-nearest policy).
    pub fn snap_nearest(self, grid: Beats) -> Self {
        if grid.0 <= 0 {
            return self;
        }
        let down = self.0.div_euclid(grid.0) * grid.0;
        let rem = self.0 - down;
        if rem * 2 >= grid.0 {
            Self(down + grid.0)
        } else {
            Self(down)
        }
    }

    /// Returns true if the time is an exact multiple of `grid`.
    pub fn is_on_grid(self, grid: Beats) -> bool {
        grid.0 > 0 && self.0.rem_euclid(grid.0) == 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Clamps negative times to zero.
    pub fn max_zero(self) -> Self {
        Self(self.0.max(0))
    }
}

impl Add for Beats {
    type Output = Beats;
    fn add(self, rhs: Beats) -> Beats {
        Beats(self.0 + rhs.0)
    }
}

impl Sub for Beats {
    type Output = Beats;
    fn sub(self, rhs: Beats) -> Beats {
        Beats(self.0 - rhs.0)
    }
}

impl AddAssign for Beats {
    fn add_assign(&mut self, rhs: Beats) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Beats {
    fn sub_assign(&mut self, rhs: Beats) {
        self.0 -= rhs.0;
    }
}

impl Neg for Beats {
    type Output = Beats;
    fn neg(self) -> Beats {
        Beats(-self.0)
    }
}

impl fmt::Display for Beats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let beats = self.0.div_euclid(TICKS_PER_BEAT);
        let ticks = self.0.rem_euclid(TICKS_PER_BEAT);
        write!(f, "{}:{:03}", beats, ticks)
    }
}

/// Standard note names for display purposes.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a MIDI note number to a human-readable name with octave.
///
/// # Examples
///
/// ```
/// use noteroll::model::note_to_name;
///
/// assert_eq!(note_to_name(60), "C4"); // Middle C
/// ```
pub fn note_to_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1; // MIDI octave convention
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}
