//! Coordinate mapping between musical time/pitch and pixels.
//!
//! The mapper owns the visible pitch window, the horizontal pixel density,
//! and the displayed time span, and converts in both directions with
//! explicit snap policies. It is stateless with respect to individual
//! events; per-event pixel rectangles are cached elsewhere and tagged with
//! the mapper's generation counter so a window change can never leave a
//! cache silently referencing stale geometry.

use crate::model::{Beats, NoteEvent};

/// Quantization policy for [`CoordinateMapper::snap`].
///
/// Policy is an explicit parameter rather than mapper state so gesture code
/// can force `NoSnap` for delta calculations while honoring the configured
/// grid for absolute placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapPolicy {
    /// Round down to the previous grid line.
    GridDown,
    /// Round to the nearest grid line.
    GridNearest,
    /// Leave the value untouched.
    NoSnap,
}

/// An axis-aligned pixel rectangle used for hit testing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Checks if a point is within the rectangle.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }
}

/// Pixel width used for patch-change and sysex flags.
const FLAG_WIDTH_PX: f64 = 8.0;

/// Converts between musical time/pitch and pixel coordinates.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    /// Lowest visible pitch (inclusive).
    low: u8,
    /// Highest visible pitch (inclusive). Always > `low`.
    high: u8,
    /// Horizontal density.
    pixels_per_beat: f64,
    /// Time at pixel x = 0; also the start of the displayed time window.
    origin: Beats,
    /// Length of the displayed time window.
    span: Beats,
    /// Pixel height of the note area.
    height: f64,
    /// Active grid for snapping.
    grid: Beats,
    /// Bumped on every change that invalidates cached pixel geometry.
    generation: u64,
}

impl CoordinateMapper {
    /// Creates a mapper for the given pitch window and displayed time span.
    ///
    /// The window is clamped so that `0 <= low < high <= 127` always holds.
    pub fn new(low: u8, high: u8, pixels_per_beat: f64, height: f64, span: Beats) -> Self {
        let low = low.min(126);
        let high = high.clamp(low + 1, 127);
        Self {
            low,
            high,
            pixels_per_beat: pixels_per_beat.max(f64::EPSILON),
            origin: Beats::ZERO,
            span: span.max(Beats::ONE_TICK),
            height: height.max(1.0),
            grid: Beats::from_beats(1),
            generation: 0,
        }
    }

    /// Returns the visible pitch window as (low, high), both inclusive.
    pub fn note_range(&self) -> (u8, u8) {
        (self.low, self.high)
    }

    /// Number of pitch rows in the window.
    pub fn visible_pitches(&self) -> u32 {
        (self.high - self.low) as u32 + 1
    }

    /// Pixel height of one pitch row.
    pub fn row_height(&self) -> f64 {
        self.height / self.visible_pitches() as f64
    }

    /// Returns the displayed time window as `[start, end)`.
    pub fn time_window(&self) -> (Beats, Beats) {
        (self.origin, self.origin + self.span)
    }

    /// Current geometry generation. Cached pixel rects computed at an older
    /// generation must be recomputed before use.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn grid(&self) -> Beats {
        self.grid
    }

    /// Sets the snap grid. Does not affect cached geometry.
    pub fn set_grid(&mut self, grid: Beats) {
        self.grid = grid.max(Beats::ZERO);
    }

    /// Maps a pitch to the top edge of its row. Pitches outside the window
    /// clamp to the window edge.
    pub fn pitch_to_y(&self, pitch: u8) -> f64 {
        let p = pitch.clamp(self.low, self.high);
        (self.high - p) as f64 * self.row_height()
    }

    /// Maps a vertical pixel position back to a pitch.
    ///
    /// Clamps to `[0, 127]` and to the visible window's extreme values, so a
    /// position exactly on the bottom boundary cannot round to a pitch one
    /// below the window.
    pub fn y_to_pitch(&self, y: f64) -> u8 {
        let row = (y / self.row_height()).floor() as i64;
        let pitch = self.high as i64 - row;
        pitch.clamp(self.low as i64, self.high as i64) as u8
    }

    /// Maps musical time to a horizontal pixel position.
    pub fn time_to_x(&self, t: Beats) -> f64 {
        (t - self.origin).as_beats_f64() * self.pixels_per_beat
    }

    /// Maps a horizontal pixel position to musical time, rounding to the
    /// nearest tick at the active density.
    pub fn x_to_time(&self, x: f64) -> Beats {
        self.origin + Beats::from_beats_f64(x / self.pixels_per_beat)
    }

    /// Quantizes a time under the given policy against the active grid.
    pub fn snap(&self, t: Beats, policy: SnapPolicy) -> Beats {
        match policy {
            SnapPolicy::GridDown => t.snap_down(self.grid),
            SnapPolicy::GridNearest => t.snap_nearest(self.grid),
            SnapPolicy::NoSnap => t,
        }
    }

    /// Changes the visible pitch window as one atomic operation.
    ///
    /// Derived quantities (row height, window size) are recomputed and the
    /// generation is bumped so stale per-event caches are detectable.
    /// Returns true if the window actually changed; callers rebuild affected
    /// rows when it did.
    pub fn set_note_range(&mut self, low: u8, high: u8) -> bool {
        let low = low.min(126);
        let high = high.clamp(low + 1, 127);
        if (low, high) == (self.low, self.high) {
            return false;
        }
        self.low = low;
        self.high = high;
        self.generation += 1;
        true
    }

    /// Widens the pitch window just enough to admit `pitch`, if needed.
    ///
    /// Returns true if the window changed.
    pub fn maybe_extend_note_range(&mut self, pitch: u8) -> bool {
        let low = self.low.min(pitch);
        let high = self.high.max(pitch);
        self.set_note_range(low, high)
    }

    /// Changes the horizontal pixel density. Returns true if it changed.
    pub fn set_pixels_per_beat(&mut self, ppb: f64) -> bool {
        let ppb = ppb.max(f64::EPSILON);
        if (ppb - self.pixels_per_beat).abs() < f64::EPSILON {
            return false;
        }
        self.pixels_per_beat = ppb;
        self.generation += 1;
        true
    }

    /// Moves the displayed time window. Returns true if it changed.
    pub fn set_time_window(&mut self, origin: Beats, span: Beats) -> bool {
        let span = span.max(Beats::ONE_TICK);
        if (origin, span) == (self.origin, self.span) {
            return false;
        }
        self.origin = origin;
        self.span = span;
        self.generation += 1;
        true
    }

    /// Changes the pixel height of the note area. Returns true if it changed.
    pub fn set_height(&mut self, height: f64) -> bool {
        let height = height.max(1.0);
        if (height - self.height).abs() < f64::EPSILON {
            return false;
        }
        self.height = height;
        self.generation += 1;
        true
    }

    /// True if the pitch falls inside the visible window.
    pub fn pitch_in_window(&self, pitch: u8) -> bool {
        pitch >= self.low && pitch <= self.high
    }

    /// True if any part of `[start, end)` falls inside the time window.
    pub fn range_in_window(&self, start: Beats, end: Beats) -> bool {
        let (w0, w1) = self.time_window();
        start < w1 && end > w0
    }

    /// True if a point in time falls inside the time window.
    pub fn time_in_window(&self, t: Beats) -> bool {
        let (w0, w1) = self.time_window();
        t >= w0 && t < w1
    }

    /// Computes the pixel rectangle of a note at the current geometry.
    pub fn note_rect(&self, note: &NoteEvent) -> Rect {
        let x = self.time_to_x(note.display_start());
        let width = note.length.as_beats_f64() * self.pixels_per_beat;
        Rect::new(x, self.pitch_to_y(note.pitch), width, self.row_height())
    }

    /// Computes the pixel rectangle of a patch-change or sysex flag.
    pub fn flag_rect(&self, time: Beats) -> Rect {
        Rect::new(self.time_to_x(time), 0.0, FLAG_WIDTH_PX, self.row_height())
    }
}
