//! Pointer gesture recognition and batch note operations.
//!
//! The controller is a state machine fed by pixel-space pointer events. A
//! button press arms a drag whose kind is decided by what lies under the
//! pointer (note body, note edge, flag, empty canvas); the drag only becomes
//! real once the pointer travels [`DRAG_THRESHOLD_PX`], below that the
//! release is interpreted as a click. Drags that mutate events record into
//! one view transaction opened at the threshold crossing, so Escape or a
//! failed commit leaves the sequence exactly as it was.
//!
//! Batch operations (transpose, velocity scaling, split/join, quantize,
//! nudge) act on the current selection in identity order and each commit as
//! a single named transaction.

use crate::index::HitZone;
use crate::model::{
    Beats, Event, EventId, EventSequence, NoteEvent, PropertyValue, SysExEvent,
    DEFAULT_VELOCITY, TICKS_PER_BEAT,
};
use crate::geometry::SnapPolicy;
use crate::transaction::EditError;
use crate::view::EditorView;
use tracing::{debug, warn};

/// Pointer travel in pixels below which a press/release pair is a click.
pub const DRAG_THRESHOLD_PX: f64 = 4.0;

/// Coarse velocity step (10 MIDI velocity units, normalized).
const VELOCITY_STEP_COARSE: f32 = 10.0 / 127.0;
/// Fine velocity step (1 MIDI velocity unit, normalized).
const VELOCITY_STEP_FINE: f32 = 1.0 / 127.0;

/// Keyboard modifier state accompanying a pointer event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

/// What a drag does once it passes the movement threshold.
#[derive(Debug, Clone)]
pub enum DragMode {
    /// Move the selected notes in time and pitch.
    Move {
        /// (identity, start, pitch) captured at the press.
        origins: Vec<(EventId, Beats, u8)>,
        /// Start of the grabbed note; snapping is anchored to it.
        primary_start: Beats,
    },
    /// Drag the note-on edge of the selected notes.
    ResizeFront {
        /// (identity, start, length) captured at the press.
        origins: Vec<(EventId, Beats, Beats)>,
        primary_start: Beats,
    },
    /// Drag the note-off edge of the selected notes.
    ResizeBack {
        origins: Vec<(EventId, Beats, Beats)>,
        /// End of the grabbed note; snapping is anchored to it.
        primary_end: Beats,
    },
    /// Move a patch-change or sysex flag in time.
    MoveFlag { id: EventId, origin_time: Beats },
    /// Rubber-band a new note from its snapped anchor.
    DrawNote { pitch: u8, anchor: Beats },
    /// Rubber-band a selection box over empty canvas.
    SelectBox { extend: bool },
    /// Preview a split point on a note; the split happens at release.
    SplitPreview { id: EventId, grid_time: Beats },
}

/// A drag in progress. Pixel positions are exposed so a host can render the
/// rubber band or preview without duplicating the arithmetic.
#[derive(Debug, Clone)]
pub struct DragContext {
    pub mode: DragMode,
    pub start_x: f64,
    pub start_y: f64,
    pub last_x: f64,
    pub last_y: f64,
    pub passed_threshold: bool,
    /// What a sub-threshold release does instead of a drag.
    click: ClickAction,
}

/// Interpretation of a press/release pair that never became a drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClickAction {
    None,
    /// Collapse a multi-note selection to the clicked note.
    Collapse(EventId),
    /// Draw-tool click on an existing note switches it on or off.
    ToggleVelocity(EventId),
}

impl DragContext {
    fn new(mode: DragMode, x: f64, y: f64) -> Self {
        Self {
            mode,
            start_x: x,
            start_y: y,
            last_x: x,
            last_y: y,
            passed_threshold: false,
            click: ClickAction::None,
        }
    }

    fn travel(&self) -> f64 {
        (self.last_x - self.start_x).hypot(self.last_y - self.start_y)
    }
}

/// Current interaction state.
#[derive(Debug, Clone)]
pub enum GestureState {
    Idle,
    /// Pointer is over an object, no button held.
    Hovering(EventId),
    Dragging(DragContext),
    /// A patch-change attribute editor is open for this flag.
    EditingPatch(EventId),
    /// A sysex payload editor is open for this flag.
    EditingSysex(EventId),
}

/// Re-splittable state from the last grid split.
#[derive(Debug, Clone)]
struct SplitSession {
    /// The notes as they were before the first split.
    originals: Vec<NoteEvent>,
    /// Identities of the current pieces, replaced on each re-split.
    pieces: Vec<EventId>,
    tuple: i64,
}

/// Turns pointer events into transactions and runs batch edits on the
/// selection.
#[derive(Debug, Default)]
pub struct GestureController {
    state: GestureState,
    split_session: Option<SplitSession>,
    /// Draw tool: presses on empty canvas create notes instead of a
    /// selection box, and clicks on notes toggle them on or off.
    draw_mode: bool,
    /// Split tool: presses on a note preview a split point instead of
    /// moving it.
    split_tool: bool,
}

impl Default for GestureState {
    fn default() -> Self {
        GestureState::Idle
    }
}

impl GestureController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn drag(&self) -> Option<&DragContext> {
        match &self.state {
            GestureState::Dragging(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, GestureState::Dragging(_))
    }

    pub fn draw_mode(&self) -> bool {
        self.draw_mode
    }

    pub fn set_draw_mode(&mut self, on: bool) {
        self.draw_mode = on;
    }

    pub fn split_tool(&self) -> bool {
        self.split_tool
    }

    pub fn set_split_tool(&mut self, on: bool) {
        self.split_tool = on;
    }

    // ----- pointer handlers --------------------------------------------

    /// Arms a drag from a button press.
    ///
    /// Selection updates happen here, at the press, so a subsequent drag
    /// already acts on the right set. A press while a drag is active is a
    /// stray event and is ignored.
    pub fn button_down<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        x: f64,
        y: f64,
        mods: Modifiers,
    ) {
        if self.is_dragging() {
            warn!("button press while a drag is active, ignored");
            return;
        }
        self.split_session = None;

        let Some((id, zone)) = view.index().hit_test(x, y) else {
            let mode = if self.draw_mode {
                let anchor = view
                    .mapper()
                    .snap(view.mapper().x_to_time(x), SnapPolicy::GridDown)
                    .max_zero();
                DragMode::DrawNote {
                    pitch: view.mapper().y_to_pitch(y),
                    anchor,
                }
            } else {
                DragMode::SelectBox { extend: mods.shift }
            };
            self.state = GestureState::Dragging(DragContext::new(mode, x, y));
            return;
        };

        let Some(event) = view.sequence().get(id) else {
            debug!(id = id.as_u64(), "press on stale object");
            return;
        };

        if self.split_tool && event.as_note().is_some() {
            let grid_time = view
                .mapper()
                .snap(view.mapper().x_to_time(x), SnapPolicy::GridNearest);
            let mode = DragMode::SplitPreview { id, grid_time };
            self.state = GestureState::Dragging(DragContext::new(mode, x, y));
            return;
        }

        let mut click = ClickAction::None;
        if self.draw_mode && event.as_note().is_some() {
            click = ClickAction::ToggleVelocity(id);
        }
        if mods.ctrl {
            view.toggle_select(id);
        } else if !view.selection().contains(id) {
            view.select_only(id);
        } else if zone == HitZone::Body && click == ClickAction::None {
            click = ClickAction::Collapse(id);
        }
        if !view.selection().contains(id) {
            // Ctrl-click deselected the note; the release finishes the click.
            self.state = GestureState::Idle;
            return;
        }

        let mode = match &event {
            Event::Note(grabbed) => {
                let notes = selected_notes(view);
                match zone {
                    HitZone::Body => DragMode::Move {
                        origins: notes.iter().map(|n| (n.id, n.start, n.pitch)).collect(),
                        primary_start: grabbed.start,
                    },
                    HitZone::Front => DragMode::ResizeFront {
                        origins: notes.iter().map(|n| (n.id, n.start, n.length)).collect(),
                        primary_start: grabbed.start,
                    },
                    HitZone::Back => DragMode::ResizeBack {
                        origins: notes.iter().map(|n| (n.id, n.start, n.length)).collect(),
                        primary_end: grabbed.end(),
                    },
                }
            }
            other => DragMode::MoveFlag {
                id,
                origin_time: other.time(),
            },
        };
        let mut ctx = DragContext::new(mode, x, y);
        ctx.click = click;
        self.state = GestureState::Dragging(ctx);
    }

    /// Tracks pointer motion.
    ///
    /// While idle this only maintains hover state. During a drag the first
    /// crossing of the threshold opens the transaction; every subsequent
    /// motion re-records absolute values computed from the press-time
    /// origins, so the transaction always holds one before/after pair per
    /// property.
    pub fn motion<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        x: f64,
        y: f64,
        mods: Modifiers,
    ) -> Result<(), EditError> {
        let GestureState::Dragging(ctx) = &mut self.state else {
            self.state = match view.index().hit_test(x, y) {
                Some((id, _)) => GestureState::Hovering(id),
                None => GestureState::Idle,
            };
            return Ok(());
        };

        ctx.last_x = x;
        ctx.last_y = y;
        if !ctx.passed_threshold {
            if ctx.travel() < DRAG_THRESHOLD_PX {
                return Ok(());
            }
            ctx.passed_threshold = true;
            ctx.click = ClickAction::None;
            if let Some(name) = transaction_name(&ctx.mode) {
                view.begin_edit(name)?;
            }
        }
        if let DragMode::SplitPreview { grid_time, .. } = &mut ctx.mode {
            *grid_time = view
                .mapper()
                .snap(view.mapper().x_to_time(x), SnapPolicy::GridNearest);
            return Ok(());
        }
        record_drag(view, ctx, mods)
    }

    /// Completes the gesture on button release.
    ///
    /// Below the threshold the press/release pair is a click; above it the
    /// open transaction commits as one undoable action.
    pub fn button_up<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        mods: Modifiers,
    ) -> Result<(), EditError> {
        let state = std::mem::replace(&mut self.state, GestureState::Idle);
        let GestureState::Dragging(ctx) = state else {
            return Ok(());
        };

        if !ctx.passed_threshold {
            match ctx.mode {
                DragMode::SelectBox { extend } => {
                    if !extend {
                        view.clear_selection();
                    }
                }
                DragMode::DrawNote { pitch, anchor } => {
                    self.create_note_at(view, anchor, pitch, default_note_length(view))?;
                }
                DragMode::SplitPreview { id, grid_time } => {
                    self.split_note_at(view, id, grid_time)?;
                }
                DragMode::MoveFlag { id, .. } => {
                    // A click on a flag opens its attribute editor.
                    match view.sequence().get(id) {
                        Some(Event::PatchChange(_)) => {
                            self.state = GestureState::EditingPatch(id);
                        }
                        Some(Event::SysEx(_)) => {
                            self.state = GestureState::EditingSysex(id);
                        }
                        _ => {}
                    }
                }
                _ => match ctx.click {
                    ClickAction::Collapse(id) => view.select_only(id),
                    ClickAction::ToggleVelocity(id) => {
                        self.toggle_note_velocity(view, id)?;
                    }
                    ClickAction::None => {}
                },
            }
            return Ok(());
        }

        match ctx.mode {
            DragMode::SelectBox { extend } => {
                let m = view.mapper();
                let t0 = m.x_to_time(ctx.start_x.min(ctx.last_x));
                let t1 = m.x_to_time(ctx.start_x.max(ctx.last_x));
                let p_hi = m.y_to_pitch(ctx.start_y.min(ctx.last_y));
                let p_lo = m.y_to_pitch(ctx.start_y.max(ctx.last_y));
                view.select_range(t0, t1, p_lo, p_hi, extend);
                Ok(())
            }
            DragMode::DrawNote { pitch, anchor } => {
                let policy = if mods.alt {
                    SnapPolicy::NoSnap
                } else {
                    SnapPolicy::GridNearest
                };
                let end = view.mapper().snap(view.mapper().x_to_time(ctx.last_x), policy);
                let length = (end - anchor).max(default_note_length(view));
                self.create_note_at(view, anchor, pitch, length)?;
                Ok(())
            }
            DragMode::SplitPreview { id, grid_time } => self.split_note_at(view, id, grid_time),
            _ => view.commit_edit(),
        }
    }

    /// Adjusts the velocity of the note under the pointer by one step.
    /// Ignored while a drag is active.
    pub fn scroll<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        x: f64,
        y: f64,
        up: bool,
        mods: Modifiers,
    ) -> Result<(), EditError> {
        if self.is_dragging() {
            return Ok(());
        }
        let Some((id, _)) = view.index().hit_test(x, y) else {
            return Ok(());
        };
        let Some(Event::Note(note)) = view.sequence().get(id) else {
            return Ok(());
        };
        let step = if mods.shift {
            VELOCITY_STEP_FINE
        } else {
            VELOCITY_STEP_COARSE
        };
        let delta = if up { step } else { -step };
        let new = (note.velocity + delta).clamp(0.0, 1.0);
        if new == note.velocity {
            // Already pinned at the bound; don't put a no-op in the history.
            return Ok(());
        }
        view.begin_edit("change velocity")?;
        view.record_change(id, PropertyValue::Velocity(new))?;
        view.commit_edit()
    }

    /// Cancels any drag in progress and discards its transaction.
    /// Unconditional and idempotent.
    pub fn escape<S: EventSequence>(&mut self, view: &mut EditorView<S>) {
        self.state = GestureState::Idle;
        view.abort_edit();
    }

    // ----- batch operations --------------------------------------------

    /// Creates a note, guarding against zero-length and against stacking a
    /// note onto one of the same pitch and channel already sounding there.
    pub fn create_note_at<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        start: Beats,
        pitch: u8,
        length: Beats,
    ) -> Result<Option<EventId>, EditError> {
        if length < Beats::ONE_TICK {
            return Ok(None);
        }
        let occupied = view.sequence().events().iter().any(|e| {
            e.as_note()
                .map_or(false, |n| n.pitch == pitch && n.channel == 0 && n.is_active_at(start))
        });
        if occupied {
            debug!(pitch, %start, "note already sounding here, not created");
            return Ok(None);
        }
        let note = NoteEvent::new(pitch, DEFAULT_VELOCITY, 0, start, length);
        let id = note.id;
        view.begin_edit("draw note")?;
        view.record_add(Event::Note(note))?;
        view.commit_edit()?;
        view.select_only(id);
        Ok(Some(id))
    }

    /// Deletes the selected events as one transaction.
    pub fn delete_selection<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
    ) -> Result<(), EditError> {
        let ids = view.selection_sorted();
        if ids.is_empty() {
            return Ok(());
        }
        view.begin_edit("delete events")?;
        for id in ids {
            view.record_remove(id)?;
        }
        view.commit_edit()
    }

    /// Steps the velocity of every selected note.
    ///
    /// Coarse steps are 10 velocity units, fine 1. Without `smush` the whole
    /// operation is skipped when any note would clamp at a bound, so relative
    /// dynamics are preserved. With `together` every note takes the value the
    /// first selected note ends up with.
    pub fn scale_velocity<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        up: bool,
        fine: bool,
        smush: bool,
        together: bool,
    ) -> Result<(), EditError> {
        let notes = selected_notes(view);
        let Some(first) = notes.first() else {
            return Ok(());
        };
        let step = if fine {
            VELOCITY_STEP_FINE
        } else {
            VELOCITY_STEP_COARSE
        };
        let delta = if up { step } else { -step };
        let target = first.velocity + delta;

        let mut pending = Vec::with_capacity(notes.len());
        for note in &notes {
            let new = if together { target } else { note.velocity + delta };
            if !smush && !(0.0..=1.0).contains(&new) {
                debug!("velocity change would clamp, skipped");
                return Ok(());
            }
            pending.push((note.id, new.clamp(0.0, 1.0)));
        }

        view.begin_edit("change velocities")?;
        for (id, velocity) in pending {
            view.record_change(id, PropertyValue::Velocity(velocity))?;
        }
        view.commit_edit()
    }

    /// Transposes the selected notes by an octave (coarse) or a semitone
    /// (fine). Without `smush` the operation is skipped when any note would
    /// leave the MIDI pitch range. The visible pitch window is widened first
    /// so transposed notes stay indexed and selected.
    pub fn scale_pitch<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        up: bool,
        fine: bool,
        smush: bool,
    ) -> Result<(), EditError> {
        let notes = selected_notes(view);
        if notes.is_empty() {
            return Ok(());
        }
        let step: i16 = if fine { 1 } else { 12 };
        let delta = if up { step } else { -step };

        let mut pending = Vec::with_capacity(notes.len());
        for note in &notes {
            let new = note.pitch as i16 + delta;
            if !smush && !(0..=127).contains(&new) {
                debug!("transpose would clamp, skipped");
                return Ok(());
            }
            pending.push((note.id, new.clamp(0, 127) as u8));
        }

        for &(_, pitch) in &pending {
            view.maybe_extend_note_range(pitch);
        }
        view.begin_edit("transpose")?;
        for (id, pitch) in pending {
            view.record_change(id, PropertyValue::Pitch(pitch))?;
        }
        view.commit_edit()
    }

    /// Scales the selected note lengths by the exact rational `num / den`.
    pub fn scale_duration<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        num: i64,
        den: i64,
    ) -> Result<(), EditError> {
        let notes = selected_notes(view);
        if notes.is_empty() || num <= 0 || den <= 0 {
            return Ok(());
        }
        view.begin_edit("scale durations")?;
        for note in notes {
            let length = note.length.scale(num, den).max(Beats::ONE_TICK);
            view.record_change(note.id, PropertyValue::Length(length))?;
        }
        view.commit_edit()
    }

    /// Nudges the selected notes by the grid (coarse) or a quarter of it
    /// (fine).
    pub fn nudge_selection<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        forward: bool,
        fine: bool,
    ) -> Result<(), EditError> {
        let notes = selected_notes(view);
        if notes.is_empty() {
            return Ok(());
        }
        let amount = nudge_amount(view, fine);
        let delta = if forward { amount } else { -amount };
        view.begin_edit("nudge notes")?;
        for note in notes {
            view.record_change(note.id, PropertyValue::Start((note.start + delta).max_zero()))?;
        }
        view.commit_edit()
    }

    /// Lengthens or shortens the selected notes by the grid (coarse) or a
    /// quarter of it (fine), from the front or the back.
    pub fn change_note_lengths<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        front: bool,
        shorten: bool,
        fine: bool,
    ) -> Result<(), EditError> {
        let notes = selected_notes(view);
        if notes.is_empty() {
            return Ok(());
        }
        let amount = nudge_amount(view, fine);
        view.begin_edit("change note lengths")?;
        for note in notes {
            if front {
                // The note-off edge stays put.
                let end = note.end();
                let new_start = if shorten { note.start + amount } else { note.start - amount };
                let new_start = new_start.max_zero().min(end - Beats::ONE_TICK);
                view.record_change(note.id, PropertyValue::Start(new_start))?;
                view.record_change(note.id, PropertyValue::Length(end - new_start))?;
            } else {
                let new_len = if shorten { note.length - amount } else { note.length + amount };
                view.record_change(note.id, PropertyValue::Length(new_len.max(Beats::ONE_TICK)))?;
            }
        }
        view.commit_edit()
    }

    /// Snaps the selected note starts to the nearest grid line.
    pub fn quantize_selection<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
    ) -> Result<(), EditError> {
        let notes = selected_notes(view);
        if notes.is_empty() || view.mapper().grid().is_zero() {
            return Ok(());
        }
        view.begin_edit("quantize notes")?;
        for note in notes {
            let snapped = view.mapper().snap(note.start, SnapPolicy::GridNearest);
            view.record_change(note.id, PropertyValue::Start(snapped))?;
        }
        view.commit_edit()
    }

    /// Splits every selected note into equal grid-derived pieces.
    ///
    /// The piece count comes from the first selected note's length over the
    /// grid; division remainders fold into the last piece so the pieces sum
    /// exactly to the original. Pieces inherit velocity, channel, and release
    /// velocity, and replace the originals in the selection. The split can be
    /// refined afterwards with [`split_more`](Self::split_more) and
    /// [`split_less`](Self::split_less).
    pub fn split_selection<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
    ) -> Result<(), EditError> {
        let notes = selected_notes(view);
        let Some(first) = notes.first() else {
            return Ok(());
        };
        let grid = view.mapper().grid();
        let tuple = if grid.is_zero() {
            2
        } else {
            (first.length.to_ticks() / grid.to_ticks()).max(2)
        };
        let session = SplitSession {
            pieces: notes.iter().map(|n| n.id).collect(),
            originals: notes,
            tuple,
        };
        self.split_session = Some(session);
        self.resplit(view)
    }

    /// One more piece per note of the previous split.
    pub fn split_more<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
    ) -> Result<(), EditError> {
        if let Some(session) = &mut self.split_session {
            session.tuple += 1;
            self.resplit(view)
        } else {
            Ok(())
        }
    }

    /// One fewer piece per note of the previous split, down to two.
    pub fn split_less<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
    ) -> Result<(), EditError> {
        if let Some(session) = &mut self.split_session {
            if session.tuple <= 2 {
                return Ok(());
            }
            session.tuple -= 1;
            self.resplit(view)
        } else {
            Ok(())
        }
    }

    fn resplit<S: EventSequence>(&mut self, view: &mut EditorView<S>) -> Result<(), EditError> {
        let Some(session) = self.split_session.as_mut() else {
            return Ok(());
        };
        let mut pieces: Vec<NoteEvent> = Vec::new();
        for original in &session.originals {
            let total = original.length.to_ticks();
            if total < session.tuple {
                // Too short to split further; keep it whole.
                pieces.push(original.duplicate());
                continue;
            }
            let piece_len = total / session.tuple;
            for i in 0..session.tuple {
                let mut piece = original.duplicate();
                piece.start = original.start + Beats::from_ticks(i * piece_len);
                piece.length = if i == session.tuple - 1 {
                    Beats::from_ticks(total - piece_len * (session.tuple - 1))
                } else {
                    Beats::from_ticks(piece_len)
                };
                pieces.push(piece);
            }
        }
        let old = std::mem::replace(
            &mut session.pieces,
            pieces.iter().map(|n| n.id).collect(),
        );
        let new_ids = session.pieces.clone();

        view.begin_edit("split notes")?;
        for id in old {
            view.record_remove(id)?;
        }
        for piece in pieces {
            view.record_add(Event::Note(piece))?;
        }
        view.commit_edit()?;

        view.clear_selection();
        for id in new_ids {
            view.add_select(id);
        }
        Ok(())
    }

    /// Splits one note into two at a point strictly inside it. A point on
    /// or outside the note's edges is a no-op.
    pub fn split_note_at<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        id: EventId,
        at: Beats,
    ) -> Result<(), EditError> {
        let Some(Event::Note(note)) = view.sequence().get(id) else {
            return Ok(());
        };
        if at <= note.start || at >= note.end() {
            return Ok(());
        }
        let mut head = note.duplicate();
        head.length = at - note.start;
        let mut tail = note.duplicate();
        tail.start = at;
        tail.length = note.end() - at;
        let (head_id, tail_id) = (head.id, tail.id);

        view.begin_edit("split notes")?;
        view.record_remove(id)?;
        view.record_add(Event::Note(head))?;
        view.record_add(Event::Note(tail))?;
        view.commit_edit()?;

        view.clear_selection();
        view.add_select(head_id);
        view.add_select(tail_id);
        Ok(())
    }

    /// Joins runs of selected notes sharing a channel and pitch into one
    /// note spanning from the earliest start to the latest end, with the
    /// velocities averaged. Groups of a single note are left alone.
    pub fn join_selection<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
    ) -> Result<(), EditError> {
        let notes = selected_notes(view);
        if notes.len() < 2 {
            return Ok(());
        }
        let mut groups: std::collections::HashMap<(u8, u8), Vec<NoteEvent>> =
            std::collections::HashMap::new();
        for note in notes {
            groups.entry((note.channel, note.pitch)).or_default().push(note);
        }

        let mut keys: Vec<(u8, u8)> = groups.keys().copied().collect();
        keys.sort();
        let mut joined: Vec<NoteEvent> = Vec::new();
        let mut removed: Vec<EventId> = Vec::new();
        for key in keys {
            let members = &groups[&key];
            if members.len() < 2 {
                continue;
            }
            let start = members.iter().map(|n| n.start).min().unwrap_or(Beats::ZERO);
            let end = members.iter().map(|n| n.end()).max().unwrap_or(Beats::ZERO);
            let velocity =
                members.iter().map(|n| n.velocity).sum::<f32>() / members.len() as f32;
            let mut note = members[0].duplicate();
            note.start = start;
            note.length = end - start;
            note.velocity = velocity;
            removed.extend(members.iter().map(|n| n.id));
            joined.push(note);
        }
        if joined.is_empty() {
            return Ok(());
        }
        let new_ids: Vec<EventId> = joined.iter().map(|n| n.id).collect();

        view.begin_edit("join notes")?;
        for id in removed {
            view.record_remove(id)?;
        }
        for note in joined {
            view.record_add(Event::Note(note))?;
        }
        view.commit_edit()?;

        for id in new_ids {
            view.add_select(id);
        }
        Ok(())
    }

    /// Toggles a note between silent and the default velocity.
    pub fn toggle_note_velocity<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        id: EventId,
    ) -> Result<(), EditError> {
        let Some(Event::Note(note)) = view.sequence().get(id) else {
            return Ok(());
        };
        let velocity = if note.velocity == 0.0 { DEFAULT_VELOCITY } else { 0.0 };
        view.begin_edit("toggle note")?;
        view.record_change(id, PropertyValue::Velocity(velocity))?;
        view.commit_edit()
    }

    /// Moves a patch-change or sysex flag to a new time.
    pub fn move_flag<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        id: EventId,
        time: Beats,
    ) -> Result<(), EditError> {
        if view.sequence().get(id).map_or(true, |e| e.as_note().is_some()) {
            return Ok(());
        }
        view.begin_edit("move event")?;
        view.record_change(id, PropertyValue::Time(time.max_zero()))?;
        view.commit_edit()
    }

    /// Steps a patch change's bank or program by `delta`, clamped to the
    /// valid MIDI range.
    pub fn step_patch<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        id: EventId,
        bank: bool,
        delta: i32,
    ) -> Result<(), EditError> {
        let Some(event) = view.sequence().get(id) else {
            return Ok(());
        };
        let Some(patch) = event.as_patch_change() else {
            return Ok(());
        };
        let value = if bank {
            PropertyValue::Bank((patch.bank as i32 + delta).clamp(0, 16383) as u16)
        } else {
            PropertyValue::Program((patch.program as i32 + delta).clamp(0, 127) as u8)
        };
        view.begin_edit("step patch")?;
        view.record_change(id, value)?;
        view.commit_edit()
    }

    /// Applies the values from an open patch-change editor and closes it.
    /// A no-op unless a patch editor is open.
    pub fn confirm_patch_edit<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        bank: u16,
        program: u8,
    ) -> Result<(), EditError> {
        let GestureState::EditingPatch(id) = self.state else {
            return Ok(());
        };
        self.state = GestureState::Idle;
        view.begin_edit("edit patch")?;
        view.record_change(id, PropertyValue::Bank(bank.min(16383)))?;
        view.record_change(id, PropertyValue::Program(program.min(127)))?;
        view.commit_edit()
    }

    /// Applies the payload from an open sysex editor and closes it. The
    /// payload is not a mutable property, so the event is replaced under a
    /// fresh identity at the same time.
    pub fn confirm_sysex_edit<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        bytes: Vec<u8>,
    ) -> Result<(), EditError> {
        let GestureState::EditingSysex(id) = self.state else {
            return Ok(());
        };
        self.state = GestureState::Idle;
        let Some(Event::SysEx(old)) = view.sequence().get(id) else {
            return Ok(());
        };
        view.begin_edit("edit sysex")?;
        view.record_remove(id)?;
        view.record_add(Event::SysEx(SysExEvent::new(old.time, bytes)))?;
        view.commit_edit()
    }

    /// Closes an open attribute editor without applying anything.
    pub fn cancel_edit(&mut self) {
        if matches!(
            self.state,
            GestureState::EditingPatch(_) | GestureState::EditingSysex(_)
        ) {
            self.state = GestureState::Idle;
        }
    }

    /// Deletes a single event (patch change, sysex, or note) by identity.
    pub fn delete_event<S: EventSequence>(
        &mut self,
        view: &mut EditorView<S>,
        id: EventId,
    ) -> Result<(), EditError> {
        if view.sequence().get(id).is_none() {
            return Ok(());
        }
        view.begin_edit("delete event")?;
        view.record_remove(id)?;
        view.commit_edit()
    }
}

/// Selected notes in identity order, read from the authoritative sequence.
fn selected_notes<S: EventSequence>(view: &EditorView<S>) -> Vec<NoteEvent> {
    view.selection_sorted()
        .into_iter()
        .filter_map(|id| view.sequence().get(id))
        .filter_map(|e| e.as_note().cloned())
        .collect()
}

/// Grid-derived step for nudges and length changes; fine steps are a quarter
/// of it. Falls back to a sixteenth when snapping is off.
fn nudge_amount<S: EventSequence>(view: &EditorView<S>, fine: bool) -> Beats {
    let grid = view.mapper().grid();
    let base = if grid.is_zero() {
        Beats::from_ticks(TICKS_PER_BEAT / 4)
    } else {
        grid
    };
    if fine {
        base.scale(1, 4).max(Beats::ONE_TICK)
    } else {
        base
    }
}

/// Default length for click-drawn notes: one grid cell, or a beat when
/// snapping is off.
fn default_note_length<S: EventSequence>(view: &EditorView<S>) -> Beats {
    let grid = view.mapper().grid();
    if grid.is_zero() {
        Beats::from_beats(1)
    } else {
        grid
    }
}

fn transaction_name(mode: &DragMode) -> Option<&'static str> {
    match mode {
        DragMode::Move { .. } => Some("move notes"),
        DragMode::ResizeFront { .. } | DragMode::ResizeBack { .. } => Some("resize notes"),
        DragMode::MoveFlag { .. } => Some("move event"),
        DragMode::DrawNote { .. } | DragMode::SelectBox { .. } | DragMode::SplitPreview { .. } => {
            None
        }
    }
}

/// Re-records the drag's target values from press-time origins.
///
/// Absolute placements honor the grid via the grabbed note (Alt suppresses
/// snapping); the other selected notes follow by the same delta so their
/// relative offsets survive.
fn record_drag<S: EventSequence>(
    view: &mut EditorView<S>,
    ctx: &DragContext,
    mods: Modifiers,
) -> Result<(), EditError> {
    let policy = if mods.alt {
        SnapPolicy::NoSnap
    } else {
        SnapPolicy::GridNearest
    };
    let dt_raw = view.mapper().x_to_time(ctx.last_x) - view.mapper().x_to_time(ctx.start_x);

    match &ctx.mode {
        DragMode::Move {
            origins,
            primary_start,
        } => {
            let snapped = view.mapper().snap(*primary_start + dt_raw, policy);
            let dt = snapped - *primary_start;
            let dp = view.mapper().y_to_pitch(ctx.last_y) as i16
                - view.mapper().y_to_pitch(ctx.start_y) as i16;
            for &(id, start, pitch) in origins {
                view.record_change(id, PropertyValue::Start((start + dt).max_zero()))?;
                let pitch = (pitch as i16 + dp).clamp(0, 127) as u8;
                view.record_change(id, PropertyValue::Pitch(pitch))?;
            }
        }
        DragMode::ResizeFront {
            origins,
            primary_start,
        } => {
            let snapped = view.mapper().snap(*primary_start + dt_raw, policy);
            let dt = snapped - *primary_start;
            for &(id, start, length) in origins {
                let end = start + length;
                let new_start = (start + dt).max_zero().min(end - Beats::ONE_TICK);
                view.record_change(id, PropertyValue::Start(new_start))?;
                view.record_change(id, PropertyValue::Length(end - new_start))?;
            }
        }
        DragMode::ResizeBack {
            origins,
            primary_end,
        } => {
            let snapped = view.mapper().snap(*primary_end + dt_raw, policy);
            let dt = snapped - *primary_end;
            for &(id, _, length) in origins {
                view.record_change(
                    id,
                    PropertyValue::Length((length + dt).max(Beats::ONE_TICK)),
                )?;
            }
        }
        DragMode::MoveFlag { id, origin_time } => {
            let snapped = view.mapper().snap(*origin_time + dt_raw, policy);
            view.record_change(*id, PropertyValue::Time(snapped.max_zero()))?;
        }
        DragMode::DrawNote { .. } | DragMode::SelectBox { .. } | DragMode::SplitPreview { .. } => {}
    }
    Ok(())
}
