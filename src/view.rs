//! The editor view: one displayed region's worth of editing state.
//!
//! `EditorView` exclusively owns the coordinate mapper, event index,
//! selection, undo history, and the currently open transaction for a single
//! region. Everything runs on one UI-bound thread; the only cross-thread
//! surface is the backing sequence's delta queue, which is drained here.
//! While a transaction is open, drained-in deltas stay queued in the
//! sequence and are applied only after the transaction resolves, so a
//! realtime recording can never interleave with a half-built batch.
//!
//! Observers are not callbacks: the view accumulates [`ViewSignal`]s in an
//! outbox that the host drains each frame, which pins down delivery thread
//! and ordering by construction.

use crate::geometry::CoordinateMapper;
use crate::history::HistoryManager;
use crate::index::{EventIndex, IndexChange};
use crate::model::{Beats, Event, EventId, EventSequence, PropertyValue};
use crate::selection::SelectionSet;
use crate::transaction::{EditError, EditTransaction};
use tracing::{debug, warn};

/// A notification for the surrounding application.
///
/// Object signals let an external renderer draw/erase; selection and
/// transaction signals let other panels (e.g. a property inspector) follow
/// along. Signals are delivered in the order the underlying changes
/// happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewSignal {
    ObjectAdded(EventId),
    ObjectRemoved(EventId),
    ObjectChanged(EventId),
    SelectionChanged,
    TransactionOpened(String),
    /// A record call changed the pending state of the open transaction.
    TransactionChanged,
    TransactionCommitted(String),
    TransactionAborted(String),
    /// The backing sequence rejected a commit; the edit was discarded.
    TransactionFailed(String),
    NoteRangeChanged { low: u8, high: u8 },
}

/// View-side editing state for one displayed region.
#[derive(Debug)]
pub struct EditorView<S: EventSequence> {
    sequence: S,
    mapper: CoordinateMapper,
    index: EventIndex,
    selection: SelectionSet,
    history: HistoryManager,
    open: Option<EditTransaction>,
    signals: Vec<ViewSignal>,
}

impl<S: EventSequence> EditorView<S> {
    /// Creates a view over a sequence and builds the initial index.
    pub fn new(sequence: S, mapper: CoordinateMapper) -> Self {
        let mut view = Self {
            sequence,
            mapper,
            index: EventIndex::new(),
            selection: SelectionSet::new(),
            history: HistoryManager::new(),
            open: None,
            signals: Vec::new(),
        };
        view.full_resync();
        view
    }

    pub fn sequence(&self) -> &S {
        &self.sequence
    }

    /// Mutable sequence access, for hosts that feed it directly (e.g. a
    /// recording path in tests). View state catches up on the next
    /// `process_model_changes`.
    pub fn sequence_mut(&mut self) -> &mut S {
        &mut self.sequence
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    pub fn index(&self) -> &EventIndex {
        &self.index
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn open_transaction(&self) -> Option<&EditTransaction> {
        self.open.as_ref()
    }

    /// Drains accumulated signals, oldest first.
    pub fn take_signals(&mut self) -> Vec<ViewSignal> {
        std::mem::take(&mut self.signals)
    }

    // ----- model-change processing ------------------------------------

    /// Drains queued sequence deltas and updates the index.
    ///
    /// Deferred while a transaction is open: the deltas stay queued in the
    /// sequence and are processed when the transaction resolves.
    pub fn process_model_changes(&mut self) {
        if self.open.is_some() {
            return;
        }
        for delta in self.sequence.drain_deltas() {
            let changes = self.index.sync(delta, &self.sequence, &self.mapper);
            self.apply_index_changes(changes);
        }
    }

    /// Rebuilds the index from a fresh enumeration of the sequence.
    pub fn full_resync(&mut self) {
        let changes = self.index.full_resync(&self.sequence, &self.mapper);
        self.apply_index_changes(changes);
        // Anything already queued is covered by the rebuild.
        self.sequence.drain_deltas();
    }

    fn apply_index_changes(&mut self, changes: Vec<IndexChange>) {
        let mut selection_changed = false;
        for change in changes {
            match change {
                IndexChange::Added(id) => self.signals.push(ViewSignal::ObjectAdded(id)),
                IndexChange::Changed(id) => self.signals.push(ViewSignal::ObjectChanged(id)),
                IndexChange::Removed(id) => {
                    // Evict before anyone can observe a dangling member.
                    selection_changed |= self.selection.evict(id);
                    self.signals.push(ViewSignal::ObjectRemoved(id));
                }
            }
        }
        if selection_changed {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    // ----- window / geometry ------------------------------------------

    /// Atomically changes the visible pitch window and rebuilds affected
    /// presentation objects.
    pub fn set_note_range(&mut self, low: u8, high: u8) {
        if self.mapper.set_note_range(low, high) {
            let (low, high) = self.mapper.note_range();
            self.signals.push(ViewSignal::NoteRangeChanged { low, high });
            let changes = self.index.full_resync(&self.sequence, &self.mapper);
            self.apply_index_changes(changes);
        }
    }

    /// Widens the pitch window to admit a pitch if necessary.
    pub fn maybe_extend_note_range(&mut self, pitch: u8) {
        let (low, high) = self.mapper.note_range();
        self.set_note_range(low.min(pitch), high.max(pitch));
    }

    /// Changes the displayed time window; visibility may change, so the
    /// index is rebuilt.
    pub fn set_time_window(&mut self, origin: Beats, span: Beats) {
        if self.mapper.set_time_window(origin, span) {
            let changes = self.index.full_resync(&self.sequence, &self.mapper);
            self.apply_index_changes(changes);
        }
    }

    /// Changes horizontal zoom; visibility is unaffected, so cached
    /// geometry is refreshed in place.
    pub fn set_pixels_per_beat(&mut self, ppb: f64) {
        if self.mapper.set_pixels_per_beat(ppb) {
            self.index.refresh_geometry(&self.mapper);
        }
    }

    pub fn set_height(&mut self, height: f64) {
        if self.mapper.set_height(height) {
            self.index.refresh_geometry(&self.mapper);
        }
    }

    pub fn set_grid(&mut self, grid: Beats) {
        self.mapper.set_grid(grid);
    }

    // ----- transaction protocol ---------------------------------------

    /// Starts a named transaction.
    ///
    /// Transactions are not nestable; beginning while one is open is an
    /// error and leaves the open transaction untouched.
    pub fn begin_edit(&mut self, name: &str) -> Result<(), EditError> {
        if let Some(open) = &self.open {
            return Err(EditError::TransactionAlreadyOpen(open.name().to_string()));
        }
        self.open = Some(EditTransaction::new(name));
        self.signals.push(ViewSignal::TransactionOpened(name.to_string()));
        Ok(())
    }

    /// Records a property change into the open transaction.
    pub fn record_change(&mut self, id: EventId, value: PropertyValue) -> Result<(), EditError> {
        let tx = self.open.as_mut().ok_or(EditError::NoOpenTransaction)?;
        tx.record_change(&self.sequence, id, value);
        self.signals.push(ViewSignal::TransactionChanged);
        Ok(())
    }

    /// Records a pending insertion into the open transaction.
    pub fn record_add(&mut self, event: Event) -> Result<(), EditError> {
        let tx = self.open.as_mut().ok_or(EditError::NoOpenTransaction)?;
        tx.record_add(event);
        self.signals.push(ViewSignal::TransactionChanged);
        Ok(())
    }

    /// Records a pending removal into the open transaction.
    pub fn record_remove(&mut self, id: EventId) -> Result<(), EditError> {
        let tx = self.open.as_mut().ok_or(EditError::NoOpenTransaction)?;
        tx.record_remove(&self.sequence, id);
        self.signals.push(ViewSignal::TransactionChanged);
        Ok(())
    }

    /// Commits the open transaction as one atomic batch and one undo entry.
    ///
    /// An empty transaction is treated as an abort: nothing touches the
    /// sequence and no undo entry is produced. On failure the sequence is
    /// untouched, the transaction is discarded, and a `TransactionFailed`
    /// signal is emitted for the surrounding application.
    pub fn commit_edit(&mut self) -> Result<(), EditError> {
        let tx = self.open.take().ok_or(EditError::NoOpenTransaction)?;
        let name = tx.name().to_string();

        if tx.is_empty() {
            debug!(name, "empty transaction, treated as abort");
            self.signals.push(ViewSignal::TransactionAborted(name));
            self.process_model_changes();
            return Ok(());
        }

        match tx.commit(&mut self.sequence) {
            Ok(applied) => {
                self.history.push_undo(applied);
                self.signals.push(ViewSignal::TransactionCommitted(name));
                self.process_model_changes();
                Ok(())
            }
            Err(err) => {
                warn!(name, error = %err, "transaction commit failed");
                self.signals.push(ViewSignal::TransactionFailed(name));
                self.process_model_changes();
                Err(err)
            }
        }
    }

    /// Discards the open transaction, if any. Idempotent; aborting twice is
    /// a no-op. Deferred model changes are processed afterwards.
    pub fn abort_edit(&mut self) {
        if let Some(tx) = self.open.take() {
            self.signals
                .push(ViewSignal::TransactionAborted(tx.name().to_string()));
        }
        self.process_model_changes();
    }

    /// Returns an event with the open transaction's pending changes applied,
    /// for preview rendering during a drag.
    pub fn preview_event(&self, id: EventId) -> Option<Event> {
        let event = self.sequence.get(id)?;
        match &self.open {
            Some(tx) => Some(tx.preview(event)),
            None => Some(event),
        }
    }

    // ----- undo / redo -------------------------------------------------

    /// Reverts the most recent committed transaction.
    ///
    /// Returns its name, or None if there was nothing to undo or the
    /// sequence rejected the inverse batch (in which case the entry is kept).
    pub fn undo(&mut self) -> Option<String> {
        let record = self.history.pop_undo()?;
        match self.sequence.apply(&record.inverse_ops()) {
            Ok(()) => {
                let name = record.name.clone();
                self.history.push_redo(record);
                self.process_model_changes();
                Some(name)
            }
            Err(err) => {
                warn!(name = record.name, error = %err, "undo failed");
                self.history.push_undo_preserve_redo(record);
                None
            }
        }
    }

    /// Re-applies the most recently undone transaction.
    pub fn redo(&mut self) -> Option<String> {
        let record = self.history.pop_redo()?;
        match self.sequence.apply(&record.redo_ops()) {
            Ok(()) => {
                let name = record.name.clone();
                self.history.push_undo_preserve_redo(record);
                self.process_model_changes();
                Some(name)
            }
            Err(err) => {
                warn!(name = record.name, error = %err, "redo failed");
                self.history.push_redo(record);
                None
            }
        }
    }

    // ----- selection ---------------------------------------------------

    /// Replaces the selection with a single object.
    pub fn select_only(&mut self, id: EventId) {
        let mut changed = false;
        if !(self.selection.len() == 1 && self.selection.contains(id)) {
            changed |= self.selection.clear();
            changed |= self.selection.add(id, &self.index);
        }
        if changed {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    pub fn add_select(&mut self, id: EventId) {
        if self.selection.add(id, &self.index) {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    pub fn toggle_select(&mut self, id: EventId) {
        if self.selection.toggle(id, &self.index) {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    pub fn clear_selection(&mut self) {
        if self.selection.clear() {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    pub fn select_all(&mut self) {
        if self.selection.select_all(&self.index) {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    pub fn invert_selection(&mut self) {
        if self.selection.invert(&self.index) {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    pub fn select_range(
        &mut self,
        time_start: Beats,
        time_end: Beats,
        pitch_low: u8,
        pitch_high: u8,
        extend: bool,
    ) {
        if self
            .selection
            .select_range(time_start, time_end, pitch_low, pitch_high, extend, &self.index)
        {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    pub fn extend_selection(&mut self) {
        if self.selection.extend_to_span(&self.index) {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    pub fn select_matching_pitch(&mut self, pitch: u8, add: bool) {
        if self.selection.select_matching_pitch(pitch, add, &self.index) {
            self.signals.push(ViewSignal::SelectionChanged);
        }
    }

    /// Selected identities in deterministic order.
    pub fn selection_sorted(&self) -> Vec<EventId> {
        self.selection.iter_sorted()
    }

    // ----- region lifecycle --------------------------------------------

    /// Swaps in a different sequence (region change).
    ///
    /// Any open transaction is aborted first; selection and history do not
    /// survive across regions.
    pub fn load_sequence(&mut self, sequence: S) {
        self.abort_edit();
        self.sequence = sequence;
        if self.selection.clear() {
            self.signals.push(ViewSignal::SelectionChanged);
        }
        self.history.clear();
        self.full_resync();
    }
}
