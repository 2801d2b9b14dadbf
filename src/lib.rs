//! noteroll - interaction core for a piano-roll note editor.
//!
//! This library provides the editing machinery behind a MIDI note view:
//! coordinate mapping between musical time/pitch and pixels, an index of
//! visible presentation objects, selection, batched undoable transactions,
//! and pointer gesture recognition. Rendering and event-loop integration are
//! left to the host.

pub mod geometry;
pub mod gesture;
pub mod history;
pub mod index;
pub mod model;
pub mod selection;
pub mod transaction;
pub mod view;

// Re-export commonly used types
pub use geometry::{CoordinateMapper, Rect, SnapPolicy};
pub use gesture::{DragContext, DragMode, GestureController, GestureState, Modifiers};
pub use history::HistoryManager;
pub use index::{EventIndex, HitZone, IndexChange, ViewItem};
pub use model::{
    Beats, Event, EventId, EventSequence, MemorySequence, NoteEvent, PatchChangeEvent, Property,
    PropertyValue, SequenceDelta, SequenceError, SequenceOp, SysExEvent, TICKS_PER_BEAT,
};
pub use selection::SelectionSet;
pub use transaction::{AppliedTransaction, EditError, EditTransaction, PropertyChange};
pub use view::{EditorView, ViewSignal};
