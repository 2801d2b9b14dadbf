//! The closed set of event kinds and their property access surface.
//!
//! Patch changes and system-exclusive events share the note's ownership
//! model: stable identity, authoritative copy in the backing sequence. The
//! `Event` enum is deliberately a closed tagged variant rather than a trait
//! hierarchy; the editor only ever deals with these three kinds.

use super::note::{EventId, NoteEvent};
use super::Beats;
use serde::{Deserialize, Serialize};

/// A program/bank change at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchChangeEvent {
    pub id: EventId,
    pub time: Beats,
    /// MIDI channel (0-15).
    pub channel: u8,
    /// Bank number (14-bit, MSB/LSB combined).
    pub bank: u16,
    /// Program number (0-127).
    pub program: u8,
}

impl PatchChangeEvent {
    pub fn new(time: Beats, channel: u8, bank: u16, program: u8) -> Self {
        Self {
            id: EventId::new(),
            time: time.max_zero(),
            channel: channel.min(15),
            bank: bank.min(16383),
            program: program.min(127),
        }
    }
}

/// A raw system-exclusive message at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysExEvent {
    pub id: EventId,
    pub time: Beats,
    pub bytes: Vec<u8>,
}

impl SysExEvent {
    pub fn new(time: Beats, bytes: Vec<u8>) -> Self {
        Self {
            id: EventId::new(),
            time: time.max_zero(),
            bytes,
        }
    }
}

/// Any event the editor can display and mutate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Note(NoteEvent),
    PatchChange(PatchChangeEvent),
    SysEx(SysExEvent),
}

/// A mutable attribute of an event, used to key pending transaction entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Property {
    Pitch,
    Velocity,
    OffVelocity,
    Channel,
    Start,
    Length,
    Offset,
    /// Time position of a patch change or sysex event.
    Time,
    Bank,
    Program,
}

/// A typed value for one [`Property`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Pitch(u8),
    Velocity(f32),
    OffVelocity(f32),
    Channel(u8),
    Start(Beats),
    Length(Beats),
    Offset(Beats),
    Time(Beats),
    Bank(u16),
    Program(u8),
}

impl PropertyValue {
    /// Returns the property this value belongs to.
    pub fn property(&self) -> Property {
        match self {
            PropertyValue::Pitch(_) => Property::Pitch,
            PropertyValue::Velocity(_) => Property::Velocity,
            PropertyValue::OffVelocity(_) => Property::OffVelocity,
            PropertyValue::Channel(_) => Property::Channel,
            PropertyValue::Start(_) => Property::Start,
            PropertyValue::Length(_) => Property::Length,
            PropertyValue::Offset(_) => Property::Offset,
            PropertyValue::Time(_) => Property::Time,
            PropertyValue::Bank(_) => Property::Bank,
            PropertyValue::Program(_) => Property::Program,
        }
    }
}

impl Event {
    /// Returns the stable identity of the event.
    pub fn id(&self) -> EventId {
        match self {
            Event::Note(n) => n.id,
            Event::PatchChange(p) => p.id,
            Event::SysEx(s) => s.id,
        }
    }

    /// Returns the event's time position (note start, flag time).
    pub fn time(&self) -> Beats {
        match self {
            Event::Note(n) => n.start,
            Event::PatchChange(p) => p.time,
            Event::SysEx(s) => s.time,
        }
    }

    /// Reads a property value, or None if the property does not apply to
    /// this event kind.
    pub fn get(&self, property: Property) -> Option<PropertyValue> {
        match (self, property) {
            (Event::Note(n), Property::Pitch) => Some(PropertyValue::Pitch(n.pitch)),
            (Event::Note(n), Property::Velocity) => Some(PropertyValue::Velocity(n.velocity)),
            (Event::Note(n), Property::OffVelocity) => {
                Some(PropertyValue::OffVelocity(n.off_velocity))
            }
            (Event::Note(n), Property::Channel) => Some(PropertyValue::Channel(n.channel)),
            (Event::Note(n), Property::Start) => Some(PropertyValue::Start(n.start)),
            (Event::Note(n), Property::Length) => Some(PropertyValue::Length(n.length)),
            (Event::Note(n), Property::Offset) => Some(PropertyValue::Offset(n.offset)),
            (Event::PatchChange(p), Property::Time) => Some(PropertyValue::Time(p.time)),
            (Event::PatchChange(p), Property::Channel) => Some(PropertyValue::Channel(p.channel)),
            (Event::PatchChange(p), Property::Bank) => Some(PropertyValue::Bank(p.bank)),
            (Event::PatchChange(p), Property::Program) => Some(PropertyValue::Program(p.program)),
            (Event::SysEx(s), Property::Time) => Some(PropertyValue::Time(s.time)),
            _ => None,
        }
    }

    /// Writes a property value, clamping to the valid range.
    ///
    /// Returns false if the property does not apply to this event kind.
    pub fn set(&mut self, value: PropertyValue) -> bool {
        match (self, value) {
            (Event::Note(n), PropertyValue::Pitch(v)) => n.pitch = v.min(127),
            (Event::Note(n), PropertyValue::Velocity(v)) => n.velocity = v.clamp(0.0, 1.0),
            (Event::Note(n), PropertyValue::OffVelocity(v)) => {
                n.off_velocity = v.clamp(0.0, 1.0)
            }
            (Event::Note(n), PropertyValue::Channel(v)) => n.channel = v.min(15),
            (Event::Note(n), PropertyValue::Start(v)) => n.start = v.max_zero(),
            (Event::Note(n), PropertyValue::Length(v)) => n.length = v.max(Beats::ONE_TICK),
            (Event::Note(n), PropertyValue::Offset(v)) => n.offset = v,
            (Event::PatchChange(p), PropertyValue::Time(v)) => p.time = v.max_zero(),
            (Event::PatchChange(p), PropertyValue::Channel(v)) => p.channel = v.min(15),
            (Event::PatchChange(p), PropertyValue::Bank(v)) => p.bank = v.min(16383),
            (Event::PatchChange(p), PropertyValue::Program(v)) => p.program = v.min(127),
            (Event::SysEx(s), PropertyValue::Time(v)) => s.time = v.max_zero(),
            _ => return false,
        }
        true
    }

    /// Returns the contained note, if this is a note event.
    pub fn as_note(&self) -> Option<&NoteEvent> {
        match self {
            Event::Note(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_patch_change(&self) -> Option<&PatchChangeEvent> {
        match self {
            Event::PatchChange(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_sysex(&self) -> Option<&SysExEvent> {
        match self {
            Event::SysEx(s) => Some(s),
            _ => None,
        }
    }
}
