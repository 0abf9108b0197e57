//! Validated, in-memory mapping model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::action::{ActionValue, Priority, Target};
use crate::event::EventKind;
use crate::expr::Expression;
use crate::feedback::ControlClass;
use crate::hid::ControlDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Midi,
    Hid,
}

impl Protocol {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "midi" => Some(Protocol::Midi),
            "hid" => Some(Protocol::Hid),
            _ => None,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Midi => f.write_str("midi"),
            Protocol::Hid => f.write_str("hid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub protocol: Protocol,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// Fallback mapping for unknown devices of this protocol
    pub generic: bool,
    pub poll_interval_ms: Option<u64>,
    pub report_length: Option<usize>,
}

/// MIDI message type a pattern matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiPatternKind {
    NoteOn,
    NoteOff,
    Cc,
    Pitch,
    Program,
}

impl MidiPatternKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "noteon" | "note" => Some(MidiPatternKind::NoteOn),
            "noteoff" => Some(MidiPatternKind::NoteOff),
            "cc" | "controlchange" => Some(MidiPatternKind::Cc),
            "pitch" | "pitchbend" => Some(MidiPatternKind::Pitch),
            "program" | "programchange" => Some(MidiPatternKind::Program),
            _ => None,
        }
    }

    /// Pattern kind an incoming event is looked up under
    pub fn from_event(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::NoteOn => Some(MidiPatternKind::NoteOn),
            EventKind::NoteOff => Some(MidiPatternKind::NoteOff),
            EventKind::Cc => Some(MidiPatternKind::Cc),
            EventKind::Pitch => Some(MidiPatternKind::Pitch),
            EventKind::Program => Some(MidiPatternKind::Program),
            _ => None,
        }
    }
}

/// Exact wire key of a MIDI control: (type, channel, note or controller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiPattern {
    pub kind: MidiPatternKind,
    pub channel: u8,
    /// Note or controller; 0 for pitch bend and program change
    pub number: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputPattern {
    Midi(MidiPattern),
    Hid { control: String },
}

#[derive(Debug, Clone)]
pub struct ActionTemplate {
    pub kind: String,
    pub command: String,
    pub value: Option<ActionValue>,
    pub value_expression: Option<Expression>,
    pub direction: Option<Expression>,
    pub mode: Option<Expression>,
    pub deck: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiOutputKind {
    Note,
    Cc,
}

/// Where feedback for a mapping is written on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackTarget {
    Midi {
        kind: MidiOutputKind,
        channel: u8,
        number: u8,
    },
    Hid {
        report_id: u8,
        byte: usize,
        bit: Option<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct FeedbackDescriptor {
    pub output: FeedbackTarget,
    /// State name ("on", "off", "playing", ...) to raw output value
    pub states: HashMap<String, u8>,
    /// Throttle class; falls back to the class of the feedback update
    pub class: Option<ControlClass>,
}

#[derive(Debug, Clone)]
pub struct ControlMapping {
    pub input: InputPattern,
    pub action: ActionTemplate,
    pub target: Target,
    pub priority: Priority,
    pub condition: Option<Expression>,
    pub emit_release: bool,
    pub feedback: Option<FeedbackDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputReport {
    pub report_id: u8,
    pub length: usize,
}

/// A device's complete, validated mapping
#[derive(Debug, Clone)]
pub struct DeviceMapping {
    pub device: DeviceInfo,
    /// HID report parsing descriptors
    pub controls: Vec<ControlDescriptor>,
    pub output_report: Option<OutputReport>,
    pub mappings: Vec<ControlMapping>,
}

impl DeviceMapping {
    pub fn name(&self) -> &str {
        &self.device.name
    }

    pub fn protocol(&self) -> Protocol {
        self.device.protocol
    }

    pub fn control(&self, name: &str) -> Option<&ControlDescriptor> {
        self.controls.iter().find(|c| c.name == name)
    }
}
