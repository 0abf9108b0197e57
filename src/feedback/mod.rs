//! Feedback path: downstream state to device LEDs and displays
//!
//! The [`cache::FeedbackCache`] holds the last known per-deck snapshot and
//! gates outbound writes through [`throttle::FeedbackThrottle`]. Translators
//! turn each [`FeedbackUpdate`] into device-specific [`OutputDescriptor`]s.

pub mod cache;
pub mod state;
pub mod throttle;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use cache::FeedbackCache;
pub use state::{DeckState, StateMessage};
pub use throttle::FeedbackThrottle;

/// Rate class of a feedback control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlClass {
    Led,
    Vu,
    Display,
}

impl ControlClass {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "led" => Some(ControlClass::Led),
            "vu" => Some(ControlClass::Vu),
            "display" => Some(ControlClass::Display),
            _ => None,
        }
    }
}

/// Minimum spacing between two writes to the same control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackIntervals {
    pub led: Duration,
    pub vu: Duration,
    pub display: Duration,
}

impl Default for FeedbackIntervals {
    fn default() -> Self {
        Self {
            led: Duration::from_millis(20),
            vu: Duration::from_millis(16),
            display: Duration::from_millis(100),
        }
    }
}

impl FeedbackIntervals {
    pub fn from_millis(led: u64, vu: u64, display: u64) -> Self {
        Self {
            led: Duration::from_millis(led),
            vu: Duration::from_millis(vu),
            display: Duration::from_millis(display),
        }
    }

    pub fn for_class(&self, class: ControlClass) -> Duration {
        match class {
            ControlClass::Led => self.led,
            ControlClass::Vu => self.vu,
            ControlClass::Display => self.display,
        }
    }
}

/// Identifies the action whose feedback is being shown
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedbackKey {
    pub kind: String,
    pub command: String,
    pub deck: Option<String>,
}

impl FeedbackKey {
    pub fn new(kind: &str, command: &str, deck: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            command: command.to_string(),
            deck: deck.map(str::to_string),
        }
    }
}

/// Value to display for a feedback key
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedbackState {
    /// Binary state, resolved through the "on"/"off" entries
    Flag(bool),
    /// Fraction in 0..=1 (meters, position)
    Level(f64),
    /// Raw number (bpm, pitch)
    Number(f64),
}

impl FeedbackState {
    /// Name looked up in a descriptor's `states` map
    pub fn state_name(&self) -> String {
        match self {
            FeedbackState::Flag(true) => "on".to_string(),
            FeedbackState::Flag(false) => "off".to_string(),
            FeedbackState::Level(v) | FeedbackState::Number(v) => format!("{}", v.round() as i64),
        }
    }

    /// Output value when the states map has no entry
    pub fn default_output(&self) -> u8 {
        match *self {
            FeedbackState::Flag(true) => 127,
            FeedbackState::Flag(false) => 0,
            FeedbackState::Level(v) => (v.clamp(0.0, 1.0) * 127.0).round() as u8,
            FeedbackState::Number(v) => v.round().clamp(0.0, 127.0) as u8,
        }
    }
}

/// One derived feedback value
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackUpdate {
    pub key: FeedbackKey,
    pub state: FeedbackState,
    pub class: ControlClass,
}

/// Concrete write to a device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputDescriptor {
    Midi {
        kind: crate::mapping::MidiOutputKind,
        channel: u8,
        number: u8,
        value: u8,
    },
    Hid {
        report_id: u8,
        byte: usize,
        bit: Option<u8>,
        value: u8,
    },
}

impl OutputDescriptor {
    /// Stable identifier of the physical control, used as throttle key
    pub fn control_id(&self) -> String {
        match self {
            OutputDescriptor::Midi {
                kind,
                channel,
                number,
                ..
            } => format!("midi:{:?}:{}:{}", kind, channel, number).to_lowercase(),
            OutputDescriptor::Hid {
                report_id,
                byte,
                bit,
                ..
            } => match bit {
                Some(bit) => format!("hid:{}:{}.{}", report_id, byte, bit),
                None => format!("hid:{}:{}", report_id, byte),
            },
        }
    }

    pub fn value(&self) -> u8 {
        match self {
            OutputDescriptor::Midi { value, .. } | OutputDescriptor::Hid { value, .. } => *value,
        }
    }
}
