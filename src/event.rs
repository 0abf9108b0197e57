//! Canonical hardware events
//!
//! Both input adapters (MIDI callbacks and HID poll loops) convert their raw
//! driver data into [`HardwareEvent`]s and push them, wrapped in
//! [`InboundEvent`], into one shared channel consumed by the pipeline.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::device::DeviceOutput;
use crate::mapping::DeviceMapping;

/// Kind of a canonical hardware event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    NoteOn,
    NoteOff,
    Cc,
    Pitch,
    Program,
    Button,
    Modifier,
    Delta,
    Absolute,
    Encoder,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::NoteOn => "noteon",
            EventKind::NoteOff => "noteoff",
            EventKind::Cc => "cc",
            EventKind::Pitch => "pitch",
            EventKind::Program => "program",
            EventKind::Button => "button",
            EventKind::Modifier => "modifier",
            EventKind::Delta => "delta",
            EventKind::Absolute => "absolute",
            EventKind::Encoder => "encoder",
        };
        f.write_str(name)
    }
}

/// Device-independent record of one hardware input change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareEvent {
    pub device_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
    /// Named HID control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    pub value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Running position accumulated for relative (delta) controls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_position: Option<i64>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    #[serde(default)]
    pub high_res: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<f64>,
    #[serde(rename = "value14bit", skip_serializing_if = "Option::is_none")]
    pub value14bit: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msb: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lsb: Option<u8>,
}

impl HardwareEvent {
    /// Create an event with only the mandatory fields set
    pub fn new(device_id: impl Into<String>, kind: EventKind, value: i64, timestamp: u64) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            channel: None,
            note: None,
            controller: None,
            velocity: None,
            control: None,
            value,
            delta: None,
            absolute_position: None,
            timestamp,
            high_res: false,
            normalized: None,
            value14bit: None,
            max_value: None,
            msb: None,
            lsb: None,
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_note(mut self, note: u8, velocity: u8) -> Self {
        self.note = Some(note);
        self.velocity = Some(velocity);
        self
    }

    pub fn with_controller(mut self, controller: u8) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_control(mut self, control: impl Into<String>) -> Self {
        self.control = Some(control.into());
        self
    }

    pub fn with_delta(mut self, delta: i64) -> Self {
        self.delta = Some(delta);
        self
    }
}

/// Message carried on the shared inbound channel
pub enum InboundEvent {
    /// A device was opened and resolved to a mapping
    Connected {
        device_id: String,
        mapping: Arc<DeviceMapping>,
        output: Option<Arc<dyn DeviceOutput>>,
    },
    /// A device went away (unplugged, read fault, closed)
    Disconnected { device_id: String, reason: String },
    /// A normalized input event
    Hardware(HardwareEvent),
}

impl InboundEvent {
    pub fn device_id(&self) -> &str {
        match self {
            InboundEvent::Connected { device_id, .. } => device_id,
            InboundEvent::Disconnected { device_id, .. } => device_id,
            InboundEvent::Hardware(event) => &event.device_id,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Clamps timestamps so a device's event stream never goes backwards
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `ts`, or the previous timestamp if `ts` is older
    pub fn stamp(&mut self, ts: u64) -> u64 {
        self.last = self.last.max(ts);
        self.last
    }
}
