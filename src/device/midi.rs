//! MIDI device adapter (midir)
//!
//! The input callback runs on midir's thread. It owns the device's
//! normalizer (14-bit pairing state and timestamp clamp) and pushes events
//! into the shared inbound channel without blocking.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::{DeviceOutput, DeviceSettings};
use crate::event::{now_ms, HardwareEvent, InboundEvent, MonotonicClock};
use crate::feedback::OutputDescriptor;
use crate::mapping::MidiOutputKind;
use crate::midi::high_res::HighResTracker;
use crate::midi::{find_port_by_substring, format_hex, normalize, MidiMessage};

/// Raw bytes to canonical events for one MIDI device
#[derive(Debug)]
pub struct MidiNormalizer {
    device_id: String,
    tracker: HighResTracker,
    clock: MonotonicClock,
    optimistic_msb: bool,
}

impl MidiNormalizer {
    pub fn new(device_id: impl Into<String>, pairing_window_ms: u64, optimistic_msb: bool) -> Self {
        Self {
            device_id: device_id.into(),
            tracker: HighResTracker::new(pairing_window_ms),
            clock: MonotonicClock::new(),
            optimistic_msb,
        }
    }

    /// Normalize one raw message
    ///
    /// Unparseable messages and held MSBs yield no event.
    pub fn process(&mut self, bytes: &[u8], timestamp: u64) -> Vec<HardwareEvent> {
        let Some(message) = MidiMessage::parse(bytes) else {
            trace!("Ignoring MIDI bytes from '{}': {}", self.device_id, format_hex(bytes));
            return Vec::new();
        };
        let timestamp = self.clock.stamp(timestamp);
        match normalize(&self.device_id, &message, timestamp) {
            Some(event) => self.tracker.process(event, self.optimistic_msb),
            None => Vec::new(),
        }
    }
}

/// Open input connection (and optional output) for one MIDI port
pub struct MidiDevice {
    pub port_name: String,
    _input: midir::MidiInputConnection<()>,
    pub output: Option<Arc<MidiOutputWriter>>,
}

/// Open a MIDI input port and, when present, the output port of the same
/// name
///
/// # Arguments
/// * `port_name` - Full port name as enumerated
/// * `settings` - Pairing window and MSB policy
/// * `events` - Shared inbound channel
pub fn open(
    port_name: &str,
    settings: &DeviceSettings,
    events: mpsc::Sender<InboundEvent>,
) -> Result<MidiDevice> {
    let midi_in = midir::MidiInput::new("deckbridge-in")?;
    let (port, name) = find_port_by_substring(&midi_in, port_name)
        .ok_or_else(|| anyhow!("Input port '{}' not found", port_name))?;

    let mut normalizer = MidiNormalizer::new(name.clone(), settings.pairing_window_ms, settings.optimistic_msb);
    let device_id = name.clone();

    let input = midi_in
        .connect(
            &port,
            &format!("deckbridge-{}", name),
            move |_stamp, data, _| {
                for event in normalizer.process(data, now_ms()) {
                    if events.try_send(InboundEvent::Hardware(event)).is_err() {
                        // Channel full or closed; input is never blocked
                        debug!("Inbound channel unavailable, dropping event from '{}'", device_id);
                    }
                }
            },
            (),
        )
        .map_err(|e| anyhow!("Failed to connect input '{}': {}", name, e))?;

    let output = match MidiOutputWriter::open(&name) {
        Ok(writer) => Some(Arc::new(writer)),
        Err(e) => {
            debug!("No MIDI output for '{}': {:#}", name, e);
            None
        }
    };

    info!(
        "🎹 MIDI device opened: '{}'{}",
        name,
        if output.is_some() { " (with feedback output)" } else { "" }
    );

    Ok(MidiDevice {
        port_name: name,
        _input: input,
        output,
    })
}

/// Names of all MIDI input ports currently present
pub fn input_port_names() -> Result<Vec<String>> {
    let midi_in = midir::MidiInput::new("deckbridge-scan").context("Failed to initialize MIDI input")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

/// Feedback writer for a MIDI output port
pub struct MidiOutputWriter {
    port_name: String,
    connection: Mutex<midir::MidiOutputConnection>,
}

impl MidiOutputWriter {
    pub fn open(port_name: &str) -> Result<Self> {
        let midi_out = midir::MidiOutput::new("deckbridge-out")?;
        let (port, name) = find_port_by_substring(&midi_out, port_name)
            .ok_or_else(|| anyhow!("Output port '{}' not found", port_name))?;
        let connection = midi_out
            .connect(&port, &format!("deckbridge-{}", name))
            .map_err(|e| anyhow!("Failed to connect output '{}': {}", name, e))?;
        Ok(Self {
            port_name: name,
            connection: Mutex::new(connection),
        })
    }
}

/// Wire message for a MIDI feedback output
pub fn feedback_message(output: &OutputDescriptor) -> Option<MidiMessage> {
    match *output {
        OutputDescriptor::Midi {
            kind: MidiOutputKind::Note,
            channel,
            number,
            value,
        } => Some(MidiMessage::NoteOn {
            channel: channel & 0x0F,
            note: number & 0x7F,
            velocity: value & 0x7F,
        }),
        OutputDescriptor::Midi {
            kind: MidiOutputKind::Cc,
            channel,
            number,
            value,
        } => Some(MidiMessage::ControlChange {
            channel: channel & 0x0F,
            cc: number & 0x7F,
            value: value & 0x7F,
        }),
        OutputDescriptor::Hid { .. } => None,
    }
}

impl DeviceOutput for MidiOutputWriter {
    fn write(&self, output: &OutputDescriptor) -> Result<()> {
        let Some(message) = feedback_message(output) else {
            warn!("HID output {:?} sent to MIDI device '{}'", output, self.port_name);
            return Ok(());
        };
        let bytes = message.encode();
        trace!("MIDI TX '{}': {}", self.port_name, format_hex(&bytes));
        self.connection
            .lock()
            .send(&bytes)
            .with_context(|| format!("Failed to send to '{}'", self.port_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn test_normalizer_pairs_and_clamps_time() {
        let mut normalizer = MidiNormalizer::new("ddj", 50, false);

        assert!(normalizer.process(&[0xB0, 0x07, 0x40], 1_000).is_empty());
        // Timestamp going backwards is clamped
        let events = normalizer.process(&[0xB0, 0x27, 0x00], 990);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, 1_000);
        assert_eq!(events[0].value14bit, Some(8192));
    }

    #[test]
    fn test_normalizer_optimistic_msb() {
        let mut normalizer = MidiNormalizer::new("ddj", 50, true);
        let events = normalizer.process(&[0xB0, 0x07, 0x40], 1_000);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Cc);
        assert!(!events[0].high_res);
    }

    #[test]
    fn test_normalizer_ignores_garbage() {
        let mut normalizer = MidiNormalizer::new("ddj", 50, false);
        assert!(normalizer.process(&[0xF8], 1).is_empty());
        assert!(normalizer.process(&[], 1).is_empty());
        assert!(normalizer.process(&[0x90, 0x0B], 1).is_empty());
    }

    #[test]
    fn test_feedback_messages() {
        let led = OutputDescriptor::Midi {
            kind: MidiOutputKind::Note,
            channel: 1,
            number: 11,
            value: 127,
        };
        assert_eq!(feedback_message(&led).unwrap().encode(), vec![0x91, 11, 127]);

        let ring = OutputDescriptor::Midi {
            kind: MidiOutputKind::Cc,
            channel: 0,
            number: 2,
            value: 64,
        };
        assert_eq!(feedback_message(&ring).unwrap().encode(), vec![0xB0, 2, 64]);

        let hid = OutputDescriptor::Hid {
            report_id: 0,
            byte: 1,
            bit: None,
            value: 1,
        };
        assert!(feedback_message(&hid).is_none());
    }
}
