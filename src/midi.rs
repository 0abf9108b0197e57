//! MIDI message types and the MIDI event normalizer
//!
//! Raw channel messages are parsed into [`MidiMessage`], then [`normalize`]
//! turns them into canonical [`HardwareEvent`]s. Paired 14-bit CCs are
//! combined afterwards by [`high_res::HighResTracker`].

pub mod high_res;

use std::fmt;
use tracing::debug;

use crate::event::{EventKind, HardwareEvent};

/// Full-scale value of 14-bit MIDI quantities (pitch bend, paired CCs)
pub const MAX_14BIT: u16 = 16383;

/// MIDI channel messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (1-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Polyphonic Key Pressure
    PolyPressure { channel: u8, note: u8, pressure: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure
    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Parse a channel message from raw bytes
    ///
    /// System messages and running status are not used by controllers we
    /// map and are ignored.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }

        let channel = status & 0x0F;
        let d1 = data.get(1).map(|b| b & 0x7F);
        let d2 = data.get(2).map(|b| b & 0x7F);

        match status & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: d1?,
                velocity: d2?,
            }),
            0x90 => {
                let (note, velocity) = (d1?, d2?);
                // Note On with velocity 0 is a Note Off
                if velocity == 0 {
                    Some(MidiMessage::NoteOff { channel, note, velocity: 0 })
                } else {
                    Some(MidiMessage::NoteOn { channel, note, velocity })
                }
            }
            0xA0 => Some(MidiMessage::PolyPressure {
                channel,
                note: d1?,
                pressure: d2?,
            }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                cc: d1?,
                value: d2?,
            }),
            0xC0 => Some(MidiMessage::ProgramChange { channel, program: d1? }),
            0xD0 => Some(MidiMessage::ChannelPressure { channel, pressure: d1? }),
            0xE0 => {
                let lsb = d1? as u16;
                let msb = d2? as u16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => None,
        }
    }

    /// Wire bytes, data bytes masked to 7 bits
    pub fn encode(&self) -> Vec<u8> {
        let (status, channel, data, len) = match *self {
            MidiMessage::NoteOff { channel, note, velocity } => (0x80, channel, [note, velocity], 2),
            MidiMessage::NoteOn { channel, note, velocity } => (0x90, channel, [note, velocity], 2),
            MidiMessage::PolyPressure { channel, note, pressure } => (0xA0, channel, [note, pressure], 2),
            MidiMessage::ControlChange { channel, cc, value } => (0xB0, channel, [cc, value], 2),
            MidiMessage::ProgramChange { channel, program } => (0xC0, channel, [program, 0], 1),
            MidiMessage::ChannelPressure { channel, pressure } => (0xD0, channel, [pressure, 0], 1),
            // LSB first
            MidiMessage::PitchBend { channel, value } => (0xE0, channel, [value as u8, (value >> 7) as u8], 2),
        };
        let mut out = Vec::with_capacity(1 + len);
        out.push(status | (channel & 0x0F));
        out.extend(data[..len].iter().map(|b| b & 0x7F));
        out
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Channels shown 1-based as on hardware labels
        match *self {
            MidiMessage::NoteOn { channel, note, velocity } => write!(f, "note-on {}/{} vel {}", channel + 1, note, velocity),
            MidiMessage::NoteOff { channel, note, .. } => write!(f, "note-off {}/{}", channel + 1, note),
            MidiMessage::ControlChange { channel, cc, value } => write!(f, "cc {}/{} = {}", channel + 1, cc, value),
            MidiMessage::PitchBend { channel, value } => write!(f, "pitch {} = {}", channel + 1, value),
            MidiMessage::ProgramChange { channel, program } => write!(f, "program {} = {}", channel + 1, program),
            MidiMessage::PolyPressure { channel, note, pressure } => {
                write!(f, "aftertouch {}/{} = {}", channel + 1, note, pressure)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "aftertouch {} = {}", channel + 1, pressure)
            }
        }
    }
}

/// Convert a parsed MIDI message into a canonical hardware event
///
/// Aftertouch messages have no canonical form and yield `None`.
pub fn normalize(device_id: &str, message: &MidiMessage, timestamp: u64) -> Option<HardwareEvent> {
    let event = match *message {
        MidiMessage::NoteOn { channel, note, velocity } => {
            HardwareEvent::new(device_id, EventKind::NoteOn, velocity as i64, timestamp)
                .with_channel(channel)
                .with_note(note, velocity)
        }
        MidiMessage::NoteOff { channel, note, velocity } => {
            HardwareEvent::new(device_id, EventKind::NoteOff, 0, timestamp)
                .with_channel(channel)
                .with_note(note, velocity)
        }
        MidiMessage::ControlChange { channel, cc, value } => {
            HardwareEvent::new(device_id, EventKind::Cc, value as i64, timestamp)
                .with_channel(channel)
                .with_controller(cc)
        }
        MidiMessage::ProgramChange { channel, program } => {
            HardwareEvent::new(device_id, EventKind::Program, program as i64, timestamp)
                .with_channel(channel)
        }
        MidiMessage::PitchBend { channel, value } => {
            let mut event = HardwareEvent::new(device_id, EventKind::Pitch, value as i64, timestamp)
                .with_channel(channel);
            event.high_res = true;
            event.value14bit = Some(value);
            event.max_value = Some(MAX_14BIT);
            event.normalized = Some(value as f64 / MAX_14BIT as f64);
            event
        }
        MidiMessage::PolyPressure { .. } | MidiMessage::ChannelPressure { .. } => {
            debug!("Ignoring aftertouch from '{}': {}", device_id, message);
            return None;
        }
    };
    Some(event)
}

/// Find a port whose name contains `pattern` (case-insensitive)
pub fn find_port_by_substring<T: midir::MidiIO>(io: &T, pattern: &str) -> Option<(T::Port, String)> {
    let pattern = pattern.to_lowercase();
    for port in io.ports() {
        if let Ok(name) = io.port_name(&port) {
            if name.to_lowercase().contains(&pattern) {
                debug!("MIDI port '{}' matches '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// Space-separated hex dump for trace logs
pub fn format_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_parsing() {
        let msg = MidiMessage::parse(&[0x90, 11, 127]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::NoteOn {
                channel: 0,
                note: 11,
                velocity: 127,
            }
        );
    }

    #[test]
    fn test_note_on_velocity_zero_is_note_off() {
        let msg = MidiMessage::parse(&[0x91, 60, 0]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::NoteOff {
                channel: 1,
                note: 60,
                velocity: 0,
            }
        );
    }

    #[test]
    fn test_pitch_bend_parsing() {
        // Center position: LSB 0x00, MSB 0x40
        let msg = MidiMessage::parse(&[0xE0, 0x00, 0x40]).unwrap();
        assert_eq!(msg, MidiMessage::PitchBend { channel: 0, value: 8192 });
        assert_eq!(msg.encode(), vec![0xE0, 0x00, 0x40]);
    }

    #[test]
    fn test_truncated_and_system_messages_rejected() {
        assert_eq!(MidiMessage::parse(&[]), None);
        assert_eq!(MidiMessage::parse(&[0xB0, 7]), None);
        assert_eq!(MidiMessage::parse(&[0xF8]), None);
        assert_eq!(MidiMessage::parse(&[0x40, 0x10]), None);
    }

    #[test]
    fn test_normalize_note_on() {
        let msg = MidiMessage::parse(&[0x90, 11, 100]).unwrap();
        let event = normalize("ddj", &msg, 42).unwrap();
        assert_eq!(event.kind, EventKind::NoteOn);
        assert_eq!(event.channel, Some(0));
        assert_eq!(event.note, Some(11));
        assert_eq!(event.velocity, Some(100));
        assert_eq!(event.value, 100);
        assert_eq!(event.timestamp, 42);
        assert!(!event.high_res);
    }

    #[test]
    fn test_normalize_pitch_bend_is_high_res() {
        let msg = MidiMessage::PitchBend {
            channel: 3,
            value: MAX_14BIT,
        };
        let event = normalize("ddj", &msg, 0).unwrap();
        assert_eq!(event.kind, EventKind::Pitch);
        assert!(event.high_res);
        assert_eq!(event.value14bit, Some(MAX_14BIT));
        assert_eq!(event.normalized, Some(1.0));
    }

    #[test]
    fn test_normalize_ignores_aftertouch() {
        let msg = MidiMessage::ChannelPressure {
            channel: 0,
            pressure: 10,
        };
        assert!(normalize("ddj", &msg, 0).is_none());
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x90, 0x0B, 0x7F]), "90 0B 7F");
    }
}
