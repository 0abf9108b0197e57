//! HID input: report parsing, state diffing and the per-device poll loop
//!
//! HID controllers are level-triggered: every report carries the full state
//! of every control. [`report::parse_report`] extracts named control values,
//! [`differ::StateDiffer`] turns consecutive states into edge events, and
//! [`poller::HidPoller`] runs both on a dedicated thread per device.

pub mod differ;
pub mod poller;
pub mod report;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::event::EventKind;

/// Input report length read when a mapping does not declare one
pub const DEFAULT_REPORT_LENGTH: usize = 64;

pub use differ::{ControlDelta, StateDiffer};
pub use poller::{HidPoller, PollerSettings, ReportSource};
pub use report::{parse_report, ControlState};

/// Semantic type of a HID control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Button,
    Modifier,
    Absolute,
    /// Relative control whose raw value is a signed tick count (jog wheels)
    Delta,
    Encoder,
}

impl ControlKind {
    pub fn event_kind(&self) -> EventKind {
        match self {
            ControlKind::Button => EventKind::Button,
            ControlKind::Modifier => EventKind::Modifier,
            ControlKind::Absolute => EventKind::Absolute,
            ControlKind::Delta => EventKind::Delta,
            ControlKind::Encoder => EventKind::Encoder,
        }
    }

    /// Controls that need the fast poll cadence
    pub fn is_relative(&self) -> bool {
        matches!(self, ControlKind::Delta | ControlKind::Encoder)
    }
}

fn default_size() -> u8 {
    1
}

/// Where and how to read one control out of an input report
///
/// A descriptor with `bit` set is a single-bit field; otherwise it is a
/// little-endian field of `size` bytes starting at `byte`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ControlKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<u8>,
    pub byte: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit: Option<u8>,
    #[serde(default = "default_size")]
    pub size: u8,
    #[serde(default)]
    pub signed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl ControlDescriptor {
    /// Significant bits of the field
    pub fn resolution(&self) -> u32 {
        match self.bit {
            Some(_) => 1,
            None => self.resolution.map(u32::from).unwrap_or(self.size as u32 * 8),
        }
    }

    /// Value range used to normalize absolute controls
    pub fn range(&self) -> (i64, i64) {
        let bits = self.resolution().min(62);
        let (lo, hi) = if self.signed && bits > 0 {
            let half = 1i64 << (bits - 1);
            (-half, half - 1)
        } else {
            (0, (1i64 << bits) - 1)
        };
        (self.min.unwrap_or(lo), self.max.unwrap_or(hi))
    }

    /// Scale a raw value into 0..=1 using [`Self::range`]
    pub fn normalize(&self, raw: i64) -> f64 {
        let (min, max) = self.range();
        if max <= min {
            return 0.0;
        }
        ((raw - min) as f64 / (max - min) as f64).clamp(0.0, 1.0)
    }

    /// Extract this control's value, or `None` if the report is too short
    pub fn extract(&self, report: &[u8]) -> Option<i64> {
        if let Some(bit) = self.bit {
            let byte = report.get(self.byte)?;
            return Some(((byte >> (bit & 7)) & 1) as i64);
        }

        let end = self.byte.checked_add(self.size as usize)?;
        let bytes = report.get(self.byte..end)?;
        let raw = bytes
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, b)| acc | ((*b as u64) << (8 * i)));

        let bits = self.resolution().min(63);
        let raw = (raw & ((1u64 << bits) - 1)) as i64;
        if self.signed && bits > 0 && raw >= 1i64 << (bits - 1) {
            Some(raw - (1i64 << bits))
        } else {
            Some(raw)
        }
    }
}

/// Poll cadence for a device
///
/// An explicit interval from the mapping wins; otherwise devices with
/// relative (jog) controls use the fast cadence.
pub fn poll_interval(
    configured_ms: Option<u64>,
    controls: &[ControlDescriptor],
    default_ms: u64,
    jog_ms: u64,
) -> Duration {
    let ms = configured_ms.unwrap_or_else(|| {
        if controls.iter().any(|c| c.kind.is_relative()) {
            jog_ms
        } else {
            default_ms
        }
    });
    Duration::from_millis(ms.max(1))
}
