//! Edge detection over polled HID state

use std::collections::HashMap;

use super::{ControlDescriptor, ControlKind, ControlState};

/// One control whose value changed since the previous poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDelta {
    pub control: String,
    pub kind: ControlKind,
    pub value: i64,
    pub previous: Option<i64>,
    /// Relative ticks for delta controls, `value - previous` otherwise
    pub delta: i64,
    /// Accumulated position, delta controls only
    pub absolute_position: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ControlMemory {
    last_value: i64,
    absolute_position: i64,
}

/// Per-device previous-state table
///
/// Controls omitted from a partial report keep their last known value, so
/// a short read never looks like a change once the full report returns.
#[derive(Debug, Default)]
pub struct StateDiffer {
    kinds: HashMap<String, ControlKind>,
    previous: HashMap<String, ControlMemory>,
}

impl StateDiffer {
    pub fn new(controls: &[ControlDescriptor]) -> Self {
        Self {
            kinds: controls.iter().map(|c| (c.name.clone(), c.kind)).collect(),
            previous: HashMap::new(),
        }
    }

    /// Compare `current` with the previous poll and remember it
    pub fn diff(&mut self, current: &ControlState) -> Vec<ControlDelta> {
        let mut deltas = Vec::new();

        for (name, &value) in current {
            let kind = self.kinds.get(name).copied().unwrap_or(ControlKind::Absolute);
            let memory = self.previous.get(name).copied();
            let previous = memory.map(|m| m.last_value);

            if previous == Some(value) {
                continue;
            }

            let mut next = memory.unwrap_or_default();
            next.last_value = value;

            let (delta, absolute_position) = if kind == ControlKind::Delta {
                next.absolute_position += value;
                (value, Some(next.absolute_position))
            } else {
                (value - previous.unwrap_or(0), None)
            };

            self.previous.insert(name.clone(), next);
            deltas.push(ControlDelta {
                control: name.clone(),
                kind,
                value,
                previous,
                delta,
                absolute_position,
            });
        }

        deltas
    }

    /// Forget all previous state; the next poll emits every control
    pub fn reset(&mut self) {
        self.previous.clear();
    }
}
