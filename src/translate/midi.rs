//! MIDI flavor of the translator

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

use super::value::{build_action, build_context, condition_allows, derive_value};
use super::Translator;
use crate::action::{Action, ActionValue};
use crate::event::{EventKind, HardwareEvent};
use crate::mapping::{DeviceMapping, InputPattern, MidiPattern, MidiPatternKind};

pub struct MidiTranslator {
    device_id: String,
    mapping: Arc<DeviceMapping>,
    table: HashMap<MidiPattern, usize>,
    no_modifiers: HashMap<String, bool>,
}

impl MidiTranslator {
    pub fn new(device_id: &str, mapping: Arc<DeviceMapping>) -> Self {
        let mut table = HashMap::new();
        for (index, control) in mapping.mappings.iter().enumerate() {
            if let InputPattern::Midi(pattern) = &control.input {
                if table.insert(*pattern, index).is_some() {
                    warn!(
                        "Mapping '{}' binds {:?} more than once; the last entry wins",
                        mapping.name(),
                        pattern
                    );
                }
            }
        }

        Self {
            device_id: device_id.to_string(),
            mapping,
            table,
            no_modifiers: HashMap::new(),
        }
    }

    fn pattern_for(event: &HardwareEvent) -> Option<MidiPattern> {
        let kind = MidiPatternKind::from_event(event.kind)?;
        let number = match kind {
            MidiPatternKind::NoteOn | MidiPatternKind::NoteOff => event.note?,
            MidiPatternKind::Cc => event.controller?,
            MidiPatternKind::Pitch | MidiPatternKind::Program => 0,
        };
        Some(MidiPattern {
            kind,
            channel: event.channel?,
            number,
        })
    }

    /// Mapping index for an event, and whether it is a release of a note-on
    /// mapping
    fn lookup(&self, event: &HardwareEvent) -> Option<(usize, bool)> {
        let pattern = Self::pattern_for(event)?;
        if let Some(&index) = self.table.get(&pattern) {
            return Some((index, false));
        }

        if pattern.kind == MidiPatternKind::NoteOff {
            let press = MidiPattern {
                kind: MidiPatternKind::NoteOn,
                ..pattern
            };
            if let Some(&index) = self.table.get(&press) {
                if self.mapping.mappings[index].emit_release {
                    return Some((index, true));
                }
                trace!("Release of {:?} suppressed (no emitRelease)", press);
            }
        }
        None
    }
}

impl Translator for MidiTranslator {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn mapping(&self) -> &Arc<DeviceMapping> {
        &self.mapping
    }

    fn translate(&mut self, event: &HardwareEvent) -> Option<Action> {
        let Some((index, release)) = self.lookup(event) else {
            trace!("No mapping for {} on '{}'", event.kind, self.device_id);
            return None;
        };
        let control = &self.mapping.mappings[index];

        let ctx = build_context(event, &self.no_modifiers);
        if !condition_allows(control, &ctx, &self.device_id) {
            return None;
        }

        let value = if release {
            Some(ActionValue::Bool(false))
        } else if event.kind == EventKind::NoteOn
            && control.action.kind == "transport"
            && control.action.value.is_none()
        {
            // Any non-zero velocity means pressed
            Some(ActionValue::Bool(true))
        } else {
            derive_value(control, &ctx, || event_value(event))
        };

        let delta = event.delta.map(|d| d as f64);
        Some(build_action(&self.device_id, control, &ctx, event, value, delta))
    }
}

fn event_value(event: &HardwareEvent) -> Option<ActionValue> {
    if event.high_res {
        if let Some(normalized) = event.normalized {
            return Some(ActionValue::Number(normalized));
        }
    }
    match event.kind {
        EventKind::NoteOn | EventKind::NoteOff => {
            Some(ActionValue::Bool(event.velocity.unwrap_or(0) > 0))
        }
        EventKind::Cc => Some(ActionValue::Number(event.value as f64 / 127.0)),
        _ => Some(ActionValue::Number(event.value as f64)),
    }
}
