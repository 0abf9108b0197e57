//! HID flavor of the translator
//!
//! Adds modifier tracking, conditional mappings and release suppression on
//! top of the shared value derivation.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use super::value::{build_action, build_context, condition_allows, derive_value};
use super::Translator;
use crate::action::{Action, ActionValue};
use crate::event::HardwareEvent;
use crate::hid::ControlKind;
use crate::mapping::{DeviceMapping, InputPattern};

pub struct HidTranslator {
    device_id: String,
    mapping: Arc<DeviceMapping>,
    /// Control name to mapping indices, in file order
    table: HashMap<String, Vec<usize>>,
    /// Held state of every `modifier` control
    modifiers: HashMap<String, bool>,
}

impl HidTranslator {
    pub fn new(device_id: &str, mapping: Arc<DeviceMapping>) -> Self {
        let mut table: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, control) in mapping.mappings.iter().enumerate() {
            if let InputPattern::Hid { control } = &control.input {
                table.entry(control.clone()).or_default().push(index);
            }
        }

        let modifiers = mapping
            .controls
            .iter()
            .filter(|c| c.kind == ControlKind::Modifier)
            .map(|c| (c.name.clone(), false))
            .collect();

        Self {
            device_id: device_id.to_string(),
            mapping,
            table,
            modifiers,
        }
    }

    pub fn modifier_held(&self, name: &str) -> bool {
        self.modifiers.get(name).copied().unwrap_or(false)
    }
}

impl Translator for HidTranslator {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn mapping(&self) -> &Arc<DeviceMapping> {
        &self.mapping
    }

    fn translate(&mut self, event: &HardwareEvent) -> Option<Action> {
        let name = event.control.as_deref()?;
        let descriptor = self.mapping.control(name)?;
        let kind = descriptor.kind;

        if kind == ControlKind::Modifier {
            self.modifiers.insert(name.to_string(), event.value != 0);
            trace!("Modifier '{}' on '{}' = {}", name, self.device_id, event.value != 0);
        }

        let candidates = self.table.get(name)?;
        let ctx = build_context(event, &self.modifiers);

        // First mapping whose condition holds claims the event
        let control = candidates
            .iter()
            .map(|&i| &self.mapping.mappings[i])
            .find(|m| condition_allows(m, &ctx, &self.device_id));
        let Some(control) = control else {
            trace!("No mapping condition matched for '{}'", name);
            return None;
        };

        let is_button = matches!(kind, ControlKind::Button | ControlKind::Modifier);
        if is_button && event.value == 0 && !control.emit_release {
            return None;
        }

        let delta = match kind {
            ControlKind::Delta | ControlKind::Encoder => event.delta,
            _ => None,
        };
        if kind == ControlKind::Delta && delta == Some(0) {
            return None;
        }

        let value = derive_value(control, &ctx, || {
            Some(match kind {
                ControlKind::Button | ControlKind::Modifier => ActionValue::Bool(event.value != 0),
                ControlKind::Absolute | ControlKind::Encoder => {
                    ActionValue::Number(descriptor.normalize(event.value))
                }
                ControlKind::Delta => ActionValue::Number(event.value as f64),
            })
        });

        Some(build_action(
            &self.device_id,
            control,
            &ctx,
            event,
            value,
            delta.map(|d| d as f64),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Priority;
    use crate::event::EventKind;
    use crate::mapping::parse_mapping;

    const MAPPING: &str = r#"{
        "device": {"name": "Mixtrack Pro", "protocol": "hid"},
        "controls": [
            {"name": "play", "type": "button", "byte": 1, "bit": 0},
            {"name": "cue", "type": "button", "byte": 1, "bit": 1},
            {"name": "shift", "type": "modifier", "byte": 1, "bit": 7},
            {"name": "jog", "type": "delta", "byte": 2, "signed": true},
            {"name": "volume", "type": "absolute", "byte": 3, "size": 2, "resolution": 10},
            {"name": "unmapped", "type": "button", "byte": 5, "bit": 0}
        ],
        "mappings": [
            {
                "hid": {"control": "play"}, "condition": "!shift",
                "action": {"type": "transport", "command": "play", "deck": "A"},
                "target": "audio", "priority": "high"
            },
            {
                "hid": {"control": "play"}, "condition": "shift",
                "action": {"type": "transport", "command": "reverse", "deck": "A"},
                "target": "audio", "priority": "high"
            },
            {
                "hid": {"control": "cue"},
                "action": {"type": "transport", "command": "cue", "deck": "A"},
                "target": "audio", "priority": "high", "emitRelease": true
            },
            {
                "hid": {"control": "jog"},
                "action": {"type": "jog", "command": "nudge", "deck": "A", "direction": "delta > 0 ? 'forward' : 'back'"},
                "target": "audio", "priority": "critical"
            },
            {
                "hid": {"control": "volume"},
                "action": {"type": "mixer", "command": "volume", "deck": "A"},
                "target": "audio", "priority": "normal"
            }
        ]
    }"#;

    fn translator() -> HidTranslator {
        let mapping = parse_mapping(MAPPING, "test").unwrap();
        HidTranslator::new("mixtrack", Arc::new(mapping))
    }

    fn event(control: &str, kind: EventKind, value: i64) -> HardwareEvent {
        HardwareEvent::new("mixtrack", kind, value, 5)
            .with_control(control)
            .with_delta(value)
    }

    #[test]
    fn test_button_press_emits_release_suppressed() {
        let mut translator = translator();
        let press = translator.translate(&event("play", EventKind::Button, 1)).unwrap();
        assert_eq!(press.command, "play");
        assert_eq!(press.value, Some(ActionValue::Bool(true)));

        assert!(translator.translate(&event("play", EventKind::Button, 0)).is_none());
    }

    #[test]
    fn test_emit_release_opt_in() {
        let mut translator = translator();
        let release = translator.translate(&event("cue", EventKind::Button, 0)).unwrap();
        assert_eq!(release.value, Some(ActionValue::Bool(false)));
    }

    #[test]
    fn test_modifier_selects_conditional_mapping() {
        let mut translator = translator();

        // Modifier alone produces no action
        assert!(translator.translate(&event("shift", EventKind::Modifier, 1)).is_none());
        assert!(translator.modifier_held("shift"));

        let shifted = translator.translate(&event("play", EventKind::Button, 1)).unwrap();
        assert_eq!(shifted.command, "reverse");

        translator.translate(&event("shift", EventKind::Modifier, 0));
        assert!(!translator.modifier_held("shift"));
        let plain = translator.translate(&event("play", EventKind::Button, 1)).unwrap();
        assert_eq!(plain.command, "play");
    }

    #[test]
    fn test_jog_delta() {
        let mut translator = translator();
        let mut jog = event("jog", EventKind::Delta, -3);
        jog.absolute_position = Some(-3);

        let action = translator.translate(&jog).unwrap();
        assert_eq!(action.priority, Priority::Critical);
        assert_eq!(action.delta, Some(-3.0));
        assert_eq!(action.value, Some(ActionValue::Number(-3.0)));
        assert_eq!(action.direction.as_deref(), Some("back"));

        // Wheel at rest
        assert!(translator.translate(&event("jog", EventKind::Delta, 0)).is_none());
    }

    #[test]
    fn test_absolute_normalized_by_resolution() {
        let mut translator = translator();
        let action = translator.translate(&event("volume", EventKind::Absolute, 1023)).unwrap();
        assert_eq!(action.value, Some(ActionValue::Number(1.0)));
        assert_eq!(action.delta, None);

        let action = translator.translate(&event("volume", EventKind::Absolute, 0)).unwrap();
        assert_eq!(action.value, Some(ActionValue::Number(0.0)));
    }

    #[test]
    fn test_unknown_or_unmapped_controls() {
        let mut translator = translator();
        assert!(translator.translate(&event("unmapped", EventKind::Button, 1)).is_none());
        assert!(translator.translate(&event("ghost", EventKind::Button, 1)).is_none());
    }
}
