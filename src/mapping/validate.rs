//! Raw JSON shape and its validation into [`DeviceMapping`]

use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use super::types::*;
use super::MappingError;
use crate::action::{ActionValue, Priority, Target};
use crate::expr::Expression;
use crate::feedback::ControlClass;
use crate::hid::{ControlDescriptor, DEFAULT_REPORT_LENGTH};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RawMappingFile {
    device: Option<RawDevice>,
    #[serde(default)]
    controls: Vec<ControlDescriptor>,
    output_report: Option<RawOutputReport>,
    #[serde(default)]
    mappings: Vec<RawControlMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDevice {
    name: Option<String>,
    protocol: Option<String>,
    vendor_id: Option<serde_json::Value>,
    product_id: Option<serde_json::Value>,
    #[serde(default)]
    generic: bool,
    poll_interval_ms: Option<u64>,
    report_length: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutputReport {
    #[serde(default)]
    report_id: u8,
    length: usize,
}

#[derive(Debug, Deserialize)]
struct RawMidiPattern {
    #[serde(rename = "type")]
    kind: Option<String>,
    channel: Option<u8>,
    note: Option<u8>,
    controller: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RawHidPattern {
    control: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    #[serde(rename = "type")]
    kind: Option<String>,
    command: Option<String>,
    value: Option<ActionValue>,
    value_expression: Option<String>,
    direction: Option<String>,
    mode: Option<String>,
    deck: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHidOutput {
    report_id: Option<u8>,
    byte: usize,
    bit: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RawFeedback {
    midi: Option<RawMidiPattern>,
    hid: Option<RawHidOutput>,
    #[serde(default)]
    states: HashMap<String, u8>,
    class: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawControlMapping {
    midi: Option<RawMidiPattern>,
    hid: Option<RawHidPattern>,
    action: Option<RawAction>,
    target: Option<String>,
    priority: Option<String>,
    condition: Option<String>,
    #[serde(default)]
    emit_release: bool,
    feedback: Option<RawFeedback>,
}

/// Parse a vendor/product id given as a number or a "0x..." string
fn parse_id(value: &serde_json::Value) -> Option<u16> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        serde_json::Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u16::from_str_radix(hex, 16).ok()
            } else {
                s.parse::<u16>().ok()
            }
        }
        _ => None,
    }
}

/// Per-mapping error builder
struct Ctx<'a> {
    device: &'a str,
    index: usize,
}

impl Ctx<'_> {
    fn missing(&self, field: &'static str) -> MappingError {
        MappingError::MissingField {
            device: self.device.to_string(),
            index: self.index,
            field,
        }
    }

    fn invalid(&self, field: &'static str, value: impl ToString) -> MappingError {
        MappingError::InvalidValue {
            device: self.device.to_string(),
            index: self.index,
            field,
            value: value.to_string(),
        }
    }

    fn expression(&self, field: &'static str, source: Option<String>) -> Result<Option<Expression>, MappingError> {
        source
            .map(|text| {
                Expression::parse(&text).map_err(|source| MappingError::Expression {
                    device: self.device.to_string(),
                    index: self.index,
                    field,
                    source,
                })
            })
            .transpose()
    }
}

pub(super) fn validate(raw: RawMappingFile) -> Result<DeviceMapping, MappingError> {
    let raw_device = raw.device.ok_or(MappingError::MissingDeviceName)?;
    let name = raw_device
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or(MappingError::MissingDeviceName)?;
    let protocol_text = raw_device
        .protocol
        .ok_or_else(|| MappingError::MissingProtocol(name.clone()))?;
    let protocol = Protocol::parse(&protocol_text).ok_or_else(|| MappingError::UnknownProtocol {
        device: name.clone(),
        protocol: protocol_text,
    })?;

    let id_field = |field: &'static str, value: Option<serde_json::Value>| {
        value
            .map(|v| {
                parse_id(&v).ok_or_else(|| MappingError::InvalidDeviceField {
                    device: name.clone(),
                    field,
                    value: v.to_string(),
                })
            })
            .transpose()
    };
    let vendor_id = id_field("vendorId", raw_device.vendor_id)?;
    let product_id = id_field("productId", raw_device.product_id)?;

    let device = DeviceInfo {
        name: name.clone(),
        protocol,
        vendor_id,
        product_id,
        generic: raw_device.generic,
        poll_interval_ms: raw_device.poll_interval_ms,
        report_length: raw_device.report_length,
    };

    let report_length = raw_device.report_length.unwrap_or(DEFAULT_REPORT_LENGTH);
    validate_controls(&name, &raw.controls, report_length)?;
    let known_controls: HashSet<&str> = raw.controls.iter().map(|c| c.name.as_str()).collect();

    let output_report = raw.output_report.map(|r| OutputReport {
        report_id: r.report_id,
        length: r.length,
    });
    let default_report_id = output_report.map(|r| r.report_id).unwrap_or(0);

    let mut mappings = Vec::with_capacity(raw.mappings.len());
    for (index, raw_mapping) in raw.mappings.into_iter().enumerate() {
        let ctx = Ctx {
            device: &name,
            index,
        };

        let input = match protocol {
            Protocol::Midi => {
                let pattern = raw_mapping.midi.ok_or_else(|| ctx.missing("midi"))?;
                InputPattern::Midi(midi_pattern(&ctx, pattern)?)
            }
            Protocol::Hid => {
                let control = raw_mapping
                    .hid
                    .and_then(|h| h.control)
                    .ok_or_else(|| ctx.missing("hid.control"))?;
                if !known_controls.contains(control.as_str()) {
                    return Err(MappingError::UnknownControl {
                        device: name.clone(),
                        index,
                        control,
                    });
                }
                InputPattern::Hid { control }
            }
        };

        let raw_action = raw_mapping.action.ok_or_else(|| ctx.missing("action"))?;
        let kind = raw_action
            .kind
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ctx.missing("action.type"))?;
        let command = raw_action
            .command
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ctx.missing("action.command"))?;
        let action = ActionTemplate {
            kind,
            command,
            value: raw_action.value,
            value_expression: ctx.expression("valueExpression", raw_action.value_expression)?,
            direction: ctx.expression("direction", raw_action.direction)?,
            mode: ctx.expression("mode", raw_action.mode)?,
            deck: raw_action.deck,
        };

        let target_text = raw_mapping.target.ok_or_else(|| ctx.missing("target"))?;
        let target = Target::parse(&target_text).ok_or_else(|| ctx.invalid("target", &target_text))?;
        let priority_text = raw_mapping.priority.ok_or_else(|| ctx.missing("priority"))?;
        let priority =
            Priority::parse(&priority_text).ok_or_else(|| ctx.invalid("priority", &priority_text))?;

        let condition = ctx.expression("condition", raw_mapping.condition)?;
        let feedback = raw_mapping
            .feedback
            .map(|f| feedback_descriptor(&ctx, f, default_report_id))
            .transpose()?;

        mappings.push(ControlMapping {
            input,
            action,
            target,
            priority,
            condition,
            emit_release: raw_mapping.emit_release,
            feedback,
        });
    }

    Ok(DeviceMapping {
        device,
        controls: raw.controls,
        output_report,
        mappings,
    })
}

fn validate_controls(device: &str, controls: &[ControlDescriptor], report_length: usize) -> Result<(), MappingError> {
    let mut seen = HashSet::new();
    for control in controls {
        let fail = |reason: &str| MappingError::InvalidControl {
            device: device.to_string(),
            control: control.name.clone(),
            reason: reason.to_string(),
        };

        if control.name.is_empty() {
            return Err(fail("name is empty"));
        }
        if !seen.insert(control.name.as_str()) {
            return Err(fail("declared twice"));
        }
        if control.bit.is_some_and(|b| b > 7) {
            return Err(fail("bit must be 0-7"));
        }
        if control.bit.is_none() {
            if !(1..=8).contains(&control.size) {
                return Err(fail("size must be 1-8 bytes"));
            }
            if let Some(res) = control.resolution {
                if res == 0 || res as u32 > control.size as u32 * 8 {
                    return Err(fail("resolution must fit in size"));
                }
            }
        }
        let width = if control.bit.is_some() { 1 } else { control.size as usize };
        match control.byte.checked_add(width) {
            Some(end) if end <= report_length => {}
            _ => return Err(fail("field does not fit in the input report")),
        }
        if let (Some(min), Some(max)) = (control.min, control.max) {
            if max <= min {
                return Err(fail("max must be greater than min"));
            }
        }
    }
    Ok(())
}

fn midi_pattern(ctx: &Ctx<'_>, raw: RawMidiPattern) -> Result<MidiPattern, MappingError> {
    let kind_text = raw.kind.ok_or_else(|| ctx.missing("midi.type"))?;
    let kind = MidiPatternKind::parse(&kind_text).ok_or_else(|| ctx.invalid("midi.type", &kind_text))?;
    let channel = raw.channel.ok_or_else(|| ctx.missing("midi.channel"))?;
    if channel > 15 {
        return Err(ctx.invalid("midi.channel", channel));
    }

    let number = match kind {
        MidiPatternKind::NoteOn | MidiPatternKind::NoteOff => {
            raw.note.ok_or_else(|| ctx.missing("midi.note"))?
        }
        MidiPatternKind::Cc => raw.controller.ok_or_else(|| ctx.missing("midi.controller"))?,
        MidiPatternKind::Pitch | MidiPatternKind::Program => 0,
    };
    if number > 127 {
        return Err(ctx.invalid("midi note/controller", number));
    }

    Ok(MidiPattern {
        kind,
        channel,
        number,
    })
}

fn feedback_descriptor(
    ctx: &Ctx<'_>,
    raw: RawFeedback,
    default_report_id: u8,
) -> Result<FeedbackDescriptor, MappingError> {
    let output = match (raw.midi, raw.hid) {
        (Some(midi), _) => {
            let pattern = midi_pattern(ctx, midi)?;
            let kind = match pattern.kind {
                MidiPatternKind::NoteOn | MidiPatternKind::NoteOff => MidiOutputKind::Note,
                MidiPatternKind::Cc => MidiOutputKind::Cc,
                other => return Err(ctx.invalid("feedback.midi.type", format!("{:?}", other))),
            };
            FeedbackTarget::Midi {
                kind,
                channel: pattern.channel,
                number: pattern.number,
            }
        }
        (None, Some(hid)) => {
            if hid.bit.is_some_and(|b| b > 7) {
                return Err(ctx.invalid("feedback.hid.bit", hid.bit.unwrap_or_default()));
            }
            FeedbackTarget::Hid {
                report_id: hid.report_id.unwrap_or(default_report_id),
                byte: hid.byte,
                bit: hid.bit,
            }
        }
        (None, None) => return Err(ctx.missing("feedback.midi|feedback.hid")),
    };

    let class = raw
        .class
        .map(|text| ControlClass::parse(&text).ok_or_else(|| ctx.invalid("feedback.class", &text)))
        .transpose()?;

    Ok(FeedbackDescriptor {
        output,
        states: raw.states,
        class,
    })
}
