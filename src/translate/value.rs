//! Shared pieces of both translators: expression context, value
//! derivation, action assembly and reverse feedback lookup.

use std::collections::HashMap;

use crate::action::{Action, ActionValue};
use crate::event::HardwareEvent;
use crate::expr::{evaluate_or, raw_value_fallback, Context, Expression, Value};
use crate::feedback::{ControlClass, FeedbackUpdate, OutputDescriptor};
use crate::mapping::{ControlMapping, FeedbackTarget};

/// Variables visible to mapping expressions
pub(super) fn build_context(event: &HardwareEvent, modifiers: &HashMap<String, bool>) -> Context {
    let mut ctx = Context::new();
    ctx.insert("value".into(), Value::from(event.value));
    ctx.insert(
        "velocity".into(),
        Value::from(event.velocity.map(i64::from).unwrap_or(event.value)),
    );
    ctx.insert("delta".into(), Value::from(event.delta.unwrap_or(0)));
    ctx.insert("normalized".into(), Value::from(event.normalized.unwrap_or(0.0)));
    if let Some(msb) = event.msb {
        ctx.insert("msb".into(), Value::from(msb as i64));
    }
    if let Some(lsb) = event.lsb {
        ctx.insert("lsb".into(), Value::from(lsb as i64));
    }
    if let Some(position) = event.absolute_position {
        ctx.insert("position".into(), Value::from(position));
    }
    for (name, &held) in modifiers {
        ctx.insert(name.clone(), Value::Bool(held));
    }
    ctx
}

fn to_action_value(value: Value) -> ActionValue {
    match value {
        Value::Number(n) => ActionValue::Number(n),
        Value::Bool(b) => ActionValue::Bool(b),
        Value::Str(s) => ActionValue::Text(s),
    }
}

/// Static value, then `valueExpression`, then the event-derived value
pub(super) fn derive_value(
    mapping: &ControlMapping,
    ctx: &Context,
    from_event: impl FnOnce() -> Option<ActionValue>,
) -> Option<ActionValue> {
    if let Some(value) = &mapping.action.value {
        return Some(value.clone());
    }
    if let Some(expr) = &mapping.action.value_expression {
        return Some(to_action_value(evaluate_or(expr, ctx, raw_value_fallback(ctx))));
    }
    from_event()
}

/// Evaluate a direction/mode expression to text
///
/// A bare identifier that is not a context variable is taken literally, so
/// `"direction": "up"` works without quoting.
fn eval_text(expr: &Expression, ctx: &Context) -> String {
    if let Some(name) = expr.as_variable() {
        if !ctx.contains_key(name) {
            return name.to_string();
        }
    }
    evaluate_or(expr, ctx, Value::Str(expr.source().to_string())).to_string()
}

/// Whether a mapping's condition allows it for this context
pub(super) fn condition_allows(mapping: &ControlMapping, ctx: &Context, device_id: &str) -> bool {
    match &mapping.condition {
        None => true,
        Some(condition) => match condition.eval(ctx) {
            Ok(value) => value.truthy(),
            Err(e) => {
                tracing::warn!(
                    "Condition '{}' on '{}' failed: {}",
                    condition.source(),
                    device_id,
                    e
                );
                false
            }
        },
    }
}

pub(super) fn build_action(
    device_id: &str,
    mapping: &ControlMapping,
    ctx: &Context,
    event: &HardwareEvent,
    value: Option<ActionValue>,
    delta: Option<f64>,
) -> Action {
    let template = &mapping.action;
    Action {
        kind: template.kind.clone(),
        command: template.command.clone(),
        target: mapping.target,
        priority: mapping.priority,
        timestamp: event.timestamp,
        deck: template.deck.clone(),
        value,
        delta,
        direction: template.direction.as_ref().map(|e| eval_text(e, ctx)),
        mode: template.mode.as_ref().map(|e| eval_text(e, ctx)),
        from: device_id.to_string(),
    }
}

/// Reverse lookup from a feedback update to device outputs
pub(super) fn feedback_outputs(
    mappings: &[ControlMapping],
    update: &FeedbackUpdate,
) -> Vec<(OutputDescriptor, ControlClass)> {
    let mut outputs: Vec<(OutputDescriptor, ControlClass)> = Vec::new();
    let state_name = update.state.state_name();

    for mapping in mappings {
        let Some(feedback) = &mapping.feedback else {
            continue;
        };
        let template = &mapping.action;
        if template.kind != update.key.kind || template.command != update.key.command {
            continue;
        }
        if template.deck.is_some() && template.deck != update.key.deck {
            continue;
        }

        let value = feedback
            .states
            .get(&state_name)
            .copied()
            .unwrap_or_else(|| update.state.default_output());

        let output = match feedback.output {
            FeedbackTarget::Midi {
                kind,
                channel,
                number,
            } => OutputDescriptor::Midi {
                kind,
                channel,
                number,
                value,
            },
            FeedbackTarget::Hid {
                report_id,
                byte,
                bit,
            } => OutputDescriptor::Hid {
                report_id,
                byte,
                bit,
                value,
            },
        };

        if !outputs.iter().any(|(existing, _)| *existing == output) {
            outputs.push((output, feedback.class.unwrap_or(update.class)));
        }
    }

    outputs
}
