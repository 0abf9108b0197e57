//! Semantic actions sent to downstream services
//!
//! An [`Action`] is the device-independent output of translation. Its serde
//! representation is the JSON wire shape expected by the downstream peers.

use serde::{Deserialize, Serialize};

/// Downstream destination tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Audio,
    App,
    Ui,
}

impl Target {
    pub fn all() -> &'static [Target] {
        &[Target::Audio, Target::App, Target::Ui]
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "audio" => Some(Target::Audio),
            "app" => Some(Target::App),
            "ui" => Some(Target::Ui),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Audio => "audio",
            Target::App => "app",
            Target::Ui => "ui",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router service class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Sent immediately on the calling path, never queued
    Critical,
    High,
    Normal,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "normal" => Some(Priority::Normal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value carried by an action (boolean press state, number, or text)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl std::fmt::Display for ActionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionValue::Bool(b) => write!(f, "{}", b),
            ActionValue::Number(n) => write!(f, "{:.3}", n),
            ActionValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for ActionValue {
    fn from(value: bool) -> Self {
        ActionValue::Bool(value)
    }
}

impl From<f64> for ActionValue {
    fn from(value: f64) -> Self {
        ActionValue::Number(value)
    }
}

/// Canonical output unit of the translators
///
/// Actions are immutable once built; the router only forwards or drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
    pub target: Target,
    pub priority: Priority,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deck: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ActionValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Name of the originating device
    pub from: String,
}

impl Action {
    /// Serialize to the downstream JSON wire format
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Short human-readable label for logs
    pub fn label(&self) -> String {
        match &self.deck {
            Some(deck) => format!("{}.{}[{}]", self.kind, self.command, deck),
            None => format!("{}.{}", self.kind, self.command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Action {
        Action {
            kind: "transport".to_string(),
            command: "play".to_string(),
            target: Target::Audio,
            priority: Priority::High,
            timestamp: 1_700_000_000_000,
            deck: Some("A".to_string()),
            value: Some(ActionValue::Bool(true)),
            delta: None,
            direction: None,
            mode: None,
            from: "DDJ-400".to_string(),
        }
    }

    #[test]
    fn test_wire_shape() {
        let value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "transport",
                "command": "play",
                "target": "audio",
                "priority": "high",
                "timestamp": 1_700_000_000_000u64,
                "deck": "A",
                "value": true,
                "from": "DDJ-400"
            })
        );
    }

    #[test]
    fn test_numeric_value_and_delta_serialize() {
        let mut action = sample();
        action.kind = "jog".to_string();
        action.command = "scratch".to_string();
        action.value = Some(ActionValue::Number(0.5));
        action.delta = Some(-3.0);
        action.direction = Some("down".to_string());

        let value: serde_json::Value = serde_json::from_str(&action.to_json().unwrap()).unwrap();
        assert_eq!(value["value"], json!(0.5));
        assert_eq!(value["delta"], json!(-3.0));
        assert_eq!(value["direction"], json!("down"));
        assert!(value.get("mode").is_none());
    }

    #[test]
    fn test_enum_parsing_is_case_insensitive() {
        assert_eq!(Target::parse("AUDIO"), Some(Target::Audio));
        assert_eq!(Priority::parse("Critical"), Some(Priority::Critical));
        assert_eq!(Priority::parse("urgent"), None);
    }

    #[test]
    fn test_label() {
        assert_eq!(sample().label(), "transport.play[A]");
    }
}
