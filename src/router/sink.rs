//! Action delivery endpoints

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::action::{Action, Target};

/// Destination for routed actions
///
/// Implementations must not block: a sink that cannot deliver right now
/// returns `false` and the router counts the failure.
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Sink name used in logs (e.g. "console", "ws://localhost:8765")
    fn name(&self) -> &str;

    /// Deliver one action
    ///
    /// # Arguments
    /// * `action` - The action to deliver
    ///
    /// Returns whether the action was accepted for delivery.
    async fn send(&self, action: &Action) -> bool;
}

/// Per-target sinks with a shared fallback
#[derive(Clone)]
pub struct TargetSinks {
    default: Arc<dyn ActionSink>,
    by_target: HashMap<Target, Arc<dyn ActionSink>>,
}

impl TargetSinks {
    pub fn new(default: Arc<dyn ActionSink>) -> Self {
        Self {
            default,
            by_target: HashMap::new(),
        }
    }

    /// Route one target to a dedicated sink
    pub fn with_target(mut self, target: Target, sink: Arc<dyn ActionSink>) -> Self {
        self.by_target.insert(target, sink);
        self
    }

    pub fn sink_for(&self, target: Target) -> &Arc<dyn ActionSink> {
        self.by_target.get(&target).unwrap_or(&self.default)
    }

    /// Log which sink serves each target
    pub fn log_layout(&self) {
        for target in Target::all() {
            info!("📤 {} actions → {}", target, self.sink_for(*target).name());
        }
    }
}

/// Sink that logs every action, for running without a downstream peer
pub struct ConsoleSink {
    name: String,
    delivered: AtomicU64,
}

impl ConsoleSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ActionSink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, action: &Action) -> bool {
        let count = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;

        let value = action
            .value
            .as_ref()
            .map(|v| format!(" = {}", v))
            .unwrap_or_default();

        info!(
            "🎮 [{}] {} → {}{} ({}, from {}) [#{}]",
            self.name, action.target, action.label(), value, action.priority, action.from, count
        );
        debug!(
            sink = self.name,
            action = ?action,
            delivered = count,
            "ConsoleSink delivery"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionValue, Priority};

    fn action(target: Target) -> Action {
        Action {
            kind: "transport".to_string(),
            command: "play".to_string(),
            target,
            priority: Priority::High,
            timestamp: 1,
            deck: Some("A".to_string()),
            value: Some(ActionValue::Bool(true)),
            delta: None,
            direction: None,
            mode: None,
            from: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_console_sink_counts_deliveries() {
        let sink = ConsoleSink::new("console");
        assert_eq!(sink.name(), "console");

        for _ in 0..3 {
            assert!(sink.send(&action(Target::Audio)).await);
        }
        assert_eq!(sink.delivered(), 3);
    }

    #[tokio::test]
    async fn test_target_sinks_fallback() {
        let default: Arc<dyn ActionSink> = Arc::new(ConsoleSink::new("default"));
        let ui: Arc<dyn ActionSink> = Arc::new(ConsoleSink::new("ui"));
        let sinks = TargetSinks::new(default).with_target(Target::Ui, ui);

        assert_eq!(sinks.sink_for(Target::Ui).name(), "ui");
        assert_eq!(sinks.sink_for(Target::Audio).name(), "default");
        assert_eq!(sinks.sink_for(Target::App).name(), "default");
    }
}
