//! Configuration management for deckbridge
//!
//! Handles loading, defaulting and validation of the YAML configuration
//! file. Every section is optional; a missing file means all defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::device::DeviceSettings;
use crate::feedback::FeedbackIntervals;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Mapping directory; relative paths resolve against the config file
    pub mappings_dir: Option<PathBuf>,
    pub downstream: DownstreamConfig,
    pub midi: MidiConfig,
    pub hid: HidConfig,
    pub router: RouterConfig,
    pub feedback: FeedbackConfig,
    pub stats_interval_secs: u64,
}

/// Downstream WebSocket peers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownstreamConfig {
    /// Peer receiving every action without a dedicated target peer
    /// (`None` logs actions to the console instead)
    #[serde(default = "default_downstream_url")]
    pub url: Option<String>,
    /// Dedicated peers per target
    #[serde(default)]
    pub targets: TargetUrls,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TargetUrls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<String>,
}

/// MIDI input handling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    #[serde(default = "default_pairing_window")]
    pub pairing_window_ms: u64,
    /// Forward held 14-bit MSBs immediately as 7-bit values
    #[serde(default)]
    pub optimistic_msb: bool,
    /// Port name filters (case-insensitive substrings); empty opens all
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// HID polling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HidConfig {
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: i32,
    #[serde(default = "default_poll_ms")]
    pub default_poll_ms: u64,
    /// Poll interval for devices with jog wheels
    #[serde(default = "default_jog_poll_ms")]
    pub jog_poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Minimum interval between feedback writes per control class
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_led_ms")]
    pub led_ms: u64,
    #[serde(default = "default_vu_ms")]
    pub vu_ms: u64,
    #[serde(default = "default_display_ms")]
    pub display_ms: u64,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load a config file, or fall back to defaults when it does not exist
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            info!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate YAML text
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: AppConfig = if yaml.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(yaml).context("Failed to parse YAML config")?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        let urls = [
            self.downstream.url.as_ref(),
            self.downstream.targets.audio.as_ref(),
            self.downstream.targets.app.as_ref(),
            self.downstream.targets.ui.as_ref(),
        ];
        for url in urls.into_iter().flatten() {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                anyhow::bail!("Downstream URL '{}' must start with ws:// or wss://", url);
            }
        }

        if self.midi.pairing_window_ms == 0 || self.midi.pairing_window_ms > 1000 {
            anyhow::bail!(
                "midi.pairing_window_ms must be between 1 and 1000 (got {})",
                self.midi.pairing_window_ms
            );
        }
        if self.midi.inputs.iter().any(|f| f.trim().is_empty()) {
            anyhow::bail!("midi.inputs entries cannot be empty");
        }

        if self.hid.read_timeout_ms < 0 {
            anyhow::bail!("hid.read_timeout_ms cannot be negative");
        }
        if self.hid.default_poll_ms == 0 || self.hid.jog_poll_ms == 0 {
            anyhow::bail!("HID poll intervals must be at least 1ms");
        }

        if self.router.queue_capacity == 0 {
            anyhow::bail!("router.queue_capacity must be at least 1");
        }
        if self.stats_interval_secs == 0 {
            anyhow::bail!("stats_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Mapping directory resolved against the config file's directory
    pub fn mappings_dir(&self, config_path: &Path) -> PathBuf {
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        match &self.mappings_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base.join("mappings"),
        }
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            pairing_window_ms: self.midi.pairing_window_ms,
            optimistic_msb: self.midi.optimistic_msb,
            midi_inputs: self.midi.inputs.clone(),
            read_timeout_ms: self.hid.read_timeout_ms,
            default_poll_ms: self.hid.default_poll_ms,
            jog_poll_ms: self.hid.jog_poll_ms,
        }
    }

    pub fn feedback_intervals(&self) -> FeedbackIntervals {
        FeedbackIntervals::from_millis(self.feedback.led_ms, self.feedback.vu_ms, self.feedback.display_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mappings_dir: None,
            downstream: DownstreamConfig::default(),
            midi: MidiConfig::default(),
            hid: HidConfig::default(),
            router: RouterConfig::default(),
            feedback: FeedbackConfig::default(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            url: default_downstream_url(),
            targets: TargetUrls::default(),
        }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            pairing_window_ms: default_pairing_window(),
            optimistic_msb: false,
            inputs: Vec::new(),
        }
    }
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout(),
            default_poll_ms: default_poll_ms(),
            jog_poll_ms: default_jog_poll_ms(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            led_ms: default_led_ms(),
            vu_ms: default_vu_ms(),
            display_ms: default_display_ms(),
        }
    }
}

fn default_downstream_url() -> Option<String> { Some("ws://127.0.0.1:8765".to_string()) }
fn default_pairing_window() -> u64 { crate::midi::high_res::DEFAULT_PAIRING_WINDOW_MS }
fn default_read_timeout() -> i32 { 10 }
fn default_poll_ms() -> u64 { 16 }
fn default_jog_poll_ms() -> u64 { 8 }
fn default_queue_capacity() -> usize { crate::router::DEFAULT_QUEUE_CAPACITY }
fn default_led_ms() -> u64 { 20 }
fn default_vu_ms() -> u64 { 16 }
fn default_display_ms() -> u64 { 100 }
fn default_stats_interval() -> u64 { 30 }
