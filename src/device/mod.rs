//! Hardware discovery and lifecycle
//!
//! The [`DeviceManager`] periodically enumerates MIDI input ports and HID
//! devices, resolves each new one to a mapping, opens it and announces it on
//! the inbound channel. Devices that vanish are closed and announced as
//! disconnected. Devices without a mapping are skipped.

pub mod hid;
pub mod midi;

use anyhow::{Context, Result};
use colored::Colorize;
use hidapi::HidApi;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event::InboundEvent;
use crate::feedback::OutputDescriptor;
use crate::hid::{poll_interval, HidPoller, PollerSettings, DEFAULT_REPORT_LENGTH};
use crate::mapping::{MappingLibrary, Protocol};

/// Writes feedback to one device
pub trait DeviceOutput: Send + Sync {
    fn write(&self, output: &OutputDescriptor) -> Result<()>;
}

/// Hardware-facing knobs from the application config
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub pairing_window_ms: u64,
    pub optimistic_msb: bool,
    /// Only MIDI ports matching one of these substrings are opened (all
    /// ports when empty)
    pub midi_inputs: Vec<String>,
    pub read_timeout_ms: i32,
    pub default_poll_ms: u64,
    pub jog_poll_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            pairing_window_ms: crate::midi::high_res::DEFAULT_PAIRING_WINDOW_MS,
            optimistic_msb: false,
            midi_inputs: Vec::new(),
            read_timeout_ms: 10,
            default_poll_ms: 16,
            jog_poll_ms: 8,
        }
    }
}

struct OpenHid {
    device_id: String,
    stop: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
}

/// Usage pages/usages of desktop keyboards and mice, never opened
fn is_desktop_input(usage_page: u16, usage: u16) -> bool {
    usage_page == 0x01 && matches!(usage, 0x02 | 0x06)
}

fn hid_device_id(product: &str, vendor_id: u16, product_id: u16, interface: i32) -> String {
    format!("{} [{:04x}:{:04x}:{}]", product, vendor_id, product_id, interface)
}

pub struct DeviceManager {
    library: Arc<MappingLibrary>,
    settings: DeviceSettings,
    events: mpsc::Sender<InboundEvent>,
    hid_api: Option<HidApi>,
    midi: HashMap<String, midi::MidiDevice>,
    /// Open HID devices by hidapi path
    hid: HashMap<String, OpenHid>,
    /// Devices already reported as unmapped
    unmapped: HashSet<String>,
}

impl DeviceManager {
    pub fn new(library: Arc<MappingLibrary>, settings: DeviceSettings, events: mpsc::Sender<InboundEvent>) -> Self {
        let hid_api = match HidApi::new() {
            Ok(api) => Some(api),
            Err(e) => {
                warn!("HID support unavailable: {}", e);
                None
            }
        };
        Self {
            library,
            settings,
            events,
            hid_api,
            midi: HashMap::new(),
            hid: HashMap::new(),
            unmapped: HashSet::new(),
        }
    }

    /// Open new devices and close vanished ones
    pub async fn scan(&mut self) {
        if let Err(e) = self.scan_midi().await {
            warn!("MIDI scan failed: {:#}", e);
        }
        if let Err(e) = self.scan_hid().await {
            warn!("HID scan failed: {:#}", e);
        }
    }

    pub fn open_count(&self) -> usize {
        self.midi.len() + self.hid.len()
    }

    async fn scan_midi(&mut self) -> Result<()> {
        let present = midi::input_port_names()?;

        let gone: Vec<String> = self
            .midi
            .keys()
            .filter(|name| !present.contains(name))
            .cloned()
            .collect();
        for name in gone {
            self.midi.remove(&name);
            info!("🔌 MIDI device removed: '{}'", name);
            self.announce(InboundEvent::Disconnected {
                device_id: name,
                reason: "port removed".to_string(),
            })
            .await;
        }

        for name in present {
            if self.midi.contains_key(&name) || self.unmapped.contains(&name) {
                continue;
            }
            let lowered = name.to_lowercase();
            if !self.settings.midi_inputs.is_empty()
                && !self
                    .settings
                    .midi_inputs
                    .iter()
                    .any(|f| lowered.contains(&f.to_lowercase()))
            {
                continue;
            }

            let Some(mapping) = self.library.resolve(&name, None, None, Protocol::Midi) else {
                info!("No mapping for MIDI port '{}', skipping", name);
                self.unmapped.insert(name);
                continue;
            };

            match midi::open(&name, &self.settings, self.events.clone()) {
                Ok(device) => {
                    let output = device.output.clone().map(|o| o as Arc<dyn DeviceOutput>);
                    self.midi.insert(name.clone(), device);
                    self.announce(InboundEvent::Connected {
                        device_id: name,
                        mapping,
                        output,
                    })
                    .await;
                }
                Err(e) => warn!("Failed to open MIDI port '{}': {:#}", name, e),
            }
        }
        Ok(())
    }

    async fn scan_hid(&mut self) -> Result<()> {
        // Poll threads that died already reported themselves disconnected
        self.hid.retain(|_, open| !open.thread.is_finished());

        let Some(api) = self.hid_api.as_mut() else {
            return Ok(());
        };
        api.refresh_devices().context("Failed to enumerate HID devices")?;

        let mut present = HashSet::new();
        let mut to_open = Vec::new();
        for info in api.device_list() {
            let path = info.path().to_string_lossy().into_owned();
            present.insert(path.clone());
            if self.hid.contains_key(&path) || is_desktop_input(info.usage_page(), info.usage()) {
                continue;
            }
            let product = info.product_string().unwrap_or("HID device").to_string();
            let device_id = hid_device_id(&product, info.vendor_id(), info.product_id(), info.interface_number());
            if self.unmapped.contains(&device_id) {
                continue;
            }
            match self.library.resolve(&product, Some(info.vendor_id()), Some(info.product_id()), Protocol::Hid) {
                Some(mapping) => to_open.push((path, device_id, mapping)),
                None => {
                    debug!("No mapping for HID device '{}'", device_id);
                    self.unmapped.insert(device_id);
                }
            }
        }

        let gone: Vec<String> = self.hid.keys().filter(|p| !present.contains(*p)).cloned().collect();
        for path in gone {
            if let Some(open) = self.hid.remove(&path) {
                open.stop.store(true, Ordering::Relaxed);
                info!("🔌 HID device removed: '{}'", open.device_id);
                self.announce(InboundEvent::Disconnected {
                    device_id: open.device_id,
                    reason: "device removed".to_string(),
                })
                .await;
            }
        }

        for (path, device_id, mapping) in to_open {
            let Some(api) = self.hid_api.as_ref() else {
                break;
            };
            let device = match hid::open_path(api, &path) {
                Ok(device) => device,
                Err(e) => {
                    warn!("{:#}", e);
                    continue;
                }
            };

            let settings = PollerSettings {
                interval: poll_interval(
                    mapping.device.poll_interval_ms,
                    &mapping.controls,
                    self.settings.default_poll_ms,
                    self.settings.jog_poll_ms,
                ),
                read_timeout_ms: self.settings.read_timeout_ms,
                report_length: mapping.device.report_length.unwrap_or(DEFAULT_REPORT_LENGTH),
            };
            let stop = Arc::new(AtomicBool::new(false));
            let (writer, outgoing) = hid::HidOutputWriter::new(device_id.as_str(), mapping.output_report);
            let output: Arc<dyn DeviceOutput> = Arc::new(writer);

            // Announce before the first report can arrive
            self.announce(InboundEvent::Connected {
                device_id: device_id.clone(),
                mapping: mapping.clone(),
                output: Some(output),
            })
            .await;

            let poller = HidPoller::new(
                device_id.as_str(),
                device,
                mapping.controls.clone(),
                settings,
                self.events.clone(),
                stop.clone(),
            )
            .with_output(outgoing);
            match poller.spawn() {
                Ok(thread) => {
                    info!("🎛️ HID device opened: '{}' → mapping '{}'", device_id, mapping.name());
                    self.hid.insert(path, OpenHid { device_id, stop, thread });
                }
                Err(e) => {
                    warn!("Failed to start poll thread for '{}': {}", device_id, e);
                    self.announce(InboundEvent::Disconnected {
                        device_id,
                        reason: e.to_string(),
                    })
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn announce(&self, event: InboundEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Inbound channel closed");
        }
    }

    /// Close every device
    pub fn close_all(&mut self) {
        for (_, open) in self.hid.drain() {
            open.stop.store(true, Ordering::Relaxed);
        }
        self.midi.clear();
        info!("All devices closed");
    }
}

/// One row of `--list-devices`
#[derive(Debug, Clone)]
pub struct DeviceListing {
    pub protocol: Protocol,
    pub name: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub mapping: Option<String>,
}

/// Enumerate attached hardware and the mapping each would use
pub fn list_devices(library: &MappingLibrary) -> Result<Vec<DeviceListing>> {
    let mut rows = Vec::new();

    for name in midi::input_port_names()? {
        let mapping = library
            .resolve(&name, None, None, Protocol::Midi)
            .map(|m| m.name().to_string());
        rows.push(DeviceListing {
            protocol: Protocol::Midi,
            name,
            vendor_id: None,
            product_id: None,
            mapping,
        });
    }

    match HidApi::new() {
        Ok(api) => {
            for info in api.device_list() {
                if is_desktop_input(info.usage_page(), info.usage()) {
                    continue;
                }
                let name = info.product_string().unwrap_or("HID device").to_string();
                let mapping = library
                    .resolve(&name, Some(info.vendor_id()), Some(info.product_id()), Protocol::Hid)
                    .map(|m| m.name().to_string());
                rows.push(DeviceListing {
                    protocol: Protocol::Hid,
                    name,
                    vendor_id: Some(info.vendor_id()),
                    product_id: Some(info.product_id()),
                    mapping,
                });
            }
        }
        Err(e) => warn!("HID enumeration unavailable: {}", e),
    }

    Ok(rows)
}

/// Print a device listing to stdout
pub fn print_listing(rows: &[DeviceListing]) {
    if rows.is_empty() {
        println!("{}", "No devices found".yellow());
        return;
    }
    for row in rows {
        let ids = match (row.vendor_id, row.product_id) {
            (Some(vid), Some(pid)) => format!(" ({:04X}:{:04X})", vid, pid),
            _ => String::new(),
        };
        let mapping = match &row.mapping {
            Some(name) => format!("→ {}", name).green(),
            None => "→ (no mapping)".dimmed(),
        };
        println!("  [{}] {}{} {}", row.protocol.to_string().cyan(), row.name.bold(), ids, mapping);
    }
}

/// Interval between device scans
pub const SCAN_INTERVAL: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_input_filter() {
        assert!(is_desktop_input(0x01, 0x06));
        assert!(is_desktop_input(0x01, 0x02));
        assert!(!is_desktop_input(0x01, 0x05));
        assert!(!is_desktop_input(0xFF00, 0x01));
    }

    #[test]
    fn test_hid_device_id_distinguishes_interfaces() {
        let a = hid_device_id("Mixtrack", 0x15e4, 0x0024, 0);
        let b = hid_device_id("Mixtrack", 0x15e4, 0x0024, 1);
        assert_eq!(a, "Mixtrack [15e4:0024:0]");
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_settings() {
        let settings = DeviceSettings::default();
        assert_eq!(settings.pairing_window_ms, 50);
        assert!(!settings.optimistic_msb);
        assert_eq!(settings.read_timeout_ms, 10);
    }
}
