//! Loaded mappings and device-to-mapping resolution

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{load_file, DeviceMapping, Protocol};

/// All successfully loaded mappings
#[derive(Debug, Default)]
pub struct MappingLibrary {
    mappings: Vec<Arc<DeviceMapping>>,
    failures: Vec<(PathBuf, String)>,
}

impl MappingLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file in `dir`
    ///
    /// Files that fail validation are logged and skipped; only an unreadable
    /// directory is an error.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut library = Self::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read mappings directory {}", dir.display()))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")))
            .collect();
        paths.sort();

        for path in paths {
            match load_file(&path) {
                Ok(mapping) => {
                    debug!(
                        "Loaded mapping '{}' ({}, {} controls) from {}",
                        mapping.name(),
                        mapping.protocol(),
                        mapping.mappings.len(),
                        path.display()
                    );
                    library.insert(mapping);
                }
                Err(e) => {
                    error!("Skipping mapping file {}: {}", path.display(), e);
                    library.failures.push((path, e.to_string()));
                }
            }
        }

        info!(
            "📚 Loaded {} mapping(s) from {} ({} rejected)",
            library.mappings.len(),
            dir.display(),
            library.failures.len()
        );
        Ok(library)
    }

    pub fn insert(&mut self, mapping: DeviceMapping) {
        self.mappings.push(Arc::new(mapping));
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DeviceMapping>> {
        self.mappings.iter()
    }

    /// Files rejected by the last `load_dir`, with the reason
    pub fn failures(&self) -> &[(PathBuf, String)] {
        &self.failures
    }

    /// Find the mapping for a device
    ///
    /// Fallback chain: exact name (case-insensitive), then a mapping name
    /// contained in the device name (MIDI ports carry suffixes such as
    /// "DDJ-400 MIDI 1"), then vendor/product id, then the generic mapping
    /// for the protocol.
    pub fn resolve(
        &self,
        device_name: &str,
        vendor_id: Option<u16>,
        product_id: Option<u16>,
        protocol: Protocol,
    ) -> Option<Arc<DeviceMapping>> {
        let candidates = move || self.mappings.iter().filter(move |m| m.protocol() == protocol);
        let lowered = device_name.to_lowercase();

        if let Some(m) = candidates().find(|m| m.name().eq_ignore_ascii_case(device_name)) {
            return Some(m.clone());
        }

        if let Some(m) = candidates()
            .filter(|m| !m.device.generic)
            .find(|m| lowered.contains(&m.name().to_lowercase()))
        {
            return Some(m.clone());
        }

        if let (Some(vid), Some(pid)) = (vendor_id, product_id) {
            if let Some(m) = candidates()
                .find(|m| m.device.vendor_id == Some(vid) && m.device.product_id == Some(pid))
            {
                return Some(m.clone());
            }
        }

        let generic = candidates().find(|m| m.device.generic).cloned();
        if let Some(m) = &generic {
            info!(
                "No specific mapping for '{}', using generic mapping '{}'",
                device_name,
                m.name()
            );
        }
        generic
    }
}
