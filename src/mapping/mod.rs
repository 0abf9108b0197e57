//! Device mapping files
//!
//! A mapping file is a JSON document describing one controller: how to
//! recognise it, how to parse its HID reports, and which semantic action each
//! control produces. Files are fully validated on load; a malformed file is
//! rejected as a whole and never partially applied.

pub mod library;
pub mod types;
mod validate;

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::expr::ExprError;

pub use library::MappingLibrary;
pub use types::*;

/// Why a mapping file failed to load
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("device name is missing")]
    MissingDeviceName,

    #[error("device '{0}' has no protocol")]
    MissingProtocol(String),

    #[error("device '{device}' has unknown protocol '{protocol}'")]
    UnknownProtocol { device: String, protocol: String },

    #[error("device '{device}': invalid {field} '{value}'")]
    InvalidDeviceField {
        device: String,
        field: &'static str,
        value: String,
    },

    #[error("control '{control}' of '{device}': {reason}")]
    InvalidControl {
        device: String,
        control: String,
        reason: String,
    },

    #[error("mapping #{index} of '{device}' is missing '{field}'")]
    MissingField {
        device: String,
        index: usize,
        field: &'static str,
    },

    #[error("mapping #{index} of '{device}': invalid {field} '{value}'")]
    InvalidValue {
        device: String,
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("mapping #{index} of '{device}' references unknown control '{control}'")]
    UnknownControl {
        device: String,
        index: usize,
        control: String,
    },

    #[error("mapping #{index} of '{device}': bad {field} expression: {source}")]
    Expression {
        device: String,
        index: usize,
        field: &'static str,
        #[source]
        source: ExprError,
    },
}

/// Parse and validate a mapping document
pub fn parse_mapping(json: &str, origin: &str) -> Result<DeviceMapping, MappingError> {
    let raw = serde_json::from_str(json).map_err(|source| MappingError::Json {
        origin: origin.to_string(),
        source,
    })?;
    validate::validate(raw)
}

/// Read, parse and validate a mapping file
pub fn load_file(path: &Path) -> Result<DeviceMapping, MappingError> {
    let json = std::fs::read_to_string(path).map_err(|source| MappingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_mapping(&json, &path.display().to_string())
}
