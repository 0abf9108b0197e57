//! Hardware event to action translation
//!
//! Each connected device owns one [`Translator`] built from its mapping. The
//! lookup tables are built once at construction; `translate` is an exact-key
//! lookup followed by value derivation.

pub mod hid;
pub mod midi;
mod value;

use std::sync::Arc;

use crate::action::Action;
use crate::event::HardwareEvent;
use crate::feedback::{ControlClass, FeedbackUpdate, OutputDescriptor};
use crate::mapping::{DeviceMapping, Protocol};

pub use hid::HidTranslator;
pub use midi::MidiTranslator;

/// Device-specific event translation and reverse feedback lookup
pub trait Translator: Send {
    fn device_id(&self) -> &str;

    fn mapping(&self) -> &Arc<DeviceMapping>;

    /// Translate one event, or `None` when nothing is mapped to it
    fn translate(&mut self, event: &HardwareEvent) -> Option<Action>;

    /// Resolve a feedback value to the device outputs showing it
    ///
    /// Every mapping whose feedback descriptor matches the update's type,
    /// command and (when the mapping names one) deck contributes an output,
    /// together with its throttle class.
    fn feedback_output(&self, update: &FeedbackUpdate) -> Vec<(OutputDescriptor, ControlClass)> {
        value::feedback_outputs(&self.mapping().mappings, update)
    }
}

/// Build the translator matching the mapping's protocol
pub fn for_mapping(device_id: &str, mapping: Arc<DeviceMapping>) -> Box<dyn Translator> {
    match mapping.protocol() {
        Protocol::Midi => Box::new(MidiTranslator::new(device_id, mapping)),
        Protocol::Hid => Box::new(HidTranslator::new(device_id, mapping)),
    }
}
