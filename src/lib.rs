//! deckbridge - DJ controller bridge
//!
//! Normalizes MIDI and HID controller input into semantic actions, routes
//! them to downstream services by priority, and drives controller LEDs and
//! displays from the downstream playback state.

pub mod action;
pub mod config;
pub mod device;
pub mod downstream;
pub mod event;
pub mod expr;
pub mod feedback;
pub mod hid;
pub mod mapping;
pub mod midi;
pub mod pipeline;
pub mod router;
pub mod translate;
