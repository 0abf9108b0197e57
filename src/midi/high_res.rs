//! 14-bit CC reconstruction
//!
//! Controllers 0..32 carry the MSB of a 14-bit value and controller + 32
//! carries the matching LSB. An MSB is held until its LSB arrives within the
//! pairing window; the pair is then emitted as one high-resolution event.
//!
//! An MSB that expires unpaired marks its controller as 7-bit only; later
//! values on that controller pass straight through. A stray LSB for such a
//! controller clears the mark again.

use std::collections::{HashMap, HashSet};
use tracing::trace;

use super::MAX_14BIT;
use crate::event::{EventKind, HardwareEvent};

pub const DEFAULT_PAIRING_WINDOW_MS: u64 = 50;

const LSB_OFFSET: u8 = 32;

#[derive(Debug, Clone, Copy)]
struct PendingMsb {
    value: u8,
    timestamp: u64,
}

pub fn is_msb_controller(controller: u8) -> bool {
    controller < LSB_OFFSET
}

pub fn is_lsb_controller(controller: u8) -> bool {
    (LSB_OFFSET..LSB_OFFSET * 2).contains(&controller)
}

/// Per-device MSB/LSB pairing state
#[derive(Debug)]
pub struct HighResTracker {
    window_ms: u64,
    pending: HashMap<(u8, u8), PendingMsb>,
    /// (channel, controller) pairs seen sending MSB without LSB
    seven_bit: HashSet<(u8, u8)>,
}

impl Default for HighResTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PAIRING_WINDOW_MS)
    }
}

impl HighResTracker {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            pending: HashMap::new(),
            seven_bit: HashSet::new(),
        }
    }

    /// Number of MSBs waiting for their LSB
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a controller fell back to plain 7-bit handling
    pub fn is_seven_bit(&self, channel: u8, controller: u8) -> bool {
        self.seven_bit.contains(&(channel, controller))
    }

    /// Feed a CC event through the pairing state machine
    ///
    /// Returns the combined event when `event` is an LSB completing a live
    /// pair. Returns `None` when the event was stored as a pending MSB or is
    /// not part of a pair; the caller forwards the latter unchanged.
    pub fn reconstruct(&mut self, event: &HardwareEvent) -> Option<HardwareEvent> {
        let now = event.timestamp;
        let window = self.window_ms;
        let seven_bit = &mut self.seven_bit;
        self.pending.retain(|key, msb| {
            let live = now.saturating_sub(msb.timestamp) <= window;
            if !live {
                trace!("MSB ch:{} cc:{} expired unpaired", key.0, key.1);
                seven_bit.insert(*key);
            }
            live
        });

        if event.kind != EventKind::Cc {
            return None;
        }
        let channel = event.channel?;
        let controller = event.controller?;
        let value = event.value.clamp(0, 127) as u8;

        if is_msb_controller(controller) {
            if self.seven_bit.contains(&(channel, controller)) {
                return None;
            }
            // Last MSB wins
            self.pending.insert(
                (channel, controller),
                PendingMsb {
                    value,
                    timestamp: now,
                },
            );
            return None;
        }

        if !is_lsb_controller(controller) {
            return None;
        }

        let msb_controller = controller - LSB_OFFSET;
        let Some(msb) = self.pending.remove(&(channel, msb_controller)) else {
            self.seven_bit.remove(&(channel, msb_controller));
            return None;
        };
        let combined = (msb.value as u16) * 128 + value as u16;
        trace!(
            "14-bit pair ch:{} cc:{} msb:{} lsb:{} => {}",
            channel,
            msb_controller,
            msb.value,
            value,
            combined
        );

        let mut out = event.clone();
        out.controller = Some(msb_controller);
        out.value = combined as i64;
        out.value14bit = Some(combined);
        out.max_value = Some(MAX_14BIT);
        out.normalized = Some(combined as f64 / MAX_14BIT as f64);
        out.high_res = true;
        out.msb = Some(msb.value);
        out.lsb = Some(value);
        Some(out)
    }

    /// Apply the pairing policy to any normalized event
    ///
    /// Completed pairs replace their LSB, held MSBs are swallowed (or also
    /// forwarded as 7-bit when `optimistic_msb` is set), everything else
    /// passes through.
    pub fn process(&mut self, event: HardwareEvent, optimistic_msb: bool) -> Vec<HardwareEvent> {
        if event.kind != EventKind::Cc {
            return vec![event];
        }
        if let Some(combined) = self.reconstruct(&event) {
            return vec![combined];
        }
        let held = match (event.channel, event.controller) {
            (Some(ch), Some(cc)) => is_msb_controller(cc) && !self.seven_bit.contains(&(ch, cc)),
            _ => false,
        };
        if held && !optimistic_msb {
            Vec::new()
        } else {
            vec![event]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cc(channel: u8, controller: u8, value: u8, ts: u64) -> HardwareEvent {
        HardwareEvent::new("ddj", EventKind::Cc, value as i64, ts)
            .with_channel(channel)
            .with_controller(controller)
    }

    #[test]
    fn test_full_scale_pair() {
        let mut tracker = HighResTracker::default();
        assert!(tracker.reconstruct(&cc(0, 7, 127, 1000)).is_none());
        let combined = tracker.reconstruct(&cc(0, 39, 127, 1010)).unwrap();

        assert_eq!(combined.controller, Some(7));
        assert_eq!(combined.value, 16383);
        assert_eq!(combined.value14bit, Some(16383));
        assert_eq!(combined.max_value, Some(16383));
        assert_eq!(combined.normalized, Some(1.0));
        assert!(combined.high_res);
        assert_eq!(combined.msb, Some(127));
        assert_eq!(combined.lsb, Some(127));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_zero_pair() {
        let mut tracker = HighResTracker::default();
        tracker.reconstruct(&cc(2, 0, 0, 0));
        let combined = tracker.reconstruct(&cc(2, 32, 0, 5)).unwrap();
        assert_eq!(combined.value14bit, Some(0));
        assert_eq!(combined.normalized, Some(0.0));
    }

    #[test]
    fn test_lsb_after_window_is_forwarded_as_plain_cc() {
        let mut tracker = HighResTracker::new(50);
        assert!(tracker.reconstruct(&cc(0, 7, 64, 1000)).is_none());

        let late_lsb = cc(0, 39, 10, 1051);
        assert!(tracker.reconstruct(&late_lsb).is_none());
        assert_eq!(tracker.pending_count(), 0);

        let mut fresh = HighResTracker::new(50);
        fresh.reconstruct(&cc(0, 7, 64, 1000));
        let out = fresh.process(late_lsb, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].controller, Some(39));
        assert_eq!(out[0].value, 10);
        assert!(!out[0].high_res);
    }

    #[test]
    fn test_lsb_exactly_at_window_edge_pairs() {
        let mut tracker = HighResTracker::new(50);
        tracker.reconstruct(&cc(0, 7, 1, 1000));
        assert!(tracker.reconstruct(&cc(0, 39, 1, 1050)).is_some());
    }

    #[test]
    fn test_last_msb_wins() {
        let mut tracker = HighResTracker::default();
        tracker.reconstruct(&cc(0, 7, 10, 100));
        tracker.reconstruct(&cc(0, 7, 20, 110));
        assert_eq!(tracker.pending_count(), 1);

        let combined = tracker.reconstruct(&cc(0, 39, 5, 120)).unwrap();
        assert_eq!(combined.value14bit, Some(20 * 128 + 5));
        assert_eq!(combined.msb, Some(20));
    }

    #[test]
    fn test_channels_are_independent() {
        let mut tracker = HighResTracker::default();
        tracker.reconstruct(&cc(0, 7, 10, 100));
        assert!(tracker.reconstruct(&cc(1, 39, 5, 101)).is_none());
        assert!(tracker.reconstruct(&cc(0, 39, 5, 102)).is_some());
    }

    #[test]
    fn test_expired_entries_swept_on_any_call() {
        let mut tracker = HighResTracker::new(50);
        tracker.reconstruct(&cc(0, 1, 10, 0));
        tracker.reconstruct(&cc(0, 2, 10, 0));
        assert_eq!(tracker.pending_count(), 2);

        tracker.reconstruct(&cc(0, 100, 1, 500));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_process_policy() {
        let mut tracker = HighResTracker::default();

        // Plain 7-bit controller above the 14-bit range passes through
        assert_eq!(tracker.process(cc(0, 80, 3, 0), false).len(), 1);

        // Held MSB is swallowed unless optimistic
        assert!(tracker.process(cc(0, 7, 3, 0), false).is_empty());
        let optimistic = tracker.process(cc(0, 8, 3, 0), true);
        assert_eq!(optimistic.len(), 1);
        assert!(!optimistic[0].high_res);

        // Non-CC events are untouched
        let note = HardwareEvent::new("ddj", EventKind::NoteOn, 127, 0)
            .with_channel(0)
            .with_note(1, 127);
        assert_eq!(tracker.process(note.clone(), false), vec![note]);
    }

    #[test]
    fn test_unpaired_msb_falls_back_to_seven_bit() {
        let mut tracker = HighResTracker::new(50);

        // First move of an MSB-only knob is held and then expires
        assert!(tracker.process(cc(0, 7, 40, 1000), false).is_empty());
        assert!(!tracker.is_seven_bit(0, 7));

        // Next value arrives after the window: forwarded as plain 7-bit
        let out = tracker.process(cc(0, 7, 41, 1100), false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 41);
        assert!(!out[0].high_res);
        assert!(tracker.is_seven_bit(0, 7));
        assert_eq!(tracker.pending_count(), 0);

        // Other controllers are unaffected
        assert!(tracker.process(cc(0, 8, 1, 1101), false).is_empty());
    }

    #[test]
    fn test_stray_lsb_restores_pairing() {
        let mut tracker = HighResTracker::new(50);
        tracker.process(cc(0, 7, 40, 1000), false);
        tracker.process(cc(0, 7, 41, 1100), false);
        assert!(tracker.is_seven_bit(0, 7));

        // An LSB shows the controller is 14-bit after all
        tracker.process(cc(0, 39, 3, 1110), false);
        assert!(!tracker.is_seven_bit(0, 7));

        assert!(tracker.process(cc(0, 7, 42, 1120), false).is_empty());
        let out = tracker.process(cc(0, 39, 0, 1125), false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value14bit, Some(42 * 128));
    }

    proptest! {
        #[test]
        fn prop_pair_combines(msb in 0u8..128, lsb in 0u8..128, controller in 0u8..32, gap in 0u64..=50) {
            let mut tracker = HighResTracker::default();
            prop_assert!(tracker.reconstruct(&cc(0, controller, msb, 1000)).is_none());
            let combined = tracker
                .reconstruct(&cc(0, controller + 32, lsb, 1000 + gap))
                .expect("pair within window");
            let expected = msb as u16 * 128 + lsb as u16;
            prop_assert_eq!(combined.value14bit, Some(expected));
            prop_assert_eq!(combined.normalized, Some(expected as f64 / 16383.0));
            prop_assert_eq!(combined.controller, Some(controller));
        }
    }
}
