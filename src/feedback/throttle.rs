//! Per-control rate limiting of feedback writes

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Instant;
use tracing::trace;

use super::{ControlClass, FeedbackIntervals};

/// Last-sent instant per (device, control)
///
/// Uses DashMap so the feedback path and device-connect replays can touch
/// different devices without contending on one lock.
pub struct FeedbackThrottle {
    intervals: FeedbackIntervals,
    last_sent: DashMap<(String, String), Instant>,
}

impl FeedbackThrottle {
    pub fn new(intervals: FeedbackIntervals) -> Self {
        Self {
            intervals,
            last_sent: DashMap::new(),
        }
    }

    pub fn should_emit(&self, class: ControlClass, device: &str, control: &str) -> bool {
        self.should_emit_at(class, device, control, Instant::now())
    }

    /// Gate a write at `now`
    ///
    /// The first write for a key always passes; later writes pass once the
    /// class interval has elapsed, and record `now` as the new last-sent time.
    pub fn should_emit_at(&self, class: ControlClass, device: &str, control: &str, now: Instant) -> bool {
        let interval = self.intervals.for_class(class);
        let key = (device.to_string(), control.to_string());

        match self.last_sent.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if now.saturating_duration_since(*slot.get()) >= interval {
                    slot.insert(now);
                    true
                } else {
                    trace!("Throttled {:?} feedback to {} {}", class, device, control);
                    false
                }
            }
        }
    }

    /// Forget every entry for `device`
    pub fn reset_device(&self, device: &str) {
        self.last_sent.retain(|(d, _), _| d != device);
    }

    pub fn tracked(&self) -> usize {
        self.last_sent.len()
    }
}
