//! Shared per-deck state cache

use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::{ControlClass, DeckState, FeedbackIntervals, FeedbackThrottle, FeedbackUpdate, StateMessage};

/// Decks known before any state message arrives
const DEFAULT_DECKS: [&str; 2] = ["A", "B"];

/// Last known downstream state plus the feedback throttle
///
/// Written by the downstream state stream, read by device-connect replays
/// and the feedback emission path.
pub struct FeedbackCache {
    decks: RwLock<BTreeMap<String, DeckState>>,
    throttle: FeedbackThrottle,
}

impl FeedbackCache {
    pub fn new(intervals: FeedbackIntervals) -> Self {
        let decks = DEFAULT_DECKS
            .iter()
            .map(|d| (d.to_string(), DeckState::default()))
            .collect();
        Self {
            decks: RwLock::new(decks),
            throttle: FeedbackThrottle::new(intervals),
        }
    }

    /// Merge a state message and return the feedback it implies
    pub fn apply_state(&self, msg: &StateMessage) -> Vec<FeedbackUpdate> {
        if !msg.is_state() {
            debug!("Ignoring downstream message of type '{}'", msg.kind);
            return Vec::new();
        }

        let mut decks = self.decks.write();
        let deck = decks.entry(msg.deck.clone()).or_default();
        deck.merge(msg);
        trace!("Deck {} state now {:?}", msg.deck, deck);
        deck.feedback_for(msg)
    }

    pub fn deck(&self, name: &str) -> Option<DeckState> {
        self.decks.read().get(name).copied()
    }

    pub fn deck_names(&self) -> Vec<String> {
        self.decks.read().keys().cloned().collect()
    }

    pub fn should_emit(&self, class: ControlClass, device: &str, control: &str) -> bool {
        self.throttle.should_emit(class, device, control)
    }

    /// Full snapshot for a newly connected device
    ///
    /// Clears the device's throttle entries first so the whole burst goes out.
    pub fn sync_device(&self, device: &str) -> Vec<FeedbackUpdate> {
        self.throttle.reset_device(device);
        let decks = self.decks.read();
        let updates: Vec<FeedbackUpdate> = decks
            .iter()
            .flat_map(|(name, state)| state.feedback_states(name))
            .collect();
        debug!("Replaying {} feedback values to '{}'", updates.len(), device);
        updates
    }
}

impl Default for FeedbackCache {
    fn default() -> Self {
        Self::new(FeedbackIntervals::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{FeedbackKey, FeedbackState};

    fn state(json: &str) -> StateMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_default_decks_exist() {
        let cache = FeedbackCache::default();
        assert_eq!(cache.deck_names(), vec!["A", "B"]);
        assert_eq!(cache.deck("A"), Some(DeckState::default()));
    }

    #[test]
    fn test_apply_state_merges_and_derives() {
        let cache = FeedbackCache::default();
        let updates = cache.apply_state(&state(
            r#"{"type": "state", "deck": "A", "playback": {"playing": true}}"#,
        ));

        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].key, FeedbackKey::new("transport", "play", Some("A")));
        assert_eq!(updates[0].state, FeedbackState::Flag(true));
        assert!(cache.deck("A").unwrap().playback.playing);
        assert!(!cache.deck("B").unwrap().playback.playing);
    }

    #[test]
    fn test_later_message_keeps_other_sections() {
        let cache = FeedbackCache::default();
        cache.apply_state(&state(r#"{"type": "state", "deck": "A", "playback": {"playing": true}}"#));
        cache.apply_state(&state(r#"{"type": "state", "deck": "A", "tempo": {"bpm": 126.0}}"#));

        let deck = cache.deck("A").unwrap();
        assert!(deck.playback.playing);
        assert_eq!(deck.tempo.bpm, 126.0);
    }

    #[test]
    fn test_new_deck_created_on_demand() {
        let cache = FeedbackCache::default();
        cache.apply_state(&state(r#"{"type": "state", "deck": "C", "sync": {"enabled": true}}"#));
        assert!(cache.deck("C").unwrap().sync.enabled);
    }

    #[test]
    fn test_non_state_messages_ignored() {
        let cache = FeedbackCache::default();
        let updates = cache.apply_state(&state(r#"{"type": "ack", "deck": "A", "playback": {"playing": true}}"#));
        assert!(updates.is_empty());
        assert!(!cache.deck("A").unwrap().playback.playing);
    }

    #[test]
    fn test_sync_device_resets_throttle_and_replays() {
        let cache = FeedbackCache::default();
        cache.apply_state(&state(r#"{"type": "state", "deck": "B", "playback": {"playing": true}}"#));

        assert!(cache.should_emit(ControlClass::Display, "ddj", "bpm"));
        assert!(!cache.should_emit(ControlClass::Display, "ddj", "bpm"));

        let updates = cache.sync_device("ddj");
        assert_eq!(updates.len(), 18);
        assert!(updates
            .iter()
            .any(|u| u.key == FeedbackKey::new("transport", "play", Some("B")) && u.state == FeedbackState::Flag(true)));
        assert!(cache.should_emit(ControlClass::Display, "ddj", "bpm"));
    }
}
