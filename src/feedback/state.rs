//! Downstream state messages and the per-deck snapshot

use serde::{Deserialize, Serialize};

use super::{ControlClass, FeedbackKey, FeedbackState, FeedbackUpdate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Playback {
    pub playing: bool,
    pub paused: bool,
    pub cued: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Position {
    /// Seconds
    pub current_time: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VuMeter {
    pub peak: f64,
    pub rms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    pub enabled: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tempo {
    pub bpm: f64,
    pub pitch: f64,
}

/// Partial deck state pushed by a downstream peer
///
/// ```json
/// { "type": "state", "source": "audio", "deck": "A",
///   "playback": { "playing": true, "paused": false, "cued": false } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub deck: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback: Option<Playback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vu_meter: Option<VuMeter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<Tempo>,
}

impl StateMessage {
    pub fn is_state(&self) -> bool {
        self.kind == "state"
    }
}

/// Last known snapshot of one deck
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeckState {
    pub playback: Playback,
    pub position: Position,
    pub vu_meter: VuMeter,
    pub sync: SyncState,
    pub tempo: Tempo,
}

impl DeckState {
    /// Shallow merge: every section present in `msg` replaces ours wholesale
    pub fn merge(&mut self, msg: &StateMessage) {
        if let Some(playback) = msg.playback {
            self.playback = playback;
        }
        if let Some(position) = msg.position {
            self.position = position;
        }
        if let Some(vu_meter) = msg.vu_meter {
            self.vu_meter = vu_meter;
        }
        if let Some(sync) = msg.sync {
            self.sync = sync;
        }
        if let Some(tempo) = msg.tempo {
            self.tempo = tempo;
        }
    }

    /// Every feedback value this snapshot implies
    pub fn feedback_states(&self, deck: &str) -> Vec<FeedbackUpdate> {
        let mut updates = Vec::with_capacity(9);
        self.playback_updates(deck, &mut updates);
        self.position_updates(deck, &mut updates);
        self.vu_updates(deck, &mut updates);
        self.sync_updates(deck, &mut updates);
        self.tempo_updates(deck, &mut updates);
        updates
    }

    /// Feedback for the sections carried by `msg` only
    pub fn feedback_for(&self, msg: &StateMessage) -> Vec<FeedbackUpdate> {
        let deck = msg.deck.as_str();
        let mut updates = Vec::new();
        if msg.playback.is_some() {
            self.playback_updates(deck, &mut updates);
        }
        if msg.position.is_some() {
            self.position_updates(deck, &mut updates);
        }
        if msg.vu_meter.is_some() {
            self.vu_updates(deck, &mut updates);
        }
        if msg.sync.is_some() {
            self.sync_updates(deck, &mut updates);
        }
        if msg.tempo.is_some() {
            self.tempo_updates(deck, &mut updates);
        }
        updates
    }

    fn playback_updates(&self, deck: &str, out: &mut Vec<FeedbackUpdate>) {
        let p = self.playback;
        out.push(update(deck, "transport", "play", FeedbackState::Flag(p.playing), ControlClass::Led));
        out.push(update(deck, "transport", "pause", FeedbackState::Flag(p.paused), ControlClass::Led));
        out.push(update(deck, "transport", "cue", FeedbackState::Flag(p.cued), ControlClass::Led));
    }

    fn position_updates(&self, deck: &str, out: &mut Vec<FeedbackUpdate>) {
        let pos = self.position;
        let ratio = if pos.duration > 0.0 {
            (pos.current_time / pos.duration).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(update(deck, "position", "elapsed", FeedbackState::Level(ratio), ControlClass::Display));
    }

    fn vu_updates(&self, deck: &str, out: &mut Vec<FeedbackUpdate>) {
        out.push(update(deck, "meter", "vu", FeedbackState::Level(self.vu_meter.peak), ControlClass::Vu));
    }

    fn sync_updates(&self, deck: &str, out: &mut Vec<FeedbackUpdate>) {
        out.push(update(deck, "sync", "toggle", FeedbackState::Flag(self.sync.enabled), ControlClass::Led));
        out.push(update(deck, "sync", "lock", FeedbackState::Flag(self.sync.locked), ControlClass::Led));
    }

    fn tempo_updates(&self, deck: &str, out: &mut Vec<FeedbackUpdate>) {
        out.push(update(deck, "tempo", "bpm", FeedbackState::Number(self.tempo.bpm), ControlClass::Display));
        out.push(update(deck, "tempo", "pitch", FeedbackState::Number(self.tempo.pitch), ControlClass::Display));
    }
}

fn update(deck: &str, kind: &str, command: &str, state: FeedbackState, class: ControlClass) -> FeedbackUpdate {
    FeedbackUpdate {
        key: FeedbackKey::new(kind, command, Some(deck)),
        state,
        class,
    }
}
