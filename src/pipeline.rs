//! Inbound event consumer
//!
//! Single owner of every connected device's translator and output. Events
//! from all adapters arrive on one channel and are handled in order, so a
//! device's events reach the router in the order they were produced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::device::DeviceOutput;
use crate::event::{HardwareEvent, InboundEvent};
use crate::feedback::{ControlClass, FeedbackCache, OutputDescriptor, StateMessage};
use crate::router::ActionRouter;
use crate::translate::{self, Translator};

/// How often throttled feedback is retried
const FLUSH_INTERVAL: Duration = Duration::from_millis(5);

struct ConnectedDevice {
    translator: Box<dyn Translator>,
    output: Option<Arc<dyn DeviceOutput>>,
}

pub struct Pipeline {
    router: Arc<ActionRouter>,
    cache: Arc<FeedbackCache>,
    devices: HashMap<String, ConnectedDevice>,
    /// Newest throttled write per (device, control), sent once its interval passes
    pending: HashMap<(String, String), (ControlClass, OutputDescriptor)>,
}

impl Pipeline {
    pub fn new(router: Arc<ActionRouter>, cache: Arc<FeedbackCache>) -> Self {
        Self {
            router,
            cache,
            devices: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Consume hardware events and downstream state until shutdown
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<InboundEvent>,
        mut states: mpsc::Receiver<StateMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut flush = tokio::time::interval(FLUSH_INTERVAL);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.handle_inbound(event).await,
                    None => break,
                },
                Some(msg) = states.recv() => self.handle_state(&msg),
                _ = flush.tick() => self.flush_pending(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Pipeline stopped with {} device(s) connected", self.devices.len());
    }

    pub async fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Connected {
                device_id,
                mapping,
                output,
            } => {
                info!("✅ Device '{}' connected (mapping '{}')", device_id, mapping.name());
                let device = ConnectedDevice {
                    translator: translate::for_mapping(&device_id, mapping),
                    output,
                };
                self.devices.insert(device_id.clone(), device);
                // The replay sends the newest state, which supersedes anything held back
                self.pending.retain(|(device, _), _| *device != device_id);
                self.replay(&device_id);
            }
            InboundEvent::Disconnected { device_id, reason } => {
                self.pending.retain(|(device, _), _| *device != device_id);
                if self.devices.remove(&device_id).is_some() {
                    info!("🔌 Device '{}' disconnected: {}", device_id, reason);
                }
            }
            InboundEvent::Hardware(event) => self.handle_hardware(event).await,
        }
    }

    async fn handle_hardware(&mut self, event: HardwareEvent) {
        let Some(device) = self.devices.get_mut(&event.device_id) else {
            trace!("Event from unknown device '{}'", event.device_id);
            return;
        };
        let Some(action) = device.translator.translate(&event) else {
            return;
        };
        debug!("🎯 {} → {} ({})", event.device_id, action.label(), action.priority);
        self.router.route(action).await;
    }

    /// Push the cached state to a newly connected device, unthrottled
    fn replay(&self, device_id: &str) {
        let Some(device) = self.devices.get(device_id) else {
            return;
        };
        let Some(output) = &device.output else {
            return;
        };

        let mut written = 0;
        for update in self.cache.sync_device(device_id) {
            for (descriptor, _) in device.translator.feedback_output(&update) {
                match output.write(&descriptor) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        warn!("Feedback replay to '{}' failed: {:#}", device_id, e);
                        return;
                    }
                }
            }
        }
        debug!("Replayed {} outputs to '{}'", written, device_id);
    }

    /// Merge a downstream state message and drive the resulting feedback
    ///
    /// A write the throttle rejects is parked in `pending`, replacing any
    /// older value for the same control, and goes out from
    /// [`Self::flush_pending`] once the interval has passed.
    pub fn handle_state(&mut self, msg: &StateMessage) {
        let updates = self.cache.apply_state(msg);
        if updates.is_empty() {
            return;
        }
        for (device_id, device) in &self.devices {
            let Some(output) = &device.output else {
                continue;
            };
            for update in &updates {
                for (descriptor, class) in device.translator.feedback_output(update) {
                    let key = (device_id.clone(), descriptor.control_id());
                    if !self.cache.should_emit(class, device_id, &key.1) {
                        trace!("Throttled {:?} on '{}'", descriptor, device_id);
                        self.pending.insert(key, (class, descriptor));
                        continue;
                    }
                    self.pending.remove(&key);
                    write_feedback(device_id, output.as_ref(), &descriptor);
                }
            }
        }
    }

    /// Send parked writes whose throttle interval has elapsed
    pub fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let devices = &self.devices;
        let cache = &self.cache;
        self.pending.retain(|(device_id, control), (class, descriptor)| {
            let Some(output) = devices.get(device_id).and_then(|d| d.output.as_ref()) else {
                return false;
            };
            if !cache.should_emit(*class, device_id, control) {
                return true;
            }
            write_feedback(device_id, output.as_ref(), descriptor);
            false
        });
    }
}

fn write_feedback(device_id: &str, output: &dyn DeviceOutput, descriptor: &OutputDescriptor) {
    if let Err(e) = output.write(descriptor) {
        warn!("Feedback write to '{}' failed: {:#}", device_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionValue};
    use crate::event::EventKind;
    use crate::feedback::OutputDescriptor;
    use crate::mapping::parse_mapping;
    use crate::router::{ActionSink, TargetSinks, DEFAULT_QUEUE_CAPACITY};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const MAPPING: &str = r#"{
        "device": {"name": "DDJ-400", "protocol": "midi"},
        "mappings": [
            {
                "midi": {"type": "noteon", "channel": 0, "note": 11},
                "action": {"type": "transport", "command": "play", "deck": "A"},
                "target": "audio", "priority": "high",
                "feedback": {"midi": {"type": "noteon", "channel": 0, "note": 11}}
            },
            {
                "midi": {"type": "cc", "channel": 0, "controller": 33},
                "action": {"type": "jog", "command": "scratch", "deck": "A"},
                "target": "audio", "priority": "critical"
            }
        ]
    }"#;

    #[derive(Default)]
    struct RecordingOutput {
        writes: Mutex<Vec<OutputDescriptor>>,
    }

    impl DeviceOutput for RecordingOutput {
        fn write(&self, output: &OutputDescriptor) -> anyhow::Result<()> {
            self.writes.lock().push(output.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<Action>>,
    }

    #[async_trait]
    impl ActionSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, action: &Action) -> bool {
            self.received.lock().push(action.clone());
            true
        }
    }

    struct Harness {
        pipeline: Pipeline,
        router: Arc<ActionRouter>,
        sink: Arc<RecordingSink>,
        output: Arc<RecordingOutput>,
    }

    async fn connected() -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let sink_dyn: Arc<dyn ActionSink> = sink.clone();
        let router = Arc::new(ActionRouter::new(TargetSinks::new(sink_dyn), DEFAULT_QUEUE_CAPACITY));
        let cache = Arc::new(FeedbackCache::default());
        let mut pipeline = Pipeline::new(router.clone(), cache);

        let output = Arc::new(RecordingOutput::default());
        let output_dyn: Arc<dyn DeviceOutput> = output.clone();
        pipeline
            .handle_inbound(InboundEvent::Connected {
                device_id: "DDJ-400 MIDI 1".to_string(),
                mapping: Arc::new(parse_mapping(MAPPING, "test").unwrap()),
                output: Some(output_dyn),
            })
            .await;

        Harness {
            pipeline,
            router,
            sink,
            output,
        }
    }

    fn play_led(value: u8) -> OutputDescriptor {
        OutputDescriptor::Midi {
            kind: crate::mapping::MidiOutputKind::Note,
            channel: 0,
            number: 11,
            value,
        }
    }

    fn state(json: &str) -> StateMessage {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_connect_replays_cached_state() {
        let h = connected().await;
        assert!(h.pipeline.is_connected("DDJ-400 MIDI 1"));
        // Deck A play LED replayed as off; deck B has no mapped output
        assert_eq!(*h.output.writes.lock(), vec![play_led(0)]);
    }

    #[tokio::test]
    async fn test_hardware_event_reaches_router() {
        let mut h = connected().await;
        let event = HardwareEvent::new("DDJ-400 MIDI 1", EventKind::NoteOn, 127, 7)
            .with_channel(0)
            .with_note(11, 127);
        h.pipeline.handle_inbound(InboundEvent::Hardware(event)).await;

        let stats = h.router.stats();
        assert_eq!(stats.routed, 1);
        assert_eq!(stats.high_depth, 1);

        // Critical goes straight to the sink
        let jog = HardwareEvent::new("DDJ-400 MIDI 1", EventKind::Cc, 65, 8)
            .with_channel(0)
            .with_controller(33);
        h.pipeline.handle_inbound(InboundEvent::Hardware(jog)).await;
        let received = h.sink.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].command, "scratch");
    }

    #[tokio::test]
    async fn test_state_drives_throttled_feedback() {
        let mut h = connected().await;
        h.output.writes.lock().clear();

        h.pipeline
            .handle_state(&state(r#"{"type": "state", "deck": "A", "playback": {"playing": true}}"#));
        assert_eq!(*h.output.writes.lock(), vec![play_led(127)]);

        // Same control again inside the LED interval is held back
        h.pipeline
            .handle_state(&state(r#"{"type": "state", "deck": "A", "playback": {"playing": false}}"#));
        assert_eq!(h.output.writes.lock().len(), 1);
        assert_eq!(h.pipeline.pending_count(), 1);

        // Deck B has no feedback mapping
        h.pipeline
            .handle_state(&state(r#"{"type": "state", "deck": "B", "playback": {"playing": true}}"#));
        assert_eq!(h.output.writes.lock().len(), 1);

        // Still inside the interval
        h.pipeline.flush_pending();
        assert_eq!(h.output.writes.lock().len(), 1);

        // Once the interval passes the LED settles on the stopped value
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        h.pipeline.flush_pending();
        assert_eq!(*h.output.writes.lock(), vec![play_led(127), play_led(0)]);
        assert_eq!(h.pipeline.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_newest_suppressed_value_wins() {
        let mut h = connected().await;
        h.output.writes.lock().clear();

        for playing in [true, false, true, false] {
            let msg = format!(r#"{{"type": "state", "deck": "A", "playback": {{"playing": {}}}}}"#, playing);
            h.pipeline.handle_state(&state(&msg));
        }
        assert_eq!(h.pipeline.pending_count(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        h.pipeline.flush_pending();
        assert_eq!(*h.output.writes.lock(), vec![play_led(127), play_led(0)]);
    }

    #[tokio::test]
    async fn test_disconnect_drops_pending_feedback() {
        let mut h = connected().await;
        h.pipeline
            .handle_state(&state(r#"{"type": "state", "deck": "A", "playback": {"playing": true}}"#));
        h.pipeline
            .handle_state(&state(r#"{"type": "state", "deck": "A", "playback": {"playing": false}}"#));
        assert_eq!(h.pipeline.pending_count(), 1);

        h.pipeline
            .handle_inbound(InboundEvent::Disconnected {
                device_id: "DDJ-400 MIDI 1".to_string(),
                reason: "unplugged".to_string(),
            })
            .await;
        assert_eq!(h.pipeline.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_run_flushes_trailing_state() {
        let h = connected().await;
        let (_inbound_tx, inbound_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(h.pipeline.run(inbound_rx, state_rx, shutdown_rx));

        for playing in [true, false] {
            let msg = format!(r#"{{"type": "state", "deck": "A", "playback": {{"playing": {}}}}}"#, playing);
            state_tx.send(state(&msg)).await.unwrap();
        }

        for _ in 0..100 {
            if h.output.writes.lock().last() == Some(&play_led(0)) && h.output.writes.lock().len() == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        // replay, playing, then the held-back stop
        assert_eq!(*h.output.writes.lock(), vec![play_led(0), play_led(127), play_led(0)]);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = connected().await;
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(h.pipeline.run(inbound_rx, state_rx, shutdown_rx));

        let event = HardwareEvent::new("DDJ-400 MIDI 1", EventKind::NoteOn, 127, 7)
            .with_channel(0)
            .with_note(11, 127);
        inbound_tx.send(InboundEvent::Hardware(event)).await.unwrap();
        state_tx
            .send(state(r#"{"type": "state", "deck": "A", "playback": {"playing": true}}"#))
            .await
            .unwrap();

        for _ in 0..100 {
            if h.router.stats().routed == 1 && h.output.writes.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(h.router.stats().routed, 1);
        assert_eq!(h.output.writes.lock().last(), Some(&play_led(127)));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_removes_device() {
        let mut h = connected().await;
        h.pipeline
            .handle_inbound(InboundEvent::Disconnected {
                device_id: "DDJ-400 MIDI 1".to_string(),
                reason: "unplugged".to_string(),
            })
            .await;
        assert_eq!(h.pipeline.device_count(), 0);

        // Events from it are ignored now
        let event = HardwareEvent::new("DDJ-400 MIDI 1", EventKind::NoteOn, 127, 9)
            .with_channel(0)
            .with_note(11, 127);
        h.pipeline.handle_inbound(InboundEvent::Hardware(event)).await;
        assert_eq!(h.router.stats().routed, 0);
        assert_eq!(
            h.sink.received.lock().iter().filter(|a| a.value == Some(ActionValue::Bool(true))).count(),
            0
        );
    }
}
