//! Per-device HID poll loop
//!
//! Each HID device gets one dedicated thread that owns the handle. Every
//! tick first sends queued output reports, then performs a single bounded
//! read; a timeout is "nothing happened", any other read error ends the loop
//! and reports the device as disconnected.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::{parse_report, ControlDescriptor, StateDiffer};
use crate::event::{now_ms, HardwareEvent, InboundEvent, MonotonicClock};

/// Blocking source of raw input reports
pub trait ReportSource: Send + 'static {
    /// Read one report into `buf`, waiting at most `timeout_ms`.
    /// Returns `Ok(0)` when no report arrived in time.
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;

    /// Send one complete output report
    fn write_report(&mut self, report: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub read_timeout_ms: i32,
    pub report_length: usize,
}

pub struct HidPoller<S: ReportSource> {
    device_id: String,
    source: S,
    controls: Vec<ControlDescriptor>,
    differ: StateDiffer,
    clock: MonotonicClock,
    settings: PollerSettings,
    events: mpsc::Sender<InboundEvent>,
    outgoing: Option<mpsc::Receiver<Vec<u8>>>,
    stop: Arc<AtomicBool>,
}

impl<S: ReportSource> HidPoller<S> {
    pub fn new(
        device_id: impl Into<String>,
        source: S,
        controls: Vec<ControlDescriptor>,
        settings: PollerSettings,
        events: mpsc::Sender<InboundEvent>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let differ = StateDiffer::new(&controls);
        Self {
            device_id: device_id.into(),
            source,
            controls,
            differ,
            clock: MonotonicClock::new(),
            settings,
            events,
            outgoing: None,
            stop,
        }
    }

    /// Output reports to send from the poll thread
    pub fn with_output(mut self, outgoing: mpsc::Receiver<Vec<u8>>) -> Self {
        self.outgoing = Some(outgoing);
        self
    }

    /// Write every queued output report
    fn flush_output(&mut self) {
        let Some(outgoing) = self.outgoing.as_mut() else {
            return;
        };
        while let Ok(report) = outgoing.try_recv() {
            if let Err(e) = self.source.write_report(&report) {
                warn!("HID write to '{}' failed: {:#}", self.device_id, e);
            }
        }
    }

    /// Parse and diff one report into canonical events
    pub fn process_report(&mut self, report: &[u8], timestamp: u64) -> Vec<HardwareEvent> {
        let timestamp = self.clock.stamp(timestamp);
        let state = parse_report(report, &self.controls);

        self.differ
            .diff(&state)
            .into_iter()
            .map(|change| {
                let mut event = HardwareEvent::new(
                    self.device_id.as_str(),
                    change.kind.event_kind(),
                    change.value,
                    timestamp,
                )
                .with_control(change.control)
                .with_delta(change.delta);
                event.absolute_position = change.absolute_position;
                event
            })
            .collect()
    }

    /// Start the poll loop on its own thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("hid-{}", self.device_id))
            .spawn(move || self.run())
    }

    fn run(mut self) {
        info!(
            "🎛️ HID poll loop started for '{}' ({}ms)",
            self.device_id,
            self.settings.interval.as_millis()
        );
        let mut buf = vec![0u8; self.settings.report_length.max(1)];
        let mut last_tick = Instant::now();

        while !self.stop.load(Ordering::Relaxed) {
            self.flush_output();
            match self.source.read_report(&mut buf, self.settings.read_timeout_ms) {
                Ok(0) => {}
                Ok(len) => {
                    let events = self.process_report(&buf[..len], now_ms());
                    trace!("HID '{}' report {} bytes, {} changes", self.device_id, len, events.len());
                    for event in events {
                        if self.events.blocking_send(InboundEvent::Hardware(event)).is_err() {
                            debug!("Inbound channel closed, stopping HID poll for '{}'", self.device_id);
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("HID read failed for '{}': {:#}", self.device_id, e);
                    let _ = self.events.blocking_send(InboundEvent::Disconnected {
                        device_id: self.device_id.clone(),
                        reason: e.to_string(),
                    });
                    return;
                }
            }

            let elapsed = last_tick.elapsed();
            if elapsed < self.settings.interval {
                std::thread::sleep(self.settings.interval - elapsed);
            }
            last_tick = Instant::now();
        }

        debug!("HID poll loop for '{}' stopped", self.device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted reads, then fails like an unplugged device
    #[derive(Default)]
    struct ScriptedSource {
        reads: VecDeque<Vec<u8>>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ReportSource for ScriptedSource {
        fn read_report(&mut self, buf: &mut [u8], _timeout_ms: i32) -> Result<usize> {
            match self.reads.pop_front() {
                Some(report) => {
                    buf[..report.len()].copy_from_slice(&report);
                    Ok(report.len())
                }
                None => anyhow::bail!("device unplugged"),
            }
        }

        fn write_report(&mut self, report: &[u8]) -> Result<()> {
            self.written.lock().push(report.to_vec());
            Ok(())
        }
    }

    fn controls() -> Vec<ControlDescriptor> {
        serde_json::from_str(
            r#"[
                {"name": "play", "type": "button", "byte": 0, "bit": 0},
                {"name": "jog", "type": "delta", "byte": 1, "signed": true}
            ]"#,
        )
        .unwrap()
    }

    fn settings() -> PollerSettings {
        PollerSettings {
            interval: Duration::from_millis(1),
            read_timeout_ms: 10,
            report_length: 4,
        }
    }

    fn poller(reads: Vec<Vec<u8>>) -> (HidPoller<ScriptedSource>, mpsc::Receiver<InboundEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let source = ScriptedSource {
            reads: reads.into(),
            ..Default::default()
        };
        let poller = HidPoller::new(
            "mixtrack",
            source,
            controls(),
            settings(),
            tx,
            Arc::new(AtomicBool::new(false)),
        );
        (poller, rx)
    }

    #[test]
    fn test_process_report_builds_events() {
        let (mut poller, _rx) = poller(Vec::new());

        let first = poller.process_report(&[0x01, 0x02], 100);
        assert_eq!(first.len(), 2);

        let changed = poller.process_report(&[0x01, 0xFF], 90);
        assert_eq!(changed.len(), 1);
        let jog = &changed[0];
        assert_eq!(jog.kind, EventKind::Delta);
        assert_eq!(jog.control.as_deref(), Some("jog"));
        assert_eq!(jog.delta, Some(-1));
        assert_eq!(jog.absolute_position, Some(1));
        // Clock never goes backwards
        assert_eq!(jog.timestamp, 100);
    }

    #[test]
    fn test_loop_skips_empty_reads_and_reports_disconnect() {
        let (poller, mut rx) = poller(vec![vec![0x01, 0x00], Vec::new(), vec![0x00, 0x00]]);
        let handle = poller.spawn().unwrap();
        handle.join().unwrap();

        let mut hardware = Vec::new();
        let mut disconnected = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                InboundEvent::Hardware(e) => hardware.push(e),
                InboundEvent::Disconnected { reason, .. } => disconnected = Some(reason),
                InboundEvent::Connected { .. } => unreachable!(),
            }
        }

        // First report emits both controls, third only the released button
        assert_eq!(hardware.len(), 3);
        assert_eq!(hardware[2].control.as_deref(), Some("play"));
        assert_eq!(hardware[2].value, 0);
        assert_eq!(disconnected.as_deref(), Some("device unplugged"));
    }

    #[test]
    fn test_stop_flag_ends_loop() {
        let (tx, _rx) = mpsc::channel(8);
        let stop = Arc::new(AtomicBool::new(true));
        let poller = HidPoller::new("idle", ScriptedSource::default(), controls(), settings(), tx, stop);
        poller.spawn().unwrap().join().unwrap();
    }

    #[test]
    fn test_queued_output_written_by_poll_thread() {
        let (tx, _rx) = mpsc::channel(8);
        let (queue, outgoing) = mpsc::channel(4);
        queue.try_send(vec![0x80, 0x01, 0x00]).unwrap();
        queue.try_send(vec![0x80, 0x03, 0x00]).unwrap();

        let source = ScriptedSource::default();
        let written = source.written.clone();
        let poller = HidPoller::new(
            "mixtrack",
            source,
            controls(),
            settings(),
            tx,
            Arc::new(AtomicBool::new(false)),
        )
        .with_output(outgoing);
        // The scripted source fails its first read, so one tick runs
        poller.spawn().unwrap().join().unwrap();

        assert_eq!(
            *written.lock(),
            vec![vec![0x80, 0x01, 0x00], vec![0x80, 0x03, 0x00]]
        );
    }
}
