//! Downstream WebSocket client
//!
//! Sends actions as JSON text frames and receives `state` messages for the
//! feedback cache. Reconnects forever with a linear backoff capped at 10s.
//! Nothing is buffered across an outage: while disconnected the sink refuses
//! actions and the router counts them as failed sends.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::action::Action;
use crate::feedback::StateMessage;
use crate::router::ActionSink;

/// Outbound frames buffered while a write is in progress
const OUTBOUND_CAPACITY: usize = 256;

/// Delay before reconnect attempt `attempt` (1-based)
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(std::cmp::min(10_000, 250 * attempt as u64))
}

/// Handle to one downstream peer
pub struct DownstreamClient {
    url: String,
    outbound: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
}

impl DownstreamClient {
    /// Start the connection task
    ///
    /// # Arguments
    /// * `url` - WebSocket URL of the peer (e.g. `ws://127.0.0.1:8765`)
    /// * `states` - Where received state messages are forwarded
    /// * `shutdown` - Flips to `true` when the application stops
    pub fn spawn(
        url: impl Into<String>,
        states: mpsc::Sender<StateMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let url = url.into();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let client = Arc::new(Self {
            url: url.clone(),
            outbound,
            connected: connected.clone(),
        });

        let connection = Connection {
            url,
            outbound: outbound_rx,
            states,
            connected,
            shutdown,
        };
        let handle = tokio::spawn(connection.run());
        (client, handle)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ActionSink for DownstreamClient {
    fn name(&self) -> &str {
        &self.url
    }

    async fn send(&self, action: &Action) -> bool {
        if !self.is_connected() {
            return false;
        }
        let json = match action.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize {}: {}", action.label(), e);
                return false;
            }
        };
        self.outbound.try_send(json).is_ok()
    }
}

/// State owned by the connection task
struct Connection {
    url: String,
    outbound: mpsc::Receiver<String>,
    states: mpsc::Sender<StateMessage>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl Connection {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.session().await {
                Ok(true) => break,
                Ok(false) => {
                    // Session was up, so start the backoff over
                    attempt = 0;
                }
                Err(e) => warn!("Downstream {} unavailable: {:#}", self.url, e),
            }
            self.connected.store(false, Ordering::Release);

            attempt = attempt.saturating_add(1);
            let delay = backoff_delay(attempt);
            info!("⏳ Downstream reconnect #{} to {} in {}ms", attempt, self.url, delay.as_millis());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
        debug!("Downstream task for {} stopped", self.url);
    }

    /// One connected session; `Ok(true)` means shutdown was requested
    async fn session(&mut self) -> Result<bool> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        let (mut write, mut read) = stream.split();

        // Drop frames queued against the previous session
        while self.outbound.try_recv().is_ok() {}

        self.connected.store(true, Ordering::Release);
        info!("✅ Downstream connected: {}", self.url);

        loop {
            tokio::select! {
                frame = self.outbound.recv() => {
                    let Some(json) = frame else {
                        return Ok(true);
                    };
                    if let Err(e) = write.send(Message::Text(json)).await {
                        warn!("Downstream {} write failed: {}", self.url, e);
                        return Ok(false);
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.forward_state(&text),
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("🔌 Downstream {} closed the connection", self.url);
                            return Ok(false);
                        }
                        Some(Ok(other)) => trace!("Ignoring frame from {}: {:?}", self.url, other),
                        Some(Err(e)) => {
                            warn!("Downstream {} read failed: {}", self.url, e);
                            return Ok(false);
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(true);
                }
            }
        }
    }

    fn forward_state(&self, text: &str) {
        match serde_json::from_str::<StateMessage>(text) {
            Ok(msg) if msg.is_state() => {
                if self.states.try_send(msg).is_err() {
                    debug!("State channel full, dropping update from {}", self.url);
                }
            }
            Ok(msg) => trace!("Ignoring '{}' message from {}", msg.kind, self.url),
            Err(e) => debug!("Unparseable message from {}: {}", self.url, e),
        }
    }
}
