//! Action router - priority queuing and dispatch of translated actions
//!
//! Three service classes:
//! - `critical`: bypasses queuing, sent on the caller's path (jog wheels)
//! - `high`: bounded FIFO, always drained before `normal`
//! - `normal`: bounded FIFO, drained only when `high` is empty
//!
//! Overflow drops the incoming action, never a queued one. Delivery is
//! fire-and-forget: a failed send is counted and the action is gone.
//!
//! Strict priority means a sustained stream of high actions starves the
//! normal lane. Controllers produce bursts, not sustained floods, so the
//! normal lane catches up between bursts.

mod queue;
mod sink;


pub use queue::BoundedQueue;
pub use sink::{ActionSink, ConsoleSink, TargetSinks};

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::action::{Action, Priority};

/// Default bound of each queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Default)]
struct Counters {
    routed: AtomicU64,
    dispatched: AtomicU64,
    critical_sent: AtomicU64,
    dropped_high: AtomicU64,
    dropped_normal: AtomicU64,
    rejected: AtomicU64,
    send_failures: AtomicU64,
}

/// Snapshot of the router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub routed: u64,
    pub dispatched: u64,
    pub critical_sent: u64,
    pub dropped_high: u64,
    pub dropped_normal: u64,
    pub rejected: u64,
    pub send_failures: u64,
    pub high_depth: usize,
    pub normal_depth: usize,
}

impl std::fmt::Display for RouterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "routed={} dispatched={} critical={} dropped={}/{} rejected={} failures={} depth={}/{}",
            self.routed,
            self.dispatched,
            self.critical_sent,
            self.dropped_high,
            self.dropped_normal,
            self.rejected,
            self.send_failures,
            self.high_depth,
            self.normal_depth
        )
    }
}

/// Priority router in front of the action sinks
pub struct ActionRouter {
    sinks: TargetSinks,
    high: Mutex<BoundedQueue<Action>>,
    normal: Mutex<BoundedQueue<Action>>,
    /// Wakes the dispatch loop when something is queued (or on shutdown)
    notify: Notify,
    shutdown: AtomicBool,
    counters: Counters,
}

impl ActionRouter {
    /// Create a router
    ///
    /// # Arguments
    /// * `sinks` - Delivery endpoints per target
    /// * `queue_capacity` - Bound of both the high and normal queues
    pub fn new(sinks: TargetSinks, queue_capacity: usize) -> Self {
        Self {
            sinks,
            high: Mutex::new(BoundedQueue::new(queue_capacity)),
            normal: Mutex::new(BoundedQueue::new(queue_capacity)),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Submit an action
    ///
    /// Critical actions are delivered before this returns; the result is the
    /// sink's answer. High and normal actions are queued; the result says
    /// whether the queue accepted them.
    pub async fn route(&self, action: Action) -> bool {
        if action.command.trim().is_empty() || action.kind.trim().is_empty() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!("⚠️  Rejecting action without type/command from '{}'", action.from);
            return false;
        }
        self.counters.routed.fetch_add(1, Ordering::Relaxed);

        let lane = match action.priority {
            Priority::Critical => {
                self.counters.critical_sent.fetch_add(1, Ordering::Relaxed);
                return self.deliver(&action).await;
            }
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
        };

        let pushed = lane.lock().push(action);
        match pushed {
            Ok(()) => {
                self.notify.notify_one();
                true
            }
            Err(dropped) => {
                let counter = match dropped.priority {
                    Priority::High => &self.counters.dropped_high,
                    _ => &self.counters.dropped_normal,
                };
                let total = counter.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Queue full, dropping {} action {} (dropped so far: {})",
                    dropped.priority,
                    dropped.label(),
                    total
                );
                false
            }
        }
    }

    /// Next queued action, high lane first
    fn next_queued(&self) -> Option<Action> {
        if let Some(action) = self.high.lock().pop() {
            return Some(action);
        }
        self.normal.lock().pop()
    }

    async fn deliver(&self, action: &Action) -> bool {
        let sink = self.sinks.sink_for(action.target);
        let ok = sink.send(action).await;
        if ok {
            trace!("Delivered {} to {}", action.label(), sink.name());
        } else {
            self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
            debug!("Sink '{}' refused {}", sink.name(), action.label());
        }
        ok
    }

    /// Dispatch loop: one action per turn until shutdown
    pub async fn run_dispatch(self: Arc<Self>) {
        debug!("Router dispatch loop started");
        while !self.shutdown.load(Ordering::Acquire) {
            match self.next_queued() {
                Some(action) => {
                    self.deliver(&action).await;
                    self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
                // notify_one stores a permit, so a push between the empty
                // check and this await is not lost
                None => self.notify.notified().await,
            }
        }

        let stats = self.stats();
        info!(
            "🛑 Router stopped ({} high / {} normal left undelivered)",
            stats.high_depth, stats.normal_depth
        );
    }

    /// Spawn [`Self::run_dispatch`] on the current runtime
    pub fn spawn_dispatch(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_dispatch())
    }

    /// Stop the dispatch loop after the action in flight
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            routed: c.routed.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            critical_sent: c.critical_sent.load(Ordering::Relaxed),
            dropped_high: c.dropped_high.load(Ordering::Relaxed),
            dropped_normal: c.dropped_normal.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            high_depth: self.high.lock().len(),
            normal_depth: self.normal.lock().len(),
        }
    }
}
