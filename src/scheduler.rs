//! Periodic driver for a [`Registry`].
//!
//! One timer fires ticks. A tick never overlaps the previous one: while a
//! tick is running the timer logs the overrun and skips. A tick that runs
//! past the stall threshold stops the timer outright; the stalled tick keeps
//! its busy marker until it ends, so no other tick can start beside it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::registry::Registry;

/// Default tick interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default stall threshold.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(600);

type BusySlot = Arc<Mutex<Option<Instant>>>;

type TickSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Clears the busy marker when the tick ends, even by panic.
struct BusyGuard(BusySlot);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

/// Drives ticks over a registry.
pub struct Scheduler {
    registry: Arc<Registry>,
    stall_timeout: Duration,
    busy: BusySlot,
    timer: Mutex<Option<JoinHandle<()>>>,
    tick: TickSlot,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("stall_timeout", &self.stall_timeout)
            .field("busy", &*self.busy.lock())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_stall_timeout(registry, DEFAULT_STALL_TIMEOUT)
    }

    pub fn with_stall_timeout(registry: Arc<Registry>, stall_timeout: Duration) -> Self {
        Self {
            registry,
            stall_timeout,
            busy: Arc::new(Mutex::new(None)),
            timer: Mutex::new(None),
            tick: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Start (or restart) the timer. Registered targets are untouched.
    pub fn start(&self, interval: Duration) {
        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        let registry = Arc::clone(&self.registry);
        let busy = Arc::clone(&self.busy);
        let tick = Arc::clone(&self.tick);
        let stall_timeout = self.stall_timeout;
        *timer = Some(tokio::spawn(run_timer(registry, busy, tick, interval, stall_timeout)));
        info!(interval = ?interval, stall_timeout = ?stall_timeout, "Scheduler started");
    }

    /// Stop the timer and cancel a tick it left running; unless
    /// `timer_only`, also close every target.
    pub async fn stop(&self, timer_only: bool) {
        let timer = self.timer.lock().take();
        if let Some(handle) = timer {
            handle.abort();
            let _ = handle.await;
        }
        let tick = self.tick.lock().take();
        if let Some(handle) = tick
            && !handle.is_finished()
        {
            warn!("Cancelling running tick");
            handle.abort();
            let _ = handle.await;
        }
        info!(timer_only, "Scheduler stopped");
        if !timer_only {
            self.registry.shutdown().await;
        }
    }

    /// Whether the timer is alive.
    pub fn is_running(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start of the running tick, if one is running.
    pub fn busy_since(&self) -> Option<Instant> {
        *self.busy.lock()
    }

    /// Run one tick now, unless one is already running. Returns whether it
    /// ran.
    pub async fn tick_now(&self) -> bool {
        let Some(guard) = try_begin(&self.busy) else {
            warn!("Tick already running, skipping");
            return false;
        };
        let now = self.registry.now();
        self.registry.tick(now).await;
        drop(guard);
        true
    }
}

fn try_begin(busy: &BusySlot) -> Option<BusyGuard> {
    let mut slot = busy.lock();
    if slot.is_some() {
        return None;
    }
    *slot = Some(Instant::now());
    Some(BusyGuard(Arc::clone(busy)))
}

async fn run_timer(
    registry: Arc<Registry>,
    busy: BusySlot,
    tick: TickSlot,
    interval: Duration,
    stall_timeout: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let running_since = *busy.lock();
        if let Some(since) = running_since {
            let elapsed = since.elapsed();
            if elapsed > stall_timeout {
                error!(
                    elapsed = ?elapsed,
                    stall_timeout = ?stall_timeout,
                    "Tick stalled, stopping scheduler"
                );
                break;
            }
            warn!(elapsed = ?elapsed, "Previous tick still running, skipping");
            continue;
        }

        let Some(guard) = try_begin(&busy) else {
            continue;
        };
        let registry = Arc::clone(&registry);
        *tick.lock() = Some(tokio::spawn(async move {
            let now = registry.now();
            debug!(now = %now, "Tick begins");
            registry.tick(now).await;
            drop(guard);
        }));
    }
}
