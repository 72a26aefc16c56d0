//! Sync scheduling: a background pulse timer plus an unsynced-count cap.
//!
//! The timer never touches the log file. When at least one pulse interval has
//! passed since the last sync it arms a one-slot channel; the next foreground
//! append that finds the slot full performs the sync. Because the sync always
//! runs after that caller's own append, it covers everything written so far.
//!
//! ```text
//!   Idle --(interval elapsed since last sync)--> PulseArmed
//!   PulseArmed --(foreground consumes + syncs)--> Idle
//! ```

use nori_observe::{obs_count, Meter, PendingEvt, PendingKind, SyncTrigger, VizEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Last-sync timestamp shared between the foreground and the timer task.
#[derive(Debug)]
struct SyncClock {
    origin: Instant,
    /// Microseconds after `origin` of the most recent sync.
    last_sync_us: AtomicU64,
}

impl SyncClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_sync_us: AtomicU64::new(0),
        }
    }

    fn mark(&self) {
        let us = self.origin.elapsed().as_micros() as u64;
        self.last_sync_us.store(us, Ordering::Release);
    }

    fn since_last_sync(&self) -> Duration {
        let last = Duration::from_micros(self.last_sync_us.load(Ordering::Acquire));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// Starts the pulse timer and returns the foreground half alongside it.
pub fn start(
    pulse_interval: Duration,
    max_unsynced: u64,
    meter: Arc<dyn Meter>,
    node_id: u32,
) -> (SyncScheduler, PulseTimer) {
    let clock = Arc::new(SyncClock::new());
    let (pulse_tx, pulse_rx) = mpsc::channel(1);

    let scheduler = SyncScheduler {
        max_unsynced,
        unsynced: 0,
        pulse_rx,
        clock: clock.clone(),
    };
    let timer = PulseTimer::spawn(pulse_interval, clock, pulse_tx, meter, node_id);

    (scheduler, timer)
}

/// Foreground half of the scheduler, owned by the pending log's locked state.
#[derive(Debug)]
pub struct SyncScheduler {
    max_unsynced: u64,
    unsynced: u64,
    pulse_rx: mpsc::Receiver<()>,
    clock: Arc<SyncClock>,
}

impl SyncScheduler {
    /// Counts one appended record.
    pub fn record_append(&mut self) {
        self.unsynced += 1;
    }

    /// Decides whether the current call must sync. Never blocks.
    ///
    /// An armed pulse is consumed first; otherwise the count cap applies.
    pub fn check(&mut self) -> Option<SyncTrigger> {
        match self.pulse_rx.try_recv() {
            Ok(()) => Some(SyncTrigger::Pulse),
            Err(_) if self.unsynced >= self.max_unsynced => Some(SyncTrigger::Count),
            Err(_) => None,
        }
    }

    /// Records a completed sync and returns how many records it covered.
    ///
    /// Any pulse armed while the sync was running is dropped, since the sync
    /// already covered it.
    pub fn synced(&mut self) -> u64 {
        let covered = std::mem::take(&mut self.unsynced);
        self.clock.mark();
        while self.pulse_rx.try_recv().is_ok() {}
        covered
    }

    pub fn unsynced(&self) -> u64 {
        self.unsynced
    }
}

/// Handle to the background pulse task.
///
/// [`PulseTimer::stop`] shuts it down and waits for it; dropping the handle
/// without stopping aborts the task.
#[derive(Debug)]
pub struct PulseTimer {
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl PulseTimer {
    fn spawn(
        interval: Duration,
        clock: Arc<SyncClock>,
        pulse_tx: mpsc::Sender<()>,
        meter: Arc<dyn Meter>,
        node_id: u32,
    ) -> Self {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run_pulses(
            interval,
            clock,
            pulse_tx,
            shutdown.clone(),
            meter,
            node_id,
        ));

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stops the timer. No pulse is armed after this returns.
    pub async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::warn!("pulse timer panicked: {}", e);
                }
            }
        }
    }
}

impl Drop for PulseTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_pulses(
    interval: Duration,
    clock: Arc<SyncClock>,
    pulse_tx: mpsc::Sender<()>,
    shutdown: Arc<Notify>,
    meter: Arc<dyn Meter>,
    node_id: u32,
) {
    loop {
        tokio::select! {
            _ = sleep(interval) => {}
            _ = shutdown.notified() => break,
        }

        // Synced recently; give writers another interval.
        if clock.since_last_sync() < interval {
            continue;
        }

        match pulse_tx.try_send(()) {
            Ok(()) => {
                tracing::trace!("pulse armed");
                obs_count!(meter, "pending_pulses_total", &[], 1);
                meter.emit(VizEvent::Pending(PendingEvt {
                    node: node_id,
                    kind: PendingKind::Pulse,
                }));
            }
            // Still armed from an earlier tick; nothing new to say.
            Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                tracing::debug!("pulse receiver dropped, stopping timer");
                break;
            }
        }
    }
}
