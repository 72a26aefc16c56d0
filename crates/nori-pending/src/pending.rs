//! High-level pending log API.
//!
//! [`PendingLog`] records the lifecycle of in-flight operations: `add` marks an
//! id as started, `commit` marks it as finished. Every call appends one frame
//! to the log file; fsyncs are batched by the [`scheduler`](crate::scheduler).

use crate::entry::{unix_seconds, Entry};
use crate::error::PendingError;
use crate::log::AppendLog;
use crate::pending_set::PendingSet;
use crate::scheduler::{self, PulseTimer, SyncScheduler};
use bytes::Bytes;
use nori_observe::{
    obs_count, obs_gauge, Meter, NoopMeter, PendingEvt, PendingKind, SyncTrigger, VizEvent,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for the pending log.
#[derive(Debug, Clone)]
pub struct PendingConfig {
    /// Log file; created if absent, appended to if present.
    pub path: PathBuf,
    /// How often the background timer checks for idle time (default: 10ms).
    ///
    /// A pulse is armed once this much time has passed since the last sync.
    pub pulse_interval: Duration,
    /// Unsynced records that force a sync regardless of the timer
    /// (default: 10,000).
    pub max_unsynced: u64,
    /// Node ID for observability events.
    pub node_id: u32,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tx.log"),
            pulse_interval: Duration::from_millis(10),
            max_unsynced: 10_000,
            node_id: 0,
        }
    }
}

impl PendingConfig {
    fn validate(&self) -> Result<(), PendingError> {
        if self.max_unsynced == 0 {
            return Err(PendingError::InvalidConfig(
                "max_unsynced must be greater than 0".to_string(),
            ));
        }

        if self.pulse_interval.is_zero() {
            return Err(PendingError::InvalidConfig(
                "pulse_interval cannot be zero - use max_unsynced = 1 to sync every record"
                    .to_string(),
            ));
        }

        if self.pulse_interval > Duration::from_secs(1) {
            return Err(PendingError::InvalidConfig(
                "pulse_interval should be at most 1 second to bound the unsynced window"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Sync accounting for a live log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Syncs forced by reaching `max_unsynced`.
    pub syncs_by_count: u64,
    /// Syncs performed after consuming a timer pulse.
    pub syncs_by_pulse: u64,
    /// Syncs requested through [`PendingLog::sync`].
    pub explicit_syncs: u64,
    /// Records appended since the last successful sync.
    pub unsynced: u64,
    /// Records appended since open.
    pub records_written: u64,
}

struct State {
    log: AppendLog,
    pending: PendingSet,
    scheduler: SyncScheduler,
    timer: PulseTimer,
    stats: SyncStats,
    meter: Arc<dyn Meter>,
    node_id: u32,
}

impl State {
    /// Appends one frame and syncs if either trigger fires.
    async fn append(&mut self, frame: &[u8]) -> Result<(), PendingError> {
        self.log.append(frame).await?;
        self.stats.records_written += 1;
        self.scheduler.record_append();

        if let Some(trigger) = self.scheduler.check() {
            self.sync(trigger).await?;
        }

        Ok(())
    }

    async fn sync(&mut self, trigger: SyncTrigger) -> Result<(), PendingError> {
        let start = Instant::now();
        self.log.sync().await?;
        let elapsed = start.elapsed();

        let records = self.scheduler.synced();
        match trigger {
            SyncTrigger::Count => self.stats.syncs_by_count += 1,
            SyncTrigger::Pulse => self.stats.syncs_by_pulse += 1,
            SyncTrigger::Explicit => self.stats.explicit_syncs += 1,
        }

        tracing::debug!(
            trigger = trigger.as_str(),
            records,
            elapsed_us = elapsed.as_micros() as u64,
            "pending log synced"
        );

        obs_count!(self.meter, "pending_syncs_total", trigger_labels(trigger), 1);
        self.meter
            .histo("pending_sync_ms", &[], &[])
            .observe(elapsed.as_secs_f64() * 1000.0);
        self.meter.emit(VizEvent::Pending(PendingEvt {
            node: self.node_id,
            kind: PendingKind::Sync {
                trigger,
                records,
                ms: elapsed.as_millis() as u32,
            },
        }));

        Ok(())
    }

    fn stats(&self) -> SyncStats {
        SyncStats {
            unsynced: self.scheduler.unsynced(),
            ..self.stats
        }
    }
}

fn trigger_labels(trigger: SyncTrigger) -> &'static [(&'static str, &'static str)] {
    match trigger {
        SyncTrigger::Count => &[("trigger", "count")],
        SyncTrigger::Pulse => &[("trigger", "pulse")],
        SyncTrigger::Explicit => &[("trigger", "explicit")],
    }
}

/// Durable log of pending operations.
///
/// All mutable state sits behind one async mutex, so concurrent `add` and
/// `commit` calls are linearized: frames never interleave in the file and the
/// pending set changes in file order.
///
/// A failed append or sync does not undo the call's pending-set update. An
/// added id whose record may not be durable is reported by
/// [`PendingLog::unconfirmed`].
///
/// Call [`PendingLog::close`] before dropping. Dropping an open log stops the
/// timer but skips the final sync.
///
/// # Example
///
/// ```no_run
/// use nori_pending::PendingLog;
/// use std::time::SystemTime;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let log = PendingLog::open("tx.log").await?;
///
///     log.add(1, SystemTime::now(), 0, b"job".as_slice()).await?;
///     log.commit(1, SystemTime::now()).await?;
///
///     log.close().await?;
///     Ok(())
/// }
/// ```
pub struct PendingLog {
    state: Mutex<Option<State>>,
    config: PendingConfig,
}

impl PendingLog {
    /// Opens the log at `path` with default settings.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PendingError> {
        Self::open_with_config(PendingConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
        .await
    }

    pub async fn open_with_config(config: PendingConfig) -> Result<Self, PendingError> {
        Self::open_with_meter(config, Arc::new(NoopMeter)).await
    }

    /// Opens the log with a custom observability meter.
    pub async fn open_with_meter(
        config: PendingConfig,
        meter: Arc<dyn Meter>,
    ) -> Result<Self, PendingError> {
        config.validate()?;

        let log = AppendLog::open(&config.path).await?;
        let (scheduler, timer) = scheduler::start(
            config.pulse_interval,
            config.max_unsynced,
            meter.clone(),
            config.node_id,
        );

        tracing::info!(
            path = %config.path.display(),
            existing_bytes = log.bytes_written(),
            pulse_interval_ms = config.pulse_interval.as_millis() as u64,
            max_unsynced = config.max_unsynced,
            "pending log opened"
        );

        let state = State {
            log,
            pending: PendingSet::new(),
            scheduler,
            timer,
            stats: SyncStats::default(),
            meter,
            node_id: config.node_id,
        };

        Ok(Self {
            state: Mutex::new(Some(state)),
            config,
        })
    }

    /// Records that operation `id` is in flight.
    ///
    /// A later add for the same id replaces the earlier one in the pending
    /// set. On an `Io` error the id stays pending and is marked unconfirmed.
    pub async fn add(
        &self,
        id: i64,
        ts: SystemTime,
        attempt: i32,
        payload: impl Into<Bytes>,
    ) -> Result<(), PendingError> {
        let entry = Entry::add(id, unix_seconds(ts), attempt, payload);
        let frame = entry.encode()?;

        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(PendingError::Closed)?;

        state.pending.record_add(entry);
        let result = state.append(&frame).await;
        if let Err(e) = &result {
            tracing::warn!(id, "add not confirmed: {}", e);
            state.pending.mark_unconfirmed(id);
        }

        if result.is_ok() {
            obs_count!(state.meter, "pending_adds_total", &[], 1);
        }
        obs_gauge!(state.meter, "pending_entries", &[], state.pending.len());
        result
    }

    /// Records that operation `id` finished.
    ///
    /// Commits for ids that were never added are written and accepted. The id
    /// leaves the pending set even if the append fails.
    pub async fn commit(&self, id: i64, ts: SystemTime) -> Result<(), PendingError> {
        let frame = Entry::commit(id, unix_seconds(ts)).encode()?;

        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(PendingError::Closed)?;

        if state.pending.record_commit(id).is_none() {
            tracing::trace!(id, "commit for id with no pending add");
        }
        let result = state.append(&frame).await;
        if let Err(e) = &result {
            tracing::warn!(id, "commit not confirmed: {}", e);
        }

        if result.is_ok() {
            obs_count!(state.meter, "pending_commits_total", &[], 1);
        }
        obs_gauge!(state.meter, "pending_entries", &[], state.pending.len());
        result
    }

    /// Forces everything appended so far to stable storage.
    pub async fn sync(&self) -> Result<(), PendingError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(PendingError::Closed)?;
        state.sync(SyncTrigger::Explicit).await
    }

    /// Syncs, stops the pulse timer and closes the file.
    ///
    /// The final sync is reported as an explicit one. The log is closed even
    /// if that sync fails. Waits for in-flight calls to finish. Every call
    /// after this, including a second `close`, fails with
    /// [`PendingError::Closed`].
    pub async fn close(&self) -> Result<(), PendingError> {
        let mut guard = self.state.lock().await;
        let mut state = guard.take().ok_or(PendingError::Closed)?;

        let flushed = state.scheduler.unsynced();
        let synced = state.sync(SyncTrigger::Explicit).await;

        let State {
            log,
            pending,
            timer,
            meter,
            node_id,
            ..
        } = state;

        timer.stop().await;
        synced?;
        log.close().await?;

        tracing::info!(pending = pending.len(), flushed, "pending log closed");
        meter.emit(VizEvent::Pending(PendingEvt {
            node: node_id,
            kind: PendingKind::Closed,
        }));

        Ok(())
    }

    /// Pending entries ordered by id.
    pub async fn pending(&self) -> Result<Vec<(i64, Entry)>, PendingError> {
        self.with_state(|s| s.pending.snapshot()).await
    }

    pub async fn is_pending(&self, id: i64) -> Result<bool, PendingError> {
        self.with_state(|s| s.pending.contains(id)).await
    }

    /// Pending ids whose add hit an I/O error, ordered.
    pub async fn unconfirmed(&self) -> Result<Vec<i64>, PendingError> {
        self.with_state(|s| s.pending.unconfirmed()).await
    }

    pub async fn stats(&self) -> Result<SyncStats, PendingError> {
        self.with_state(State::stats).await
    }

    pub fn config(&self) -> &PendingConfig {
        &self.config
    }

    async fn with_state<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T, PendingError> {
        let guard = self.state.lock().await;
        guard.as_ref().map(f).ok_or(PendingError::Closed)
    }
}
