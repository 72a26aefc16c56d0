//! nori-observe: vendor-neutral observability ABI.
//!
//! The pending log depends only on these traits and event types. Backends
//! (Prometheus exporters, test recorders) implement [`Meter`] elsewhere.

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}
pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn histo(
        &self,
        name: &'static str,
        buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram>;
    fn emit(&self, evt: VizEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMeter;

struct Discard;

impl Counter for Discard {
    fn inc(&self, _v: u64) {}
}
impl Gauge for Discard {
    fn set(&self, _v: i64) {}
}
impl Histogram for Discard {
    fn observe(&self, _v: f64) {}
}

impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(Discard)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(Discard)
    }
    fn histo(
        &self,
        _n: &'static str,
        _b: &'static [f64],
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(Discard)
    }
    fn emit(&self, _e: VizEvent) {}
}

/// Typed events for live visualization (payloads never included).
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum VizEvent {
    Pending(PendingEvt),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvt {
    pub node: u32,
    pub kind: PendingKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PendingKind {
    /// The log file was forced to stable storage.
    Sync {
        trigger: SyncTrigger,
        /// Records covered by this sync.
        records: u64,
        ms: u32,
    },
    /// The background timer armed a pulse.
    Pulse,
    /// The log was closed and its timer stopped.
    Closed,
}

/// What caused a sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    /// Unsynced record count reached its cap.
    Count,
    /// A timer pulse was consumed by a foreground call.
    Pulse,
    /// The caller asked for it (explicit sync or close).
    Explicit,
}

impl SyncTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncTrigger::Count => "count",
            SyncTrigger::Pulse => "pulse",
            SyncTrigger::Explicit => "explicit",
        }
    }
}

/// Macros (simple versions). Can be feature-gated if desired.
#[macro_export]
macro_rules! obs_count {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.counter($name, $labels).inc($v as u64);
    }};
}
#[macro_export]
macro_rules! obs_gauge {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.gauge($name, $labels).set($v as i64);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_meter_accepts_everything() {
        let meter = NoopMeter;
        obs_count!(meter, "pending_adds_total", &[], 3);
        obs_gauge!(meter, "pending_entries", &[], 7);
        meter.emit(VizEvent::Pending(PendingEvt {
            node: 0,
            kind: PendingKind::Pulse,
        }));
    }

    #[test]
    fn test_sync_trigger_labels() {
        assert_eq!(SyncTrigger::Count.as_str(), "count");
        assert_eq!(SyncTrigger::Pulse.as_str(), "pulse");
        assert_eq!(SyncTrigger::Explicit.as_str(), "explicit");
    }
}
