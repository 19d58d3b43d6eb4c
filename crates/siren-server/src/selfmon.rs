use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local throughput counters, flushed periodically to the log.
/// Relaxed ordering everywhere: the counts are diagnostics, not state.
#[derive(Debug, Default)]
pub struct SelfMonitor {
    records_in: AtomicU64,
    records_dropped: AtomicU64,
    points_emitted: AtomicU64,
    anomalies: AtomicU64,
    alerts_opened: AtomicU64,
    alerts_recovered: AtomicU64,
    alerts_closed: AtomicU64,
    actions_run: AtomicU64,
    actions_failed: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub records_in: u64,
    pub records_dropped: u64,
    pub points_emitted: u64,
    pub anomalies: u64,
    pub alerts_opened: u64,
    pub alerts_recovered: u64,
    pub alerts_closed: u64,
    pub actions_run: u64,
    pub actions_failed: u64,
}

impl SelfMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_in(&self) {
        self.records_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn points_emitted(&self, n: u64) {
        self.points_emitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn anomalies(&self, n: u64) {
        self.anomalies.fetch_add(n, Ordering::Relaxed);
    }

    pub fn alert_opened(&self) {
        self.alerts_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alert_recovered(&self) {
        self.alerts_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alert_closed(&self) {
        self.alerts_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_run(&self) {
        self.actions_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_failed(&self) {
        self.actions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            records_in: self.records_in.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            points_emitted: self.points_emitted.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            alerts_opened: self.alerts_opened.load(Ordering::Relaxed),
            alerts_recovered: self.alerts_recovered.load(Ordering::Relaxed),
            alerts_closed: self.alerts_closed.load(Ordering::Relaxed),
            actions_run: self.actions_run.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
        }
    }

    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            records_in = s.records_in,
            records_dropped = s.records_dropped,
            points_emitted = s.points_emitted,
            anomalies = s.anomalies,
            alerts_opened = s.alerts_opened,
            alerts_recovered = s.alerts_recovered,
            alerts_closed = s.alerts_closed,
            actions_run = s.actions_run,
            actions_failed = s.actions_failed,
            "pipeline counters"
        );
    }
}
