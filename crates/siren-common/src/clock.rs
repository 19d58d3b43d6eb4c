use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Wall-clock and monotonic time source for the pipeline.
///
/// Workers take a [`Clock`] handle instead of calling `Utc::now()`
/// directly so trigger-window and calendar logic can be pinned in tests.
pub trait Clock: Send + Sync {
    /// Current wall time.
    fn now(&self) -> DateTime<Utc>;

    /// Current Unix seconds.
    fn now_secs(&self) -> i64 {
        self.now().timestamp()
    }

    /// Monotonic seconds since an arbitrary process-local epoch. Used for
    /// lease and backoff arithmetic that must not jump with wall time.
    fn monotonic_secs(&self) -> u64;
}

/// The production clock.
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// A clock pinned to a settable instant, for tests.
pub struct FixedClock {
    secs: AtomicI64,
}

impl FixedClock {
    pub fn at(secs: i64) -> Arc<Self> {
        Arc::new(Self {
            secs: AtomicI64::new(secs),
        })
    }

    pub fn advance(&self, delta_secs: i64) {
        self.secs.fetch_add(delta_secs, Ordering::SeqCst);
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.secs.load(Ordering::SeqCst), 0)
            .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
    }

    fn monotonic_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst).max(0) as u64
    }
}
