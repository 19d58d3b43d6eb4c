use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Token-bucket settings for action creation, per `(biz, alert)` key.
#[derive(Debug, Clone, Copy)]
pub struct QosConfig {
    /// Bucket capacity: the burst of actions one alert may create.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl Default for QosConfig {
    fn default() -> Self {
        // burst of 5, then one action per minute per alert
        Self {
            capacity: 5.0,
            refill_per_sec: 1.0 / 60.0,
        }
    }
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Per-process QoS limiter. Overflow never blocks; the caller logs
/// ALERT_QOS and EVENT_DROP instead of creating an action.
pub struct QosLimiter {
    config: QosConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl QosLimiter {
    pub fn new(config: QosConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one token from the `(biz, alert)` bucket. Returns false when
    /// the bucket is empty.
    pub fn try_acquire(&self, biz_id: i64, alert_id: &str) -> bool {
        let key = format!("{biz_id}.{alert_id}");
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let bucket = buckets.entry(key).or_insert(Bucket {
            tokens: self.config.capacity,
            refilled_at: Instant::now(),
        });
        let elapsed = bucket.refilled_at.elapsed().as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        bucket.refilled_at = Instant::now();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for QosLimiter {
    fn default() -> Self {
        Self::new(QosConfig::default())
    }
}
