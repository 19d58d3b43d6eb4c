use rand::Rng;
use std::time::Duration;

const BASE_SECS: f64 = 1.0;
const CAP_SECS: f64 = 30.0;

/// Retry delay for transient store failures: exponential from 1s capped
/// at 30s, with ±20% jitter so contending workers spread out.
pub fn retry_delay(attempt: u32) -> Duration {
    let exp = BASE_SECS * 2f64.powi(attempt.min(16) as i32);
    let capped = exp.min(CAP_SECS);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(capped * jitter)
}
