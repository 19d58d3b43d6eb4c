pub mod itsm;
pub mod job;
pub mod notice;
pub mod webhook;

use serde_json::Value;
use std::time::Duration;

/// Per-request timeout from the action config row, floored at 1s.
pub(crate) fn request_timeout(timeout_secs: i64) -> Duration {
    Duration::from_secs(timeout_secs.max(1) as u64)
}

pub(crate) fn str_field<'a>(inputs: &'a Value, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
