use snowflake::SnowflakeIdBucket;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);
static ALERT_SEQ: AtomicU32 = AtomicU32::new(0);

/// Initialize the Snowflake id generator.
///
/// `machine_id`: machine identifier (0-31)
/// `node_id`: node identifier (0-31)
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Generate a Snowflake id (string form), used for logs, action
/// instances, and delayed tasks.
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}

/// Generate a sortable alert id: 10-digit creation epoch seconds followed
/// by a 6-digit per-process sequence. Lexicographic order equals creation
/// order for any timestamp after 2001.
///
/// # Examples
///
/// ```
/// let id = siren_common::id::alert_id(1700000000);
/// assert_eq!(id.len(), 16);
/// assert!(id.starts_with("1700000000"));
/// ```
pub fn alert_id(epoch_secs: i64) -> String {
    let seq = ALERT_SEQ.fetch_add(1, Ordering::Relaxed) % 1_000_000;
    format!("{epoch_secs:010}{seq:06}")
}

/// Extract the creation epoch seconds embedded in an alert id.
pub fn alert_id_epoch(id: &str) -> Option<i64> {
    if id.len() != 16 {
        return None;
    }
    id[..10].parse().ok()
}
