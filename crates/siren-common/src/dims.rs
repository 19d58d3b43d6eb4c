//! Dimension hashing. Every idempotence key in the pipeline is derived
//! from the md5 of a sorted dimension set, so the exact byte layout here
//! is a compatibility contract.

use std::collections::BTreeMap;

/// md5 hex of the sorted `key=value` pairs of a dimension set.
pub fn dims_hash(dims: &BTreeMap<String, String>) -> String {
    let joined = dims
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("|");
    format!("{:x}", md5::compute(joined.as_bytes()))
}

/// Dedupe key collapsing repeated anomalies on the same dimensions into a
/// single alert: `md5(strategy_id | item_id | sorted dims)`.
pub fn dedupe_md5(strategy_id: i64, item_id: i64, dims: &BTreeMap<String, String>) -> String {
    let mut buf = format!("{strategy_id}|{item_id}");
    for (k, v) in dims {
        buf.push('|');
        buf.push_str(k);
        buf.push('=');
        buf.push_str(v);
    }
    format!("{:x}", md5::compute(buf.as_bytes()))
}

/// Record id for one evaluated point: `dims_hash "." ts`.
pub fn record_id(dims: &BTreeMap<String, String>, ts: i64) -> String {
    format!("{}.{ts}", dims_hash(dims))
}

/// Anomaly id: `record_id ".strategy_id.item_id.level"`.
pub fn anomaly_id(record_id: &str, strategy_id: i64, item_id: i64, level: u8) -> String {
    format!("{record_id}.{strategy_id}.{item_id}.{level}")
}

/// Snapshot key for a strategy payload captured at `update_time`.
pub fn snapshot_key(strategy_id: i64, update_time: i64) -> String {
    format!("{:x}", md5::compute(format!("{strategy_id}|{update_time}").as_bytes()))
}
