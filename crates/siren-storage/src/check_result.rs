use crate::db::Db;
use crate::Result;
use siren_common::dims::dims_hash;
use siren_common::types::CheckLabel;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Scope key for the checkpoint that tracks the max ts across all
/// dimension sets of one `(strategy, item, level)`.
pub const LATEST_DIMS: &str = "__latest__";

/// Identifies one check-result stream.
#[derive(Debug, Clone)]
pub struct SeriesKey {
    pub strategy_id: i64,
    pub item_id: i64,
    pub dimensions: BTreeMap<String, String>,
    pub level: u8,
}

impl SeriesKey {
    pub fn dims_hash(&self) -> String {
        dims_hash(&self.dimensions)
    }

    /// `"<strategy>.<item>.<dims_hash>.<level>"`
    pub fn key(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.strategy_id,
            self.item_id,
            self.dims_hash(),
            self.level
        )
    }

    fn latest_key(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.strategy_id, self.item_id, LATEST_DIMS, self.level
        )
    }
}

/// A known dimension set under one `(strategy, item, level)`, with the
/// timestamp of its most recent point. The no-data detector diffs these
/// against the expected target set.
#[derive(Debug, Clone)]
pub struct SeriesInfo {
    pub dimensions: BTreeMap<String, String>,
    pub last_ts: i64,
}

/// Per-series sorted stream of `(ts, label)` points where the label is a
/// numeric value or the `ANOMALY` sentinel. Writes also maintain the
/// last-checkpoint table (including the `__latest__` entry) and trim past
/// retention opportunistically.
pub struct CheckResultStore {
    db: Arc<Db>,
}

impl CheckResultStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Appends one evaluated point. Idempotent per `(series, ts)`: a
    /// replay overwrites with the same label. Points older than
    /// `ts - retention_secs` are trimmed in the same transaction, but the
    /// newest `keep_points` always survive so a sparse series never loses
    /// its trigger/recovery window.
    pub fn append(
        &self,
        key: &SeriesKey,
        ts: i64,
        label: CheckLabel,
        retention_secs: i64,
        keep_points: u32,
    ) -> Result<()> {
        let series_key = key.key();
        let latest_key = key.latest_key();
        let dims_json = serde_json::to_string(&key.dimensions)?;
        self.db.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO check_results (series_key, ts, label) VALUES (?1, ?2, ?3)",
                )?;
                stmt.execute(rusqlite::params![&series_key, ts, label.to_string()])?;

                let mut stmt = tx.prepare_cached(
                    "INSERT INTO series (series_key, strategy_id, item_id, level, dims_hash, dims_json, last_ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(series_key) DO UPDATE SET last_ts = MAX(last_ts, excluded.last_ts)",
                )?;
                stmt.execute(rusqlite::params![
                    &series_key,
                    key.strategy_id,
                    key.item_id,
                    key.level,
                    key.dims_hash(),
                    dims_json,
                    ts,
                ])?;

                let mut stmt = tx.prepare_cached(
                    "INSERT INTO checkpoints (scope_key, ts) VALUES (?1, ?2)
                     ON CONFLICT(scope_key) DO UPDATE SET ts = MAX(ts, excluded.ts)",
                )?;
                stmt.execute(rusqlite::params![&series_key, ts])?;
                stmt.execute(rusqlite::params![&latest_key, ts])?;

                // the subquery is NULL with fewer than keep_points rows,
                // which makes the predicate false and deletes nothing
                let mut stmt = tx.prepare_cached(
                    "DELETE FROM check_results WHERE series_key = ?1 AND ts < ?2
                       AND ts < (SELECT ts FROM check_results WHERE series_key = ?1
                                 ORDER BY ts DESC LIMIT 1 OFFSET ?3)",
                )?;
                stmt.execute(rusqlite::params![
                    &series_key,
                    ts - retention_secs,
                    keep_points.max(1) - 1,
                ])?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Points in `[from_ts, to_ts]` inclusive, oldest first. An empty
    /// result means "no data", not recovery.
    pub fn range(&self, key: &SeriesKey, from_ts: i64, to_ts: i64) -> Result<Vec<(i64, CheckLabel)>> {
        let series_key = key.key();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT ts, label FROM check_results
                 WHERE series_key = ?1 AND ts >= ?2 AND ts <= ?3 ORDER BY ts ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![&series_key, from_ts, to_ts], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            collect_points(rows)
        })
    }

    /// The last `n` points with `ts <= upto_ts`, oldest first. This is
    /// the trigger/recovery window read: windows are point-counted, not
    /// wall-time sized.
    pub fn recent_points(&self, key: &SeriesKey, upto_ts: i64, n: u32) -> Result<Vec<(i64, CheckLabel)>> {
        let series_key = key.key();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT ts, label FROM (
                     SELECT ts, label FROM check_results
                     WHERE series_key = ?1 AND ts <= ?2 ORDER BY ts DESC LIMIT ?3
                 ) ORDER BY ts ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![&series_key, upto_ts, n], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            collect_points(rows)
        })
    }

    /// Explicit trim, also available outside the append path. Honors the
    /// same `keep_points` floor as the append-time trim.
    pub fn trim(&self, key: &SeriesKey, older_than: i64, keep_points: u32) -> Result<usize> {
        let series_key = key.key();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "DELETE FROM check_results WHERE series_key = ?1 AND ts < ?2
                   AND ts < (SELECT ts FROM check_results WHERE series_key = ?1
                             ORDER BY ts DESC LIMIT 1 OFFSET ?3)",
            )?;
            Ok(stmt.execute(rusqlite::params![
                &series_key,
                older_than,
                keep_points.max(1) - 1,
            ])?)
        })
    }

    /// Last processed point ts for one series.
    pub fn last_checkpoint(&self, key: &SeriesKey) -> Result<Option<i64>> {
        self.checkpoint_by_key(&key.key())
    }

    /// The `__latest__` checkpoint: max ts across all dims of the scope.
    pub fn latest_checkpoint(&self, strategy_id: i64, item_id: i64, level: u8) -> Result<Option<i64>> {
        self.checkpoint_by_key(&format!("{strategy_id}.{item_id}.{LATEST_DIMS}.{level}"))
    }

    fn checkpoint_by_key(&self, scope_key: &str) -> Result<Option<i64>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT ts FROM checkpoints WHERE scope_key = ?1")?;
            let mut rows = stmt.query(rusqlite::params![scope_key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    /// All dimension sets seen under `(strategy, item, level)`.
    pub fn series_for_item(&self, strategy_id: i64, item_id: i64, level: u8) -> Result<Vec<SeriesInfo>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT dims_json, last_ts FROM series
                 WHERE strategy_id = ?1 AND item_id = ?2 AND level = ?3",
            )?;
            let rows = stmt.query_map(rusqlite::params![strategy_id, item_id, level], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (dims_json, last_ts) = row?;
                let dimensions: BTreeMap<String, String> = serde_json::from_str(&dims_json)?;
                out.push(SeriesInfo {
                    dimensions,
                    last_ts,
                });
            }
            Ok(out)
        })
    }
}

fn collect_points(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<(i64, String)>>,
) -> Result<Vec<(i64, CheckLabel)>> {
    let mut out = Vec::new();
    for row in rows {
        let (ts, label_str) = row?;
        let label = label_str
            .parse::<CheckLabel>()
            .map_err(|reason| crate::StorageError::Corrupt {
                column: "label",
                reason,
            })?;
        out.push((ts, label));
    }
    Ok(out)
}
