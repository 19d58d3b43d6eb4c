use crate::db::Db;
use crate::Result;
use std::sync::Arc;

/// Snapshot TTL. An open alert refreshes the snapshot it references on
/// every merge, so only snapshots with no live readers expire.
pub const SNAPSHOT_TTL_SECS: i64 = 3600;

/// Immutable strategy payloads keyed by `md5(strategy_id|update_time)`.
/// Anomalies carry the key so trigger and action stages evaluate against
/// the exact config the point was detected with, not the current one.
pub struct SnapshotStore {
    db: Arc<Db>,
}

impl SnapshotStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Stores a snapshot if absent. Writing the same key twice is a
    /// no-op; snapshots are immutable once written.
    pub fn put(&self, key: &str, strategy_id: i64, update_time: i64, payload: &str) -> Result<()> {
        let expires_at = chrono::Utc::now().timestamp() + SNAPSHOT_TTL_SECS;
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO snapshots (key, strategy_id, update_time, payload, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            stmt.execute(rusqlite::params![key, strategy_id, update_time, payload, expires_at])?;
            Ok(())
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let now = chrono::Utc::now().timestamp();
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("SELECT payload FROM snapshots WHERE key = ?1 AND expires_at >= ?2")?;
            let mut rows = stmt.query(rusqlite::params![key, now])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    /// Pushes the expiry forward. Called whenever an open alert merges a
    /// new anomaly referencing this snapshot.
    pub fn touch(&self, key: &str) -> Result<()> {
        let expires_at = chrono::Utc::now().timestamp() + SNAPSHOT_TTL_SECS;
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("UPDATE snapshots SET expires_at = ?1 WHERE key = ?2")?;
            stmt.execute(rusqlite::params![expires_at, key])?;
            Ok(())
        })
    }

    /// Deletes expired snapshots. Run from the maintenance loop.
    pub fn sweep(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("DELETE FROM snapshots WHERE expires_at < ?1")?;
            Ok(stmt.execute(rusqlite::params![now])?)
        })
    }
}
