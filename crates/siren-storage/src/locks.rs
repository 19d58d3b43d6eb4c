use crate::db::Db;
use crate::Result;
use std::sync::Arc;

/// Advisory locks with a TTL, used to serialize per-strategy detect work
/// and singleton maintenance loops across workers. Re-acquiring a lock
/// you already hold extends it.
pub struct LockStore {
    db: Arc<Db>,
}

impl LockStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Tries to take `name` for `holder` until now + ttl. Succeeds when
    /// the lock is free, expired, or already held by this holder.
    pub fn acquire(&self, name: &str, holder: &str, ttl_secs: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO advisory_locks (name, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                     holder = excluded.holder,
                     expires_at = excluded.expires_at
                 WHERE advisory_locks.expires_at < ?4 OR advisory_locks.holder = excluded.holder",
            )?;
            let changed = stmt.execute(rusqlite::params![name, holder, now + ttl_secs, now])?;
            Ok(changed > 0)
        })
    }

    /// Releases only if still held by `holder`; a lock taken over after
    /// expiry stays with its new owner.
    pub fn release(&self, name: &str, holder: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("DELETE FROM advisory_locks WHERE name = ?1 AND holder = ?2")?;
            stmt.execute(rusqlite::params![name, holder])?;
            Ok(())
        })
    }

    /// Drops rows whose TTL has passed. Acquire already treats expired
    /// rows as free; this only keeps the table from accumulating one row
    /// per dedupe key forever.
    pub fn sweep_expired(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("DELETE FROM advisory_locks WHERE expires_at < ?1")?;
            Ok(stmt.execute(rusqlite::params![now])?)
        })
    }

    pub fn holder(&self, name: &str) -> Result<Option<String>> {
        let now = chrono::Utc::now().timestamp();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT holder FROM advisory_locks WHERE name = ?1 AND expires_at >= ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![name, now])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }
}
