use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const ALERT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    seq_id INTEGER NOT NULL,
    strategy_id INTEGER NOT NULL,
    severity INTEGER NOT NULL,
    status TEXT NOT NULL,
    dedupe_md5 TEXT NOT NULL,
    begin_time INTEGER NOT NULL,
    latest_time INTEGER NOT NULL,
    end_time INTEGER,
    payload TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_dedupe ON alerts(dedupe_md5);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status);
CREATE INDEX IF NOT EXISTS idx_alerts_strategy ON alerts(strategy_id);
CREATE TABLE IF NOT EXISTS alert_logs (
    id TEXT PRIMARY KEY,
    alert_id TEXT NOT NULL,
    op_type TEXT NOT NULL,
    create_time INTEGER NOT NULL,
    description TEXT NOT NULL,
    event_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_alert_logs_alert ON alert_logs(alert_id, create_time);
";

/// Metadata for one on-disk partition file.
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub date: String,
    pub size_bytes: u64,
    pub path: String,
}

/// One SQLite file per UTC day, keyed `YYYY-MM-DD`, opened lazily and
/// cached. Alerts land in the partition of their creation day.
pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| crate::StorageError::Other(format!("create {data_dir:?}: {e}")))?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn partition_key(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d").to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    fn open_partition(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(ALERT_SCHEMA)?;
        Ok(conn)
    }

    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::partition_key(ts);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let conn = self.open_partition(&self.partition_path(&key))?;
            tracing::info!(partition = %key, "created alert partition");
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_partition<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let mut conns = self.lock_connections();
        if !conns.contains_key(key) {
            let path = self.partition_path(key);
            if !path.exists() {
                return Err(crate::StorageError::NotFound {
                    entity: "partition",
                    id: key.to_string(),
                });
            }
            conns.insert(key.to_string(), self.open_partition(&path)?);
        }
        let conn = conns.get(key).ok_or_else(|| crate::StorageError::NotFound {
            entity: "partition",
            id: key.to_string(),
        })?;
        f(conn)
    }

    /// Partition keys existing on disk, newest first. Dedupe lookups and
    /// searches walk this list so recent alerts are found early.
    pub fn existing_keys_desc(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let entries = std::fs::read_dir(&self.data_dir)
            .map_err(|e| crate::StorageError::Other(format!("read {:?}: {e}", self.data_dir)))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| crate::StorageError::Other(format!("read dir entry: {e}")))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if NaiveDate::parse_from_str(date_str, "%Y-%m-%d").is_ok() {
                    keys.push(date_str.to_string());
                }
            }
        }
        keys.sort_by(|a, b| b.cmp(a));
        Ok(keys)
    }

    /// Deletes partition files older than the retention horizon, WAL and
    /// SHM sidecars included. Best effort per file.
    pub fn cleanup_older_than(&self, retention_days: u32) -> Result<u32> {
        let cutoff_date = (Utc::now() - chrono::Duration::days(retention_days as i64)).date_naive();
        let mut removed = 0u32;

        let mut expired: Vec<(String, PathBuf)> = Vec::new();
        let entries = std::fs::read_dir(&self.data_dir)
            .map_err(|e| crate::StorageError::Other(format!("read {:?}: {e}", self.data_dir)))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| crate::StorageError::Other(format!("read dir entry: {e}")))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    if date < cutoff_date {
                        expired.push((date_str.to_string(), entry.path()));
                    }
                }
            }
        }

        for (date_str, db_path) in &expired {
            // Dropping the cached Connection checkpoints the WAL.
            {
                let mut conns = self.lock_connections();
                conns.remove(date_str.as_str());
            }

            if let Err(e) = std::fs::remove_file(db_path) {
                tracing::error!(partition = %date_str, error = %e, "failed to remove partition file");
                continue;
            }
            for suffix in ["-wal", "-shm"] {
                let side = self.data_dir.join(format!("{date_str}.db{suffix}"));
                if side.exists() {
                    if let Err(e) = std::fs::remove_file(&side) {
                        tracing::warn!(path = %side.display(), error = %e, "failed to remove sidecar file");
                    }
                }
            }

            tracing::info!(partition = %date_str, "removed expired alert partition");
            removed += 1;
        }

        Ok(removed)
    }

    pub fn list_partition_info(&self) -> Result<Vec<PartitionInfo>> {
        let mut infos = Vec::new();
        let entries = std::fs::read_dir(&self.data_dir)
            .map_err(|e| crate::StorageError::Other(format!("read {:?}: {e}", self.data_dir)))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| crate::StorageError::Other(format!("read dir entry: {e}")))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if NaiveDate::parse_from_str(date_str, "%Y-%m-%d").is_ok() {
                    let metadata = entry
                        .metadata()
                        .map_err(|e| crate::StorageError::Other(format!("stat {name}: {e}")))?;
                    infos.push(PartitionInfo {
                        date: date_str.to_string(),
                        size_bytes: metadata.len(),
                        path: entry.path().to_string_lossy().to_string(),
                    });
                }
            }
        }
        infos.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(infos)
    }
}
