use crate::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const CORE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS check_results (
    series_key TEXT NOT NULL,
    ts INTEGER NOT NULL,
    label TEXT NOT NULL,
    PRIMARY KEY (series_key, ts)
);
CREATE TABLE IF NOT EXISTS series (
    series_key TEXT PRIMARY KEY,
    strategy_id INTEGER NOT NULL,
    item_id INTEGER NOT NULL,
    level INTEGER NOT NULL,
    dims_hash TEXT NOT NULL,
    dims_json TEXT NOT NULL,
    last_ts INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_series_item ON series(strategy_id, item_id, level);
CREATE TABLE IF NOT EXISTS checkpoints (
    scope_key TEXT PRIMARY KEY,
    ts INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY,
    strategy_id INTEGER NOT NULL,
    update_time INTEGER NOT NULL,
    payload TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS queue_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    leased_until INTEGER
);
CREATE INDEX IF NOT EXISTS idx_queue_items_queue ON queue_items(queue, id);
CREATE TABLE IF NOT EXISTS delayed_tasks (
    task_id TEXT PRIMARY KEY,
    cmd TEXT NOT NULL,
    queue TEXT NOT NULL,
    values_json TEXT NOT NULL,
    score INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_delayed_tasks_score ON delayed_tasks(score);
CREATE TABLE IF NOT EXISTS advisory_locks (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS action_instances (
    id TEXT PRIMARY KEY,
    signal TEXT NOT NULL,
    config_id INTEGER NOT NULL,
    plugin TEXT NOT NULL,
    status TEXT NOT NULL,
    next_function TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    inputs TEXT NOT NULL DEFAULT '{}',
    outputs TEXT NOT NULL DEFAULT '{}',
    kwargs TEXT NOT NULL DEFAULT '{}',
    message TEXT NOT NULL DEFAULT '',
    bk_biz_id INTEGER NOT NULL,
    alerts TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_action_instances_status ON action_instances(status);
CREATE TABLE IF NOT EXISTS assign_groups (
    id INTEGER PRIMARY KEY,
    biz_id INTEGER NOT NULL,
    priority INTEGER NOT NULL,
    name TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    rules_json TEXT NOT NULL DEFAULT '[]'
);
CREATE TABLE IF NOT EXISTS action_configs (
    id INTEGER PRIMARY KEY,
    plugin_id TEXT NOT NULL,
    name TEXT NOT NULL,
    biz_id INTEGER NOT NULL,
    timeout_secs INTEGER NOT NULL DEFAULT 30,
    template_detail TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE IF NOT EXISTS calendars (
    id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    items_json TEXT NOT NULL DEFAULT '[]'
);
";

/// A single SQLite database behind a mutex, WAL mode, schema applied on
/// open. All non-partitioned stores share one of these.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| crate::StorageError::Other(format!("create {dir:?}: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(CORE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CORE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.lock();
        f(&conn)
    }

    pub fn with_conn_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut conn = self.lock();
        f(&mut conn)
    }
}
