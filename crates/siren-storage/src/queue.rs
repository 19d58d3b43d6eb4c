use crate::db::Db;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Queue names used across the pipeline.
pub const QUEUE_RAW: &str = "access.raw";
pub const QUEUE_DETECT: &str = "detect.data";
pub const QUEUE_ANOMALY: &str = "trigger.anomaly";
pub const QUEUE_ACTION: &str = "action.task";
/// Structured drop events for operators; nothing in the pipeline
/// consumes this queue.
pub const QUEUE_ERRORS: &str = "errors";

/// A leased queue item. Ack within the lease or the item becomes
/// visible to other workers again.
#[derive(Debug, Clone)]
pub struct Leased {
    pub id: i64,
    pub payload: String,
}

impl Leased {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// A delayed task waiting for its score (epoch seconds) to come due.
/// On dispatch the envelope `{"cmd": ..., "values": ...}` moves to the
/// target queue atomically.
#[derive(Debug, Clone)]
pub struct DelayedTask {
    pub task_id: String,
    pub cmd: String,
    pub queue: String,
    pub values_json: String,
    pub score: i64,
}

/// Named FIFO queues plus the delayed-task index, all on the core
/// database so a crash between stages never drops work.
pub struct QueueStore {
    db: Arc<Db>,
}

impl QueueStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn push<T: Serialize>(&self, queue: &str, item: &T) -> Result<i64> {
        let payload = serde_json::to_string(item)?;
        self.push_raw(queue, &payload)
    }

    pub fn push_raw(&self, queue: &str, payload: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO queue_items (queue, payload, enqueued_at) VALUES (?1, ?2, ?3)",
            )?;
            stmt.execute(rusqlite::params![queue, payload, now])?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Leases up to `n` items in FIFO order. Items already leased and not
    /// yet expired are skipped.
    pub fn lease(&self, queue: &str, n: u32, lease_secs: i64) -> Result<Vec<Leased>> {
        let now = chrono::Utc::now().timestamp();
        self.db.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let items = {
                let mut stmt = tx.prepare_cached(
                    "SELECT id, payload FROM queue_items
                     WHERE queue = ?1 AND (leased_until IS NULL OR leased_until < ?2)
                     ORDER BY id ASC LIMIT ?3",
                )?;
                let rows = stmt.query_map(rusqlite::params![queue, now, n], |row| {
                    Ok(Leased {
                        id: row.get(0)?,
                        payload: row.get(1)?,
                    })
                })?;
                let mut items = Vec::new();
                for row in rows {
                    items.push(row?);
                }
                let mut mark = tx.prepare_cached(
                    "UPDATE queue_items SET leased_until = ?1 WHERE id = ?2",
                )?;
                for item in &items {
                    mark.execute(rusqlite::params![now + lease_secs, item.id])?;
                }
                items
            };
            tx.commit()?;
            Ok(items)
        })
    }

    /// Removes a processed item. Acking an already-removed id is a no-op.
    pub fn ack(&self, id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("DELETE FROM queue_items WHERE id = ?1")?;
            stmt.execute(rusqlite::params![id])?;
            Ok(())
        })
    }

    /// Returns a leased item to the queue immediately, for transient
    /// failures where waiting out the lease would add latency.
    pub fn release(&self, id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("UPDATE queue_items SET leased_until = NULL WHERE id = ?1")?;
            stmt.execute(rusqlite::params![id])?;
            Ok(())
        })
    }

    pub fn len(&self, queue: &str) -> Result<u64> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT COUNT(*) FROM queue_items WHERE queue = ?1")?;
            let n: i64 = stmt.query_row(rusqlite::params![queue], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    /// Schedules (or reschedules) a delayed task. The task_id is the
    /// dedupe handle: pushing again replaces cmd, payload and due time.
    pub fn push_delayed(&self, task: &DelayedTask) -> Result<()> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO delayed_tasks (task_id, cmd, queue, values_json, score)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(task_id) DO UPDATE SET
                     cmd = excluded.cmd,
                     queue = excluded.queue,
                     values_json = excluded.values_json,
                     score = excluded.score",
            )?;
            stmt.execute(rusqlite::params![
                &task.task_id,
                &task.cmd,
                &task.queue,
                &task.values_json,
                task.score,
            ])?;
            Ok(())
        })
    }

    /// Drops a pending delayed task. Returns false when the task already
    /// fired or was never scheduled.
    pub fn cancel_delayed(&self, task_id: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("DELETE FROM delayed_tasks WHERE task_id = ?1")?;
            Ok(stmt.execute(rusqlite::params![task_id])? > 0)
        })
    }

    pub fn delayed_task(&self, task_id: &str) -> Result<Option<DelayedTask>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT task_id, cmd, queue, values_json, score FROM delayed_tasks WHERE task_id = ?1",
            )?;
            let mut rows = stmt.query(rusqlite::params![task_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(DelayedTask {
                    task_id: row.get(0)?,
                    cmd: row.get(1)?,
                    queue: row.get(2)?,
                    values_json: row.get(3)?,
                    score: row.get(4)?,
                })),
                None => Ok(None),
            }
        })
    }

    /// Moves every task due at `now` onto its target queue, in score
    /// order, wrapped in a `{"cmd", "values"}` envelope. The move is one
    /// transaction per sweep: a task is either pending or enqueued, never
    /// both and never neither.
    pub fn dispatch_due(&self, now: i64) -> Result<u32> {
        self.db.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let moved = {
                let mut stmt = tx.prepare_cached(
                    "SELECT task_id, cmd, queue, values_json FROM delayed_tasks
                     WHERE score <= ?1 ORDER BY score ASC",
                )?;
                let rows = stmt.query_map(rusqlite::params![now], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?;
                let mut due = Vec::new();
                for row in rows {
                    due.push(row?);
                }

                let mut push = tx.prepare_cached(
                    "INSERT INTO queue_items (queue, payload, enqueued_at) VALUES (?1, ?2, ?3)",
                )?;
                let mut drop_task =
                    tx.prepare_cached("DELETE FROM delayed_tasks WHERE task_id = ?1")?;
                for (task_id, cmd, queue, values_json) in &due {
                    let values: serde_json::Value = serde_json::from_str(values_json)?;
                    let envelope = serde_json::json!({ "cmd": cmd, "values": values });
                    push.execute(rusqlite::params![queue, envelope.to_string(), now])?;
                    drop_task.execute(rusqlite::params![task_id])?;
                }
                due.len() as u32
            };
            tx.commit()?;
            Ok(moved)
        })
    }
}
