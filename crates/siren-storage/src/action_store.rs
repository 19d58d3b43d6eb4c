use crate::db::Db;
use crate::Result;
use siren_common::types::ActionStatus;
use std::sync::Arc;

/// One persisted action execution. `next_function` names the phase the
/// processor resumes at; `inputs`/`outputs`/`kwargs` are JSON payloads
/// owned by the plugin.
#[derive(Debug, Clone)]
pub struct ActionInstance {
    pub id: String,
    pub signal: String,
    pub config_id: i64,
    pub plugin: String,
    pub status: ActionStatus,
    pub next_function: Option<String>,
    pub retry_count: u32,
    pub inputs: String,
    pub outputs: String,
    pub kwargs: String,
    pub message: String,
    pub bk_biz_id: i64,
    pub alerts: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ActionInstance {
    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}

/// Action instances on the core database. The processor treats this as
/// the source of truth for resume-after-crash and the already-finished
/// guard.
pub struct ActionStore {
    db: Arc<Db>,
}

impl ActionStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn save(&self, inst: &ActionInstance) -> Result<()> {
        let alerts_json = serde_json::to_string(&inst.alerts)?;
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO action_instances
                     (id, signal, config_id, plugin, status, next_function, retry_count,
                      inputs, outputs, kwargs, message, bk_biz_id, alerts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     next_function = excluded.next_function,
                     retry_count = excluded.retry_count,
                     inputs = excluded.inputs,
                     outputs = excluded.outputs,
                     kwargs = excluded.kwargs,
                     message = excluded.message,
                     updated_at = excluded.updated_at",
            )?;
            stmt.execute(rusqlite::params![
                &inst.id,
                &inst.signal,
                inst.config_id,
                &inst.plugin,
                inst.status.to_string(),
                &inst.next_function,
                inst.retry_count,
                &inst.inputs,
                &inst.outputs,
                &inst.kwargs,
                &inst.message,
                inst.bk_biz_id,
                &alerts_json,
                inst.created_at,
                inst.updated_at,
            ])?;
            Ok(())
        })
    }

    pub fn get(&self, id: &str) -> Result<ActionInstance> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, signal, config_id, plugin, status, next_function, retry_count,
                        inputs, outputs, kwargs, message, bk_biz_id, alerts, created_at, updated_at
                 FROM action_instances WHERE id = ?1",
            )?;
            let mut rows = stmt.query(rusqlite::params![id])?;
            match rows.next()? {
                Some(row) => read_instance(row),
                None => Err(crate::StorageError::NotFound {
                    entity: "action_instance",
                    id: id.to_string(),
                }),
            }
        })
    }

    /// Instances in a given status, oldest first. Startup recovery
    /// re-enqueues RUNNING and SLEEP instances from here.
    pub fn list_by_status(&self, status: ActionStatus) -> Result<Vec<ActionInstance>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, signal, config_id, plugin, status, next_function, retry_count,
                        inputs, outputs, kwargs, message, bk_biz_id, alerts, created_at, updated_at
                 FROM action_instances WHERE status = ?1 ORDER BY created_at ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![status.to_string()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(read_instance(row)?);
            }
            Ok(out)
        })
    }

    /// Removes finished instances older than the horizon.
    pub fn cleanup_finished(&self, older_than: i64) -> Result<usize> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "DELETE FROM action_instances
                 WHERE status IN ('SUCCESS', 'FAILURE', 'SKIPPED') AND updated_at < ?1",
            )?;
            Ok(stmt.execute(rusqlite::params![older_than])?)
        })
    }
}

fn read_instance(row: &rusqlite::Row<'_>) -> Result<ActionInstance> {
    let status_str: String = row.get(4)?;
    let status = status_str
        .parse()
        .map_err(|reason| crate::StorageError::Corrupt {
            column: "status",
            reason,
        })?;
    let alerts_json: String = row.get(12)?;
    Ok(ActionInstance {
        id: row.get(0)?,
        signal: row.get(1)?,
        config_id: row.get(2)?,
        plugin: row.get(3)?,
        status,
        next_function: row.get(5)?,
        retry_count: row.get(6)?,
        inputs: row.get(7)?,
        outputs: row.get(8)?,
        kwargs: row.get(9)?,
        message: row.get(10)?,
        bk_biz_id: row.get(11)?,
        alerts: serde_json::from_str(&alerts_json)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}
