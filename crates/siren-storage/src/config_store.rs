use crate::db::Db;
use crate::Result;
use std::sync::Arc;

/// An assignment group row. `rules_json` is the serialized rule list;
/// the assignment engine owns its shape.
#[derive(Debug, Clone)]
pub struct AssignGroupRow {
    pub id: i64,
    pub biz_id: i64,
    pub priority: i64,
    pub name: String,
    pub source: String,
    pub rules_json: String,
}

/// An action config row. `template_detail` is the plugin-specific
/// template payload rendered at execution time.
#[derive(Debug, Clone)]
pub struct ActionConfigRow {
    pub id: i64,
    pub plugin_id: String,
    pub name: String,
    pub biz_id: i64,
    pub timeout_secs: i64,
    pub template_detail: String,
}

/// A calendar row. `items_json` is the serialized item list; the
/// strategy crate owns its shape.
#[derive(Debug, Clone)]
pub struct CalendarRow {
    pub id: i64,
    pub kind: String,
    pub items_json: String,
}

/// Assignment groups, action configs and calendars on the core database.
/// These change rarely and are read on the hot path, so callers cache.
pub struct ConfigStore {
    db: Arc<Db>,
}

impl ConfigStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn upsert_assign_group(&self, group: &AssignGroupRow) -> Result<()> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO assign_groups (id, biz_id, priority, name, source, rules_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     biz_id = excluded.biz_id,
                     priority = excluded.priority,
                     name = excluded.name,
                     source = excluded.source,
                     rules_json = excluded.rules_json",
            )?;
            stmt.execute(rusqlite::params![
                group.id,
                group.biz_id,
                group.priority,
                &group.name,
                &group.source,
                &group.rules_json,
            ])?;
            Ok(())
        })
    }

    /// Groups for one business, highest priority first, id ascending as
    /// the tie-break.
    pub fn assign_groups(&self, biz_id: i64) -> Result<Vec<AssignGroupRow>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, biz_id, priority, name, source, rules_json FROM assign_groups
                 WHERE biz_id = ?1 ORDER BY priority DESC, id ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![biz_id], |row| {
                Ok(AssignGroupRow {
                    id: row.get(0)?,
                    biz_id: row.get(1)?,
                    priority: row.get(2)?,
                    name: row.get(3)?,
                    source: row.get(4)?,
                    rules_json: row.get(5)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn upsert_action_config(&self, config: &ActionConfigRow) -> Result<()> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO action_configs (id, plugin_id, name, biz_id, timeout_secs, template_detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     plugin_id = excluded.plugin_id,
                     name = excluded.name,
                     biz_id = excluded.biz_id,
                     timeout_secs = excluded.timeout_secs,
                     template_detail = excluded.template_detail",
            )?;
            stmt.execute(rusqlite::params![
                config.id,
                &config.plugin_id,
                &config.name,
                config.biz_id,
                config.timeout_secs,
                &config.template_detail,
            ])?;
            Ok(())
        })
    }

    pub fn action_config(&self, id: i64) -> Result<ActionConfigRow> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, plugin_id, name, biz_id, timeout_secs, template_detail
                 FROM action_configs WHERE id = ?1",
            )?;
            let mut rows = stmt.query(rusqlite::params![id])?;
            match rows.next()? {
                Some(row) => Ok(ActionConfigRow {
                    id: row.get(0)?,
                    plugin_id: row.get(1)?,
                    name: row.get(2)?,
                    biz_id: row.get(3)?,
                    timeout_secs: row.get(4)?,
                    template_detail: row.get(5)?,
                }),
                None => Err(crate::StorageError::NotFound {
                    entity: "action_config",
                    id: id.to_string(),
                }),
            }
        })
    }

    pub fn list_action_configs(&self) -> Result<Vec<ActionConfigRow>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, plugin_id, name, biz_id, timeout_secs, template_detail
                 FROM action_configs ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ActionConfigRow {
                    id: row.get(0)?,
                    plugin_id: row.get(1)?,
                    name: row.get(2)?,
                    biz_id: row.get(3)?,
                    timeout_secs: row.get(4)?,
                    template_detail: row.get(5)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn upsert_calendar(&self, calendar: &CalendarRow) -> Result<()> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO calendars (id, kind, items_json) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     kind = excluded.kind,
                     items_json = excluded.items_json",
            )?;
            stmt.execute(rusqlite::params![calendar.id, &calendar.kind, &calendar.items_json])?;
            Ok(())
        })
    }

    pub fn calendars(&self) -> Result<Vec<CalendarRow>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT id, kind, items_json FROM calendars ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok(CalendarRow {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    items_json: row.get(2)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }
}
