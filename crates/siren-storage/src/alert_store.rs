use crate::partition::{PartitionInfo, PartitionManager};
use crate::Result;
use chrono::{DateTime, Utc};
use siren_common::id::alert_id_epoch;
use siren_common::types::{Alert, AlertLogEntry, AlertStatus};
use std::path::Path;

/// Search filter over persisted alerts. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub strategy_id: Option<i64>,
    pub status: Option<AlertStatus>,
    pub severity: Option<u8>,
    pub dedupe_md5: Option<String>,
    /// Partition lookback in days; defaults to 7.
    pub lookback_days: Option<u32>,
    pub limit: Option<usize>,
}

/// Alerts and their append-only lifecycle logs, persisted to the daily
/// partition matching each alert's creation epoch. The full `Alert` goes
/// to a JSON payload column; the indexed columns exist for lookups only.
pub struct AlertStore {
    partitions: PartitionManager,
}

impl AlertStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(&data_dir.join("alerts"))?,
        })
    }

    fn partition_for(&self, alert_id: &str) -> Result<String> {
        let epoch = alert_id_epoch(alert_id).ok_or_else(|| crate::StorageError::Corrupt {
            column: "id",
            reason: format!("malformed alert id '{alert_id}'"),
        })?;
        let ts = DateTime::<Utc>::from_timestamp(epoch, 0).ok_or_else(|| {
            crate::StorageError::Corrupt {
                column: "id",
                reason: format!("alert id '{alert_id}' has out-of-range epoch"),
            }
        })?;
        self.partitions.get_or_create(ts)
    }

    /// Upserts the alert into its creation-day partition.
    pub fn save(&self, alert: &Alert) -> Result<()> {
        let key = self.partition_for(&alert.id)?;
        let payload = serde_json::to_string(alert)?;
        let now = Utc::now().timestamp();
        self.partitions.with_partition(&key, |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO alerts (id, seq_id, strategy_id, severity, status, dedupe_md5,
                                     begin_time, latest_time, end_time, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     severity = excluded.severity,
                     status = excluded.status,
                     latest_time = excluded.latest_time,
                     end_time = excluded.end_time,
                     payload = excluded.payload,
                     updated_at = excluded.updated_at",
            )?;
            stmt.execute(rusqlite::params![
                &alert.id,
                alert.seq_id,
                alert.strategy_id,
                alert.severity.level(),
                alert.status.to_string(),
                &alert.dedupe_md5,
                alert.begin_time,
                alert.latest_time,
                alert.end_time,
                &payload,
                now,
            ])?;
            Ok(())
        })
    }

    pub fn get(&self, alert_id: &str) -> Result<Alert> {
        let key = self.partition_for(alert_id)?;
        self.partitions.with_partition(&key, |conn| {
            let mut stmt = conn.prepare_cached("SELECT payload FROM alerts WHERE id = ?1")?;
            let mut rows = stmt.query(rusqlite::params![alert_id])?;
            match rows.next()? {
                Some(row) => {
                    let payload: String = row.get(0)?;
                    Ok(serde_json::from_str(&payload)?)
                }
                None => Err(crate::StorageError::NotFound {
                    entity: "alert",
                    id: alert_id.to_string(),
                }),
            }
        })
    }

    /// Batch lookup. Ids that resolve to no stored alert are skipped, so
    /// the result may be shorter than the input.
    pub fn mget(&self, alert_ids: &[String]) -> Result<Vec<Alert>> {
        let mut out = Vec::with_capacity(alert_ids.len());
        for id in alert_ids {
            match self.get(id) {
                Ok(alert) => out.push(alert),
                Err(crate::StorageError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// The open alert (ABNORMAL or RECOVERING) for a dedupe key, searching
    /// partitions newest first within the lookback window. Terminal alerts
    /// never match; a new anomaly after recovery starts a fresh alert.
    pub fn get_open_by_dedupe(&self, dedupe_md5: &str, lookback_days: u32) -> Result<Option<Alert>> {
        let horizon = (Utc::now() - chrono::Duration::days(lookback_days as i64))
            .format("%Y-%m-%d")
            .to_string();
        for key in self.partitions.existing_keys_desc()? {
            if key < horizon {
                break;
            }
            let found = self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT payload FROM alerts
                     WHERE dedupe_md5 = ?1 AND status IN ('ABNORMAL', 'RECOVERING')
                     ORDER BY id DESC LIMIT 1",
                )?;
                let mut rows = stmt.query(rusqlite::params![dedupe_md5])?;
                match rows.next()? {
                    Some(row) => {
                        let payload: String = row.get(0)?;
                        Ok(Some(serde_json::from_str::<Alert>(&payload)?))
                    }
                    None => Ok(None),
                }
            })?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    pub fn search(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let lookback = filter.lookback_days.unwrap_or(7);
        let limit = filter.limit.unwrap_or(100);
        let horizon = (Utc::now() - chrono::Duration::days(lookback as i64))
            .format("%Y-%m-%d")
            .to_string();
        let mut out: Vec<Alert> = Vec::new();
        for key in self.partitions.existing_keys_desc()? {
            if key < horizon || out.len() >= limit {
                break;
            }
            let remaining = limit - out.len();
            let mut batch = self.partitions.with_partition(&key, |conn| {
                let mut sql = String::from("SELECT payload FROM alerts WHERE 1=1");
                let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
                if let Some(sid) = filter.strategy_id {
                    sql.push_str(" AND strategy_id = ?");
                    params.push(Box::new(sid));
                }
                if let Some(status) = filter.status {
                    sql.push_str(" AND status = ?");
                    params.push(Box::new(status.to_string()));
                }
                if let Some(sev) = filter.severity {
                    sql.push_str(" AND severity = ?");
                    params.push(Box::new(sev));
                }
                if let Some(ref md5) = filter.dedupe_md5 {
                    sql.push_str(" AND dedupe_md5 = ?");
                    params.push(Box::new(md5.clone()));
                }
                sql.push_str(" ORDER BY id DESC LIMIT ?");
                params.push(Box::new(remaining as i64));

                let mut stmt = conn.prepare(&sql)?;
                let refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let rows = stmt.query_map(refs.as_slice(), |row| row.get::<_, String>(0))?;
                let mut batch = Vec::new();
                for row in rows {
                    batch.push(serde_json::from_str::<Alert>(&row?)?);
                }
                Ok(batch)
            })?;
            out.append(&mut batch);
        }
        Ok(out)
    }

    /// Appends one lifecycle log entry to the alert's partition.
    pub fn append_log(&self, entry: &AlertLogEntry) -> Result<()> {
        let key = self.partition_for(&entry.alert_id)?;
        self.partitions.with_partition(&key, |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO alert_logs (id, alert_id, op_type, create_time, description, event_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            stmt.execute(rusqlite::params![
                &entry.id,
                &entry.alert_id,
                entry.op_type.to_string(),
                entry.create_time,
                &entry.description,
                &entry.event_id,
            ])?;
            Ok(())
        })
    }

    /// Lifecycle log sorted `(create_time ASC, op_type ASC)`.
    pub fn logs(&self, alert_id: &str) -> Result<Vec<AlertLogEntry>> {
        let key = self.partition_for(alert_id)?;
        self.partitions.with_partition(&key, |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, alert_id, op_type, create_time, description, event_id
                 FROM alert_logs WHERE alert_id = ?1
                 ORDER BY create_time ASC, op_type ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![alert_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, alert_id, op_str, create_time, description, event_id) = row?;
                let op_type = op_str
                    .parse()
                    .map_err(|reason| crate::StorageError::Corrupt {
                        column: "op_type",
                        reason,
                    })?;
                out.push(AlertLogEntry {
                    id,
                    alert_id,
                    op_type,
                    create_time,
                    description,
                    event_id,
                });
            }
            Ok(out)
        })
    }

    pub fn cleanup_older_than(&self, retention_days: u32) -> Result<u32> {
        self.partitions.cleanup_older_than(retention_days)
    }

    pub fn list_partition_info(&self) -> Result<Vec<PartitionInfo>> {
        self.partitions.list_partition_info()
    }
}
