use siren_common::dims::dedupe_md5;
use siren_common::error::{PipelineError, Result};
use siren_common::id::{alert_id, next_id};
use siren_common::types::{
    Alert, AlertLogEntry, AlertLogOp, AlertStatus, AnomalyRecord, CheckLabel, Severity,
};
use siren_storage::alert_store::AlertStore;
use siren_storage::check_result::{CheckResultStore, SeriesKey};
use siren_storage::locks::LockStore;
use siren_storage::queue::{DelayedTask, QueueStore};
use siren_storage::snapshot::SnapshotStore;
use siren_strategy::model::{StatusSetter, Strategy};
use std::sync::Arc;

/// Queue the delay dispatcher feeds trigger commands into.
pub const QUEUE_TRIGGER_DELAYED: &str = "trigger.delayed";

/// How long a per-alert dedupe lock is held.
const DEDUPE_LOCK_TTL_SECS: i64 = 30;

/// How far back the dedupe lookup walks the daily partitions.
const DEDUPE_LOOKBACK_DAYS: u32 = 7;

/// A state transition produced by the evaluator, handed to the caller for
/// assignment and action fan-out.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    Opened(Alert),
    Converged(Alert),
    SeverityUp(Alert),
    RecoveringStarted(Alert),
    RecoverAborted(Alert),
    Recovered(Alert),
    Closed(Alert),
}

impl TriggerEvent {
    pub fn alert(&self) -> &Alert {
        match self {
            TriggerEvent::Opened(a)
            | TriggerEvent::Converged(a)
            | TriggerEvent::SeverityUp(a)
            | TriggerEvent::RecoveringStarted(a)
            | TriggerEvent::RecoverAborted(a)
            | TriggerEvent::Recovered(a)
            | TriggerEvent::Closed(a) => a,
        }
    }
}

/// The trigger/recovery evaluator. Owns every alert state transition;
/// transitions on the same dedupe key are serialised by the per-alert
/// advisory lock.
pub struct TriggerStage {
    alerts: Arc<AlertStore>,
    check_results: Arc<CheckResultStore>,
    snapshots: Arc<SnapshotStore>,
    queue: Arc<QueueStore>,
    locks: Arc<LockStore>,
    worker_id: String,
}

impl TriggerStage {
    pub fn new(
        alerts: Arc<AlertStore>,
        check_results: Arc<CheckResultStore>,
        snapshots: Arc<SnapshotStore>,
        queue: Arc<QueueStore>,
        locks: Arc<LockStore>,
        worker_id: String,
    ) -> Self {
        Self {
            alerts,
            check_results,
            snapshots,
            queue,
            locks,
            worker_id,
        }
    }

    fn with_dedupe_lock<F, R>(&self, dedupe: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        let lock_name = format!("alert.{dedupe}");
        if !self
            .locks
            .acquire(&lock_name, &self.worker_id, DEDUPE_LOCK_TTL_SECS)?
        {
            return Err(PipelineError::Transient(format!(
                "dedupe key {dedupe} is locked"
            )));
        }
        let result = f();
        self.locks.release(&lock_name, &self.worker_id)?;
        result
    }

    fn append_log(
        &self,
        alert_id: &str,
        op: AlertLogOp,
        description: String,
        event_id: Option<String>,
    ) -> Result<()> {
        self.alerts.append_log(&AlertLogEntry {
            id: next_id(),
            alert_id: alert_id.to_string(),
            op_type: op,
            create_time: chrono::Utc::now().timestamp(),
            description,
            event_id,
        })?;
        Ok(())
    }

    /// Applies one anomaly record to the state machine. One event per
    /// affected level is returned; levels whose trigger window is not yet
    /// satisfied produce nothing.
    pub fn handle_anomaly(
        &self,
        strategy: &Strategy,
        record: &AnomalyRecord,
    ) -> Result<Vec<TriggerEvent>> {
        if strategy.item(record.data.item_id).is_none() {
            return Err(PipelineError::StrategyItemNotFound {
                strategy_id: strategy.id,
                item_id: record.data.item_id,
            });
        }
        let dedupe = dedupe_md5(strategy.id, record.data.item_id, &record.data.dimensions);
        self.with_dedupe_lock(&dedupe, || {
            let mut events = Vec::new();
            for (&level, info) in &record.anomaly {
                let severity = Severity::try_from(level).map_err(|reason| {
                    PipelineError::Validation {
                        entity: "anomaly",
                        reason,
                    }
                })?;
                let Some(detect) = strategy.detect_for_level(severity) else {
                    tracing::warn!(
                        strategy_id = strategy.id,
                        level,
                        "anomaly for level without detect config, dropped"
                    );
                    continue;
                };

                match self.alerts.get_open_by_dedupe(&dedupe, DEDUPE_LOOKBACK_DAYS)? {
                    None => {
                        let key = SeriesKey {
                            strategy_id: strategy.id,
                            item_id: record.data.item_id,
                            dimensions: record.data.dimensions.clone(),
                            level,
                        };
                        let window = self.check_results.recent_points(
                            &key,
                            record.data.time,
                            detect.trigger_config.check_window,
                        )?;
                        let anomaly_ts: Vec<i64> = window
                            .iter()
                            .filter(|(_, l)| l.is_anomaly())
                            .map(|(ts, _)| *ts)
                            .collect();
                        if (anomaly_ts.len() as u32) < detect.trigger_config.count {
                            continue;
                        }
                        let alert =
                            self.open_alert(strategy, record, severity, &dedupe, &anomaly_ts)?;
                        events.push(TriggerEvent::Opened(alert));
                    }
                    Some(mut alert) => {
                        // idempotence on record_id: a replayed anomaly
                        // never converges twice, even with other records
                        // merged in between, so dedupe against the
                        // persisted log rather than the latest event
                        let replayed = self
                            .alerts
                            .logs(&alert.id)?
                            .iter()
                            .any(|l| l.event_id.as_deref() == Some(record.record_id.as_str()));
                        if replayed {
                            continue;
                        }
                        let event = match alert.status {
                            AlertStatus::Recovering => {
                                self.abort_recover(&mut alert, record, info.anomaly_time)?
                            }
                            AlertStatus::Abnormal => {
                                self.converge(&mut alert, record, severity, info.anomaly_time)?
                            }
                            // terminal states cannot hold the dedupe slot
                            AlertStatus::Recovered | AlertStatus::Closed => {
                                continue;
                            }
                        };
                        events.push(event);
                    }
                }
            }
            Ok(events)
        })
    }

    fn open_alert(
        &self,
        strategy: &Strategy,
        record: &AnomalyRecord,
        severity: Severity,
        dedupe: &str,
        anomaly_ts: &[i64],
    ) -> Result<Alert> {
        let now = chrono::Utc::now().timestamp();
        let first_anomaly_time = anomaly_ts.iter().copied().min().unwrap_or(record.data.time);
        let mut alert = Alert {
            id: alert_id(now),
            seq_id: next_id().parse().unwrap_or(now),
            strategy_id: strategy.id,
            alert_name: strategy.name.clone(),
            severity,
            status: AlertStatus::Abnormal,
            begin_time: first_anomaly_time,
            latest_time: record.data.time,
            end_time: None,
            first_anomaly_time,
            dimensions: record.data.dimensions.clone(),
            dedupe_md5: dedupe.to_string(),
            event: Some(record.clone()),
            assignee: Vec::new(),
            appointee: Vec::new(),
            supervisor: Vec::new(),
            follower: Vec::new(),
            is_ack: false,
            is_ack_noticed: false,
            is_shielded: false,
            is_blocked: false,
            is_handled: false,
            handle_stage: Vec::new(),
            labels: strategy.labels.clone(),
            extra_info: Default::default(),
            next_status: None,
            next_status_time: None,
        };
        alert.extra_info.strategy_snapshot_key = record.strategy_snapshot_key.clone();
        self.alerts.save(&alert)?;
        self.snapshots.touch(&record.strategy_snapshot_key)?;
        self.append_log(
            &alert.id,
            AlertLogOp::Create,
            format!("alert created at severity {severity}"),
            Some(record.record_id.clone()),
        )?;
        tracing::info!(alert_id = %alert.id, strategy_id = strategy.id, "alert opened");
        Ok(alert)
    }

    fn converge(
        &self,
        alert: &mut Alert,
        record: &AnomalyRecord,
        severity: Severity,
        anomaly_time: i64,
    ) -> Result<TriggerEvent> {
        alert.latest_time = alert.latest_time.max(anomaly_time);
        alert.event = Some(record.clone());
        let upgraded = severity.is_worse_than(alert.severity);
        if upgraded {
            let old = alert.severity;
            alert.severity = severity;
            self.append_log(
                &alert.id,
                AlertLogOp::SeverityUp,
                format!("severity raised from {old} to {severity}"),
                Some(record.record_id.clone()),
            )?;
        } else {
            self.append_log(
                &alert.id,
                AlertLogOp::Converge,
                "anomaly merged into open alert".to_string(),
                Some(record.record_id.clone()),
            )?;
        }
        self.alerts.save(alert)?;
        self.snapshots.touch(&record.strategy_snapshot_key)?;
        Ok(if upgraded {
            TriggerEvent::SeverityUp(alert.clone())
        } else {
            TriggerEvent::Converged(alert.clone())
        })
    }

    fn abort_recover(
        &self,
        alert: &mut Alert,
        record: &AnomalyRecord,
        anomaly_time: i64,
    ) -> Result<TriggerEvent> {
        alert.status = AlertStatus::Abnormal;
        alert.extra_info.is_recovering = false;
        alert.next_status = None;
        alert.next_status_time = None;
        alert.latest_time = alert.latest_time.max(anomaly_time);
        alert.event = Some(record.clone());
        self.queue.cancel_delayed(&recover_task_id(&alert.id))?;
        self.alerts.save(alert)?;
        self.append_log(
            &alert.id,
            AlertLogOp::AbortRecover,
            "new anomaly aborted pending recovery".to_string(),
            Some(record.record_id.clone()),
        )?;
        Ok(TriggerEvent::RecoverAborted(alert.clone()))
    }

    /// Recovery and system-close evaluation for one open alert. Called
    /// from the periodic scan; normal points never travel the anomaly
    /// queue, so this is where ABNORMAL alerts wind down.
    pub fn scan_open_alert(
        &self,
        strategy: &Strategy,
        alert: &Alert,
        system_close_secs: i64,
    ) -> Result<Option<TriggerEvent>> {
        let dedupe = alert.dedupe_md5.clone();
        self.with_dedupe_lock(&dedupe, || {
            // reload under the lock
            let mut alert = self.alerts.get(&alert.id)?;
            let now = chrono::Utc::now().timestamp();

            match alert.status {
                AlertStatus::Recovering => {
                    if alert.next_status_time.map(|t| now >= t).unwrap_or(false) {
                        return self.finish(
                            &mut alert,
                            AlertStatus::Recovered,
                            AlertLogOp::SystemRecover,
                            "recovery grace period elapsed".to_string(),
                        );
                    }
                    Ok(None)
                }
                AlertStatus::Abnormal => {
                    if now - alert.latest_time >= system_close_secs {
                        return self.finish(
                            &mut alert,
                            AlertStatus::Closed,
                            AlertLogOp::SystemClose,
                            format!("no new event for {system_close_secs}s"),
                        );
                    }
                    let Some(detect) = strategy.detect_for_level(alert.severity) else {
                        return Ok(None);
                    };
                    let key = SeriesKey {
                        strategy_id: alert.strategy_id,
                        item_id: alert
                            .event
                            .as_ref()
                            .map(|e| e.data.item_id)
                            .unwrap_or_default(),
                        dimensions: alert.dimensions.clone(),
                        level: alert.severity.level(),
                    };
                    let window = self.check_results.recent_points(
                        &key,
                        now,
                        detect.recovery_config.check_window,
                    )?;
                    // an empty window means no data, not recovery
                    if window.is_empty() {
                        return Ok(None);
                    }
                    let newest = window.last().map(|(ts, _)| *ts).unwrap_or(0);
                    if newest <= alert.latest_time {
                        return Ok(None);
                    }
                    if window.iter().any(|(_, l)| matches!(l, CheckLabel::Anomaly)) {
                        return Ok(None);
                    }
                    match detect.recovery_config.status_setter {
                        StatusSetter::Recovery => self.finish(
                            &mut alert,
                            AlertStatus::Recovered,
                            AlertLogOp::Recover,
                            "recovery window is clean".to_string(),
                        ),
                        StatusSetter::Close => self.finish(
                            &mut alert,
                            AlertStatus::Closed,
                            AlertLogOp::Close,
                            "recovery window is clean".to_string(),
                        ),
                    }
                }
                AlertStatus::Recovered | AlertStatus::Closed => Ok(None),
            }
        })
    }

    fn finish(
        &self,
        alert: &mut Alert,
        status: AlertStatus,
        op: AlertLogOp,
        description: String,
    ) -> Result<Option<TriggerEvent>> {
        let now = chrono::Utc::now().timestamp();
        alert.status = status;
        alert.end_time = Some(now);
        alert.next_status = None;
        alert.next_status_time = None;
        alert.extra_info.is_recovering = false;
        self.alerts.save(alert)?;
        self.append_log(&alert.id, op, description, None)?;
        tracing::info!(alert_id = %alert.id, status = %status, "alert finished");
        Ok(Some(match status {
            AlertStatus::Recovered => TriggerEvent::Recovered(alert.clone()),
            _ => TriggerEvent::Closed(alert.clone()),
        }))
    }

    /// Starts the system-wide recovery grace period for an alert: it
    /// keeps living as RECOVERING and lands in RECOVERED after `delta`
    /// unless a new anomaly aborts.
    pub fn delay_recover(&self, alert_id: &str, delta_secs: i64) -> Result<Option<TriggerEvent>> {
        let alert = self.alerts.get(alert_id)?;
        let dedupe = alert.dedupe_md5.clone();
        self.with_dedupe_lock(&dedupe, || {
            let mut alert = self.alerts.get(alert_id)?;
            if alert.status != AlertStatus::Abnormal {
                return Ok(None);
            }
            let now = chrono::Utc::now().timestamp();
            alert.status = AlertStatus::Recovering;
            alert.extra_info.is_recovering = true;
            alert.next_status = Some(AlertStatus::Recovered);
            alert.next_status_time = Some(now + delta_secs);
            self.alerts.save(&alert)?;
            self.queue.push_delayed(&DelayedTask {
                task_id: recover_task_id(&alert.id),
                cmd: "system_recover".to_string(),
                queue: QUEUE_TRIGGER_DELAYED.to_string(),
                values_json: serde_json::json!({ "alert_id": alert.id }).to_string(),
                score: now + delta_secs,
            })?;
            self.append_log(
                &alert.id,
                AlertLogOp::DelayRecover,
                format!("recovery delayed by {delta_secs}s"),
                None,
            )?;
            Ok(Some(TriggerEvent::RecoveringStarted(alert)))
        })
    }

    /// Applies a due `next_status`. Fired by the delay dispatcher; a
    /// no-op when an anomaly aborted the recovery in the meantime.
    pub fn apply_next_status(&self, alert_id: &str) -> Result<Option<TriggerEvent>> {
        let alert = self.alerts.get(alert_id)?;
        let dedupe = alert.dedupe_md5.clone();
        self.with_dedupe_lock(&dedupe, || {
            let mut alert = self.alerts.get(alert_id)?;
            let now = chrono::Utc::now().timestamp();
            if alert.status != AlertStatus::Recovering {
                return Ok(None);
            }
            if !alert.next_status_time.map(|t| now >= t).unwrap_or(false) {
                return Ok(None);
            }
            let status = alert.next_status.unwrap_or(AlertStatus::Recovered);
            self.finish(
                &mut alert,
                status,
                AlertLogOp::SystemRecover,
                "recovery grace period elapsed".to_string(),
            )
        })
    }

    /// Acknowledges an alert. Works in any state; terminal alerts keep
    /// the log entry for audit.
    pub fn ack(&self, alert_id: &str, user: &str, comment: &str) -> Result<Alert> {
        let alert = self.alerts.get(alert_id)?;
        let dedupe = alert.dedupe_md5.clone();
        self.with_dedupe_lock(&dedupe, || {
            let mut alert = self.alerts.get(alert_id)?;
            alert.is_ack = true;
            alert.is_ack_noticed = true;
            self.alerts.save(&alert)?;
            self.append_log(
                &alert.id,
                AlertLogOp::Ack,
                format!("acknowledged by {user}: {comment}"),
                None,
            )?;
            Ok(alert)
        })
    }

    /// Records that a known alert's triggering event was dropped.
    pub fn log_event_drop(&self, alert_id: &str, record_id: &str, reason: &str) -> Result<()> {
        self.append_log(
            alert_id,
            AlertLogOp::EventDrop,
            format!("event dropped: {reason}"),
            Some(record_id.to_string()),
        )
    }
}

fn recover_task_id(alert_id: &str) -> String {
    format!("alert.recover.{alert_id}")
}
