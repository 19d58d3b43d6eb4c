use crate::state::CoreRuntime;
use serde::Deserialize;
use siren_action::ActionTask;
use siren_common::error::PipelineError;
use siren_common::types::{AlertLogOp, AlertStatus, AnomalyRecord, DataPoint, RawRecord};
use siren_pipeline::access::strategy_queue;
use siren_pipeline::backoff;
use siren_pipeline::trigger::{TriggerEvent, QUEUE_TRIGGER_DELAYED};
use siren_storage::alert_store::AlertFilter;
use siren_storage::queue::{Leased, QUEUE_ACTION, QUEUE_ANOMALY, QUEUE_ERRORS, QUEUE_RAW};
use siren_strategy::model::Strategy;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Envelope shape the delay dispatcher moves onto target queues.
#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    cmd: String,
    #[serde(default)]
    values: serde_json::Value,
}

/// Spawns every worker pool and periodic loop. Handles are aborted by
/// the caller on shutdown; all persistent state survives an abort.
pub fn spawn_all(runtime: Arc<CoreRuntime>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for _ in 0..runtime.config.access_workers {
        handles.push(tokio::spawn(access_loop(runtime.clone())));
    }
    for _ in 0..runtime.config.detect_workers {
        handles.push(tokio::spawn(detect_loop(runtime.clone())));
    }
    for _ in 0..runtime.config.trigger_workers {
        handles.push(tokio::spawn(trigger_loop(runtime.clone())));
    }
    for _ in 0..runtime.config.action_workers {
        handles.push(tokio::spawn(action_loop(runtime.clone())));
    }
    handles.push(tokio::spawn(dispatcher_loop(runtime.clone())));
    handles.push(tokio::spawn(scan_loop(runtime.clone())));
    handles.push(tokio::spawn(nodata_loop(runtime.clone())));
    handles.push(tokio::spawn(cleanup_loop(runtime.clone())));
    handles.push(tokio::spawn(selfmon_loop(runtime)));
    handles
}

fn ack_or_warn(runtime: &CoreRuntime, item: &Leased) {
    if let Err(e) = runtime.stores.queue.ack(item.id) {
        tracing::warn!(item_id = item.id, error = %e, "queue ack failed");
    }
}

fn release_or_warn(runtime: &CoreRuntime, item: &Leased) {
    if let Err(e) = runtime.stores.queue.release(item.id) {
        tracing::warn!(item_id = item.id, error = %e, "queue release failed");
    }
}

/// Persistent/fatal drops also land on the errors queue for operators.
fn report_drop(runtime: &CoreRuntime, stage: &str, detail: &str) {
    let event = serde_json::json!({
        "stage": stage,
        "detail": detail,
        "time": chrono::Utc::now().timestamp(),
    });
    if let Err(e) = runtime.stores.queue.push(QUEUE_ERRORS, &event) {
        tracing::warn!(error = %e, "error event push failed");
    }
}

/// Routes raw records to the strategies that want them.
async fn access_loop(runtime: Arc<CoreRuntime>) {
    let mut tick = interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        let batch = match runtime.stores.queue.lease(
            QUEUE_RAW,
            runtime.config.batch_size,
            runtime.config.lease_secs,
        ) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "raw queue lease failed");
                continue;
            }
        };
        if batch.is_empty() {
            continue;
        }
        let strategies = match enabled_strategies(&runtime) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "strategy listing failed");
                for item in &batch {
                    release_or_warn(&runtime, item);
                }
                continue;
            }
        };
        let calendars = runtime.calendars().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "calendar load failed, assuming none");
            Vec::new()
        });
        let now = chrono::Utc::now();
        for item in &batch {
            runtime.selfmon.record_in();
            let record: RawRecord = match item.decode() {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(item_id = item.id, error = %e, "undecodable raw record dropped");
                    runtime.selfmon.record_dropped();
                    ack_or_warn(&runtime, item);
                    continue;
                }
            };
            match runtime
                .access
                .process_record(&record, &strategies, &calendars, now)
            {
                Ok(emitted) => {
                    runtime.selfmon.points_emitted(emitted as u64);
                    if emitted == 0 {
                        runtime.selfmon.record_dropped();
                    }
                    ack_or_warn(&runtime, item);
                }
                Err(e) if e.is_transient() => release_or_warn(&runtime, item),
                Err(e) => {
                    tracing::error!(data_id = record.data_id, error = %e, "record dropped");
                    runtime.selfmon.record_dropped();
                    report_drop(&runtime, "access", &e.to_string());
                    ack_or_warn(&runtime, item);
                }
            }
        }
    }
}

/// Leases per-strategy point batches and runs detection.
async fn detect_loop(runtime: Arc<CoreRuntime>) {
    let mut tick = interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        let ids = match runtime.strategies.list_ids() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "strategy listing failed");
                continue;
            }
        };
        for id in ids {
            let batch = match runtime.stores.queue.lease(
                &strategy_queue(id),
                runtime.config.batch_size,
                runtime.config.lease_secs,
            ) {
                Ok(batch) if !batch.is_empty() => batch,
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(strategy_id = id, error = %e, "detect lease failed");
                    continue;
                }
            };
            let strategy = match runtime.strategies.get(id) {
                Ok(Some(strategy)) => strategy,
                Ok(None) => {
                    // strategy deleted while points were in flight
                    for item in &batch {
                        ack_or_warn(&runtime, item);
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!(strategy_id = id, error = %e, "strategy load failed");
                    for item in &batch {
                        release_or_warn(&runtime, item);
                    }
                    continue;
                }
            };
            let mut points = Vec::with_capacity(batch.len());
            let mut decodable = Vec::with_capacity(batch.len());
            for item in &batch {
                match item.decode::<DataPoint>() {
                    Ok(point) => {
                        points.push(point);
                        decodable.push(item);
                    }
                    Err(e) => {
                        tracing::warn!(item_id = item.id, error = %e, "undecodable point dropped");
                        ack_or_warn(&runtime, item);
                    }
                }
            }
            if points.is_empty() {
                continue;
            }
            match runtime.detect.process_batch(&strategy, points) {
                Ok(outcome) => {
                    runtime.selfmon.anomalies(outcome.anomalies as u64);
                    for item in decodable {
                        ack_or_warn(&runtime, item);
                    }
                }
                Err(e) if e.is_transient() => {
                    // another worker holds the strategy lock
                    for item in decodable {
                        release_or_warn(&runtime, item);
                    }
                }
                Err(e) => {
                    tracing::error!(strategy_id = id, error = %e, "detect batch dropped");
                    report_drop(&runtime, "detect", &e.to_string());
                    for item in decodable {
                        ack_or_warn(&runtime, item);
                    }
                }
            }
        }
    }
}

/// Applies anomaly records to the alert state machine and fans out
/// assignment and actions for the resulting events.
async fn trigger_loop(runtime: Arc<CoreRuntime>) {
    let mut tick = interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        let batch = match runtime.stores.queue.lease(
            QUEUE_ANOMALY,
            runtime.config.batch_size,
            runtime.config.lease_secs,
        ) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "anomaly queue lease failed");
                continue;
            }
        };
        for item in &batch {
            let record: AnomalyRecord = match item.decode() {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(item_id = item.id, error = %e, "undecodable anomaly dropped");
                    ack_or_warn(&runtime, item);
                    continue;
                }
            };
            let strategy = match strategy_for_record(&runtime, &record) {
                Ok(Some(strategy)) => strategy,
                Ok(None) => {
                    tracing::warn!(
                        strategy_id = record.data.strategy_id,
                        "anomaly for unknown strategy dropped"
                    );
                    ack_or_warn(&runtime, item);
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "strategy resolution failed");
                    release_or_warn(&runtime, item);
                    continue;
                }
            };
            // transient store failures retry in place before the item
            // goes back on the queue
            let mut attempt = 0u32;
            let outcome = loop {
                match runtime.trigger.handle_anomaly(&strategy, &record) {
                    Err(e) if e.is_transient() && attempt < 3 => {
                        tokio::time::sleep(backoff::retry_delay(attempt)).await;
                        attempt += 1;
                    }
                    other => break other,
                }
            };
            match outcome {
                Ok(events) => {
                    fan_out(&runtime, &strategy, events);
                    ack_or_warn(&runtime, item);
                }
                Err(e) if e.is_transient() => release_or_warn(&runtime, item),
                Err(e) => {
                    tracing::error!(record_id = %record.record_id, error = %e, "anomaly dropped");
                    report_drop(&runtime, "trigger", &e.to_string());
                    ack_or_warn(&runtime, item);
                }
            }
        }
    }
}

/// Resolves the strategy an anomaly was detected under, preferring the
/// pinned snapshot so late-arriving anomalies use the config that saw them.
fn strategy_for_record(
    runtime: &CoreRuntime,
    record: &AnomalyRecord,
) -> Result<Option<Arc<Strategy>>, PipelineError> {
    if let Some(payload) = runtime
        .stores
        .snapshot
        .get(&record.strategy_snapshot_key)
        .map_err(|e| PipelineError::Persistent(e.to_string()))?
    {
        return Ok(Some(Arc::new(Strategy::decode(&payload)?)));
    }
    runtime.strategies.get(record.data.strategy_id)
}

/// Turns trigger events into assignment plus action dispatches. Open
/// events run the assignment engine; recovery/close events notify per
/// the strategy's own action refs.
fn fan_out(runtime: &CoreRuntime, strategy: &Strategy, events: Vec<TriggerEvent>) {
    for event in events {
        match event {
            TriggerEvent::Opened(alert) => {
                runtime.selfmon.alert_opened();
                dispatch_open(runtime, strategy, alert);
            }
            TriggerEvent::SeverityUp(alert) => dispatch_open(runtime, strategy, alert),
            TriggerEvent::Recovered(alert) => {
                runtime.selfmon.alert_recovered();
                dispatch_signal(runtime, strategy, &alert, "recovered");
            }
            TriggerEvent::Closed(alert) => {
                runtime.selfmon.alert_closed();
                dispatch_signal(runtime, strategy, &alert, "closed");
            }
            TriggerEvent::Converged(_)
            | TriggerEvent::RecoveringStarted(_)
            | TriggerEvent::RecoverAborted(_) => {}
        }
    }
}

fn dispatch_open(runtime: &CoreRuntime, strategy: &Strategy, mut alert: siren_common::types::Alert) {
    let assignment = match runtime.assign.assign(&alert, strategy) {
        Ok(assignment) => assignment,
        Err(e) => {
            tracing::error!(alert_id = %alert.id, error = %e, "assignment failed");
            return;
        }
    };
    assignment.apply_to(&mut alert);
    if let Err(e) = runtime.stores.alerts.save(&alert) {
        tracing::error!(alert_id = %alert.id, error = %e, "alert save failed after assignment");
        return;
    }
    for config_id in &assignment.action_config_ids {
        dispatch_action(runtime, &alert, strategy.biz_id, "abnormal", *config_id);
    }
}

fn dispatch_signal(
    runtime: &CoreRuntime,
    strategy: &Strategy,
    alert: &siren_common::types::Alert,
    signal: &str,
) {
    for action_ref in &strategy.actions {
        if action_ref.signal == signal {
            dispatch_action(runtime, alert, strategy.biz_id, signal, action_ref.config_id);
        }
    }
}

fn dispatch_action(
    runtime: &CoreRuntime,
    alert: &siren_common::types::Alert,
    biz_id: i64,
    signal: &str,
    config_id: i64,
) {
    match runtime
        .actions
        .create_instance(alert, biz_id, signal, config_id, serde_json::json!({}))
    {
        Ok(Some(_)) => {}
        Ok(None) => tracing::debug!(alert_id = %alert.id, config_id, "dispatch suppressed"),
        Err(e) => {
            tracing::error!(alert_id = %alert.id, config_id, error = %e, "dispatch failed")
        }
    }
}

/// Executes leased action tasks. Items arrive either as direct
/// `ActionTask` pushes or wrapped in a dispatcher envelope.
async fn action_loop(runtime: Arc<CoreRuntime>) {
    let mut tick = interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        let batch = match runtime.stores.queue.lease(
            QUEUE_ACTION,
            runtime.config.batch_size,
            runtime.config.lease_secs,
        ) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "action queue lease failed");
                continue;
            }
        };
        for item in &batch {
            let Some(action_id) = action_id_of(&item.payload) else {
                tracing::warn!(item_id = item.id, "unrecognized action task dropped");
                ack_or_warn(&runtime, item);
                continue;
            };
            match runtime.actions.execute(&action_id).await {
                Ok(instance) => {
                    runtime.selfmon.action_run();
                    if instance.status == siren_common::types::ActionStatus::Failure {
                        runtime.selfmon.action_failed();
                    }
                }
                Err(siren_action::ActionError::AlreadyFinished(_)) => {
                    tracing::debug!(%action_id, "stale action task skipped");
                }
                Err(e) => {
                    runtime.selfmon.action_failed();
                    tracing::error!(%action_id, error = %e, "action execution failed");
                }
            }
            ack_or_warn(&runtime, item);
        }
    }
}

fn action_id_of(payload: &str) -> Option<String> {
    if let Ok(task) = serde_json::from_str::<ActionTask>(payload) {
        return Some(task.action_id);
    }
    let envelope: TaskEnvelope = serde_json::from_str(payload).ok()?;
    if envelope.cmd != "execute_action" {
        return None;
    }
    envelope
        .values
        .get("action_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Moves due delayed tasks to their queues and applies trigger commands.
async fn dispatcher_loop(runtime: Arc<CoreRuntime>) {
    let mut tick = interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        let now = chrono::Utc::now().timestamp();
        if let Err(e) = runtime.stores.queue.dispatch_due(now) {
            tracing::error!(error = %e, "delayed dispatch failed");
        }
        let batch = match runtime
            .stores
            .queue
            .lease(QUEUE_TRIGGER_DELAYED, 100, runtime.config.lease_secs)
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "trigger delay lease failed");
                continue;
            }
        };
        for item in &batch {
            let envelope: TaskEnvelope = match item.decode() {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(item_id = item.id, error = %e, "undecodable trigger command");
                    ack_or_warn(&runtime, item);
                    continue;
                }
            };
            if envelope.cmd != "system_recover" {
                tracing::warn!(cmd = %envelope.cmd, "unknown trigger command dropped");
                ack_or_warn(&runtime, item);
                continue;
            }
            let Some(alert_id) = envelope.values.get("alert_id").and_then(|v| v.as_str()) else {
                tracing::warn!(item_id = item.id, "trigger command without alert_id");
                ack_or_warn(&runtime, item);
                continue;
            };
            match runtime.trigger.apply_next_status(alert_id) {
                Ok(event) => {
                    if let Some(event) = event {
                        let strategy_id = event.alert().strategy_id;
                        match runtime.strategies.get(strategy_id) {
                            Ok(Some(strategy)) => fan_out(&runtime, &strategy, vec![event]),
                            Ok(None) => {
                                tracing::warn!(strategy_id, "event for unknown strategy")
                            }
                            Err(e) => tracing::error!(strategy_id, error = %e, "strategy load failed"),
                        }
                    }
                    ack_or_warn(&runtime, item);
                }
                Err(e) if e.is_transient() => release_or_warn(&runtime, item),
                Err(e) => {
                    tracing::error!(%alert_id, error = %e, "next-status transition failed");
                    ack_or_warn(&runtime, item);
                }
            }
        }
    }
}

/// Periodic open-alert scan: recovery windows, system close, and notice
/// escalation. Also refreshes the strategy cache.
async fn scan_loop(runtime: Arc<CoreRuntime>) {
    let mut tick = interval(Duration::from_secs(runtime.config.scan_interval_secs.max(1)));
    loop {
        tick.tick().await;
        if let Err(e) = runtime.strategies.refresh() {
            tracing::error!(error = %e, "strategy cache refresh failed");
        }
        let ids = match runtime.strategies.list_ids() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "strategy listing failed");
                continue;
            }
        };
        for id in ids {
            let strategy = match runtime.strategies.get(id) {
                Ok(Some(strategy)) => strategy,
                _ => continue,
            };
            for status in [AlertStatus::Abnormal, AlertStatus::Recovering] {
                let open = runtime.stores.alerts.search(&AlertFilter {
                    strategy_id: Some(id),
                    status: Some(status),
                    ..AlertFilter::default()
                });
                let open = match open {
                    Ok(open) => open,
                    Err(e) => {
                        tracing::error!(strategy_id = id, error = %e, "open alert search failed");
                        continue;
                    }
                };
                for alert in open {
                    match runtime.trigger.scan_open_alert(
                        &strategy,
                        &alert,
                        runtime.config.system_close_secs,
                    ) {
                        Ok(Some(event)) => fan_out(&runtime, &strategy, vec![event]),
                        Ok(None) => {
                            if status == AlertStatus::Abnormal {
                                check_upgrades(&runtime, &strategy, &alert);
                            }
                        }
                        Err(e) if e.is_transient() => {}
                        Err(e) => {
                            tracing::error!(alert_id = %alert.id, error = %e, "open alert scan failed")
                        }
                    }
                }
            }
        }
    }
}

/// Escalates unacked notices once the upgrade interval has elapsed since
/// the last action activity on the alert.
fn check_upgrades(runtime: &CoreRuntime, strategy: &Strategy, alert: &siren_common::types::Alert) {
    if strategy.notice.upgrade_interval.is_none() {
        return;
    }
    let last_notice_at = match runtime.stores.alerts.logs(&alert.id) {
        Ok(logs) => logs
            .iter()
            .filter(|l| l.op_type == AlertLogOp::Action)
            .map(|l| l.create_time)
            .max()
            .unwrap_or(alert.begin_time),
        Err(e) => {
            tracing::warn!(alert_id = %alert.id, error = %e, "alert log read failed");
            return;
        }
    };
    for action_ref in &strategy.actions {
        if action_ref.signal != "abnormal" {
            continue;
        }
        match runtime
            .actions
            .check_upgrade(alert, strategy, action_ref.config_id, last_notice_at)
        {
            Ok(Some(instance)) => {
                tracing::info!(alert_id = %alert.id, action_id = %instance.id, "notice upgraded");
            }
            Ok(None) => {}
            Err(e) => tracing::error!(alert_id = %alert.id, error = %e, "upgrade check failed"),
        }
    }
}

/// Emits synthetic no-data points back onto the strategy queues.
async fn nodata_loop(runtime: Arc<CoreRuntime>) {
    let mut tick = interval(Duration::from_secs(runtime.config.nodata_interval_secs.max(1)));
    loop {
        tick.tick().await;
        let ids = match runtime.strategies.list_ids() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "strategy listing failed");
                continue;
            }
        };
        let now = chrono::Utc::now().timestamp();
        for id in ids {
            let strategy = match runtime.strategies.get(id) {
                Ok(Some(strategy)) => strategy,
                _ => continue,
            };
            let points = match runtime.nodata.scan_strategy(&strategy, now) {
                Ok(points) => points,
                Err(e) => {
                    tracing::error!(strategy_id = id, error = %e, "no-data scan failed");
                    continue;
                }
            };
            for point in &points {
                if let Err(e) = runtime.stores.queue.push(&strategy_queue(id), point) {
                    tracing::error!(strategy_id = id, error = %e, "no-data point push failed");
                }
            }
        }
    }
}

/// Hourly retention sweep over alerts, snapshots and finished actions.
async fn cleanup_loop(runtime: Arc<CoreRuntime>) {
    let mut tick = interval(Duration::from_secs(runtime.config.cleanup_interval_secs.max(1)));
    loop {
        tick.tick().await;
        match runtime
            .stores
            .alerts
            .cleanup_older_than(runtime.config.retention_days)
        {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, "expired alert partitions dropped")
            }
            Err(e) => tracing::error!(error = %e, "alert cleanup failed"),
            _ => {}
        }
        match runtime.stores.snapshot.sweep() {
            Ok(removed) if removed > 0 => tracing::info!(removed, "expired snapshots dropped"),
            Err(e) => tracing::error!(error = %e, "snapshot sweep failed"),
            _ => {}
        }
        if let Err(e) = runtime.stores.locks.sweep_expired() {
            tracing::error!(error = %e, "lock sweep failed");
        }
        let horizon =
            chrono::Utc::now().timestamp() - runtime.config.retention_days as i64 * 86_400;
        match runtime.stores.actions.cleanup_finished(horizon) {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, "finished action instances dropped")
            }
            Err(e) => tracing::error!(error = %e, "action cleanup failed"),
            _ => {}
        }
    }
}

async fn selfmon_loop(runtime: Arc<CoreRuntime>) {
    let mut tick = interval(Duration::from_secs(runtime.config.selfmon_flush_secs.max(1)));
    loop {
        tick.tick().await;
        runtime.selfmon.flush();
    }
}

fn enabled_strategies(runtime: &CoreRuntime) -> Result<Vec<Arc<Strategy>>, PipelineError> {
    let mut out = Vec::new();
    for id in runtime.strategies.list_ids()? {
        if let Some(strategy) = runtime.strategies.get(id)? {
            if strategy.is_enabled {
                out.push(strategy);
            }
        }
    }
    Ok(out)
}
