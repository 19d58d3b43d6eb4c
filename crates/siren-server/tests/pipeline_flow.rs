//! End-to-end pass through the wired runtime: one raw record travels
//! access -> detect -> trigger -> assignment -> action dispatch.

use siren_common::types::{ActionStatus, AlertStatus, AnomalyRecord, DataPoint, RawRecord};
use siren_pipeline::access::strategy_queue;
use siren_pipeline::trigger::TriggerEvent;
use siren_server::config::CoreConfig;
use siren_server::state::CoreRuntime;
use siren_storage::alert_store::AlertFilter;
use siren_storage::config_store::ActionConfigRow;
use siren_storage::queue::{QUEUE_ANOMALY, QUEUE_RAW};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

const STRATEGY_ID: i64 = 11;

fn strategy_payload() -> serde_json::Value {
    serde_json::json!({
        "id": STRATEGY_ID,
        "biz_id": 2,
        "name": "cpu idle",
        "scenario": "host",
        "update_time": 1000,
        "items": [{
            "id": 22,
            "name": "idle",
            "query_configs": [{
                "data_source": "bk_monitor",
                "table": "system.cpu",
                "metric": "idle",
                "agg_dimensions": [],
                "conditions": [],
                "agg_interval": 60
            }],
            "algorithms": [{
                "type": "Threshold",
                "level": 3,
                "config": {
                    "threshold": [[ { "method": "gte", "threshold": 90.0 } ]]
                }
            }],
            "target": { "kind": "all" }
        }],
        "detects": [{
            "level": 3,
            "trigger_config": { "check_window": 5, "count": 1 },
            "recovery_config": { "check_window": 5 }
        }],
        "notice": { "user_groups": ["oncall"] },
        "actions": [ { "config_id": 601, "signal": "abnormal" } ]
    })
}

fn build_runtime() -> (TempDir, Arc<CoreRuntime>) {
    siren_common::id::init(1, 1);
    let temp_dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        data_dir: temp_dir.path().to_string_lossy().into_owned(),
        signature_secret: "test".to_string(),
        ..CoreConfig::default()
    };
    let strategy_dir = config.strategy_dir_path();
    std::fs::create_dir_all(&strategy_dir).unwrap();
    std::fs::write(
        strategy_dir.join(format!("{STRATEGY_ID}.json")),
        strategy_payload().to_string(),
    )
    .unwrap();

    let runtime = CoreRuntime::build(config).unwrap();
    runtime
        .stores
        .config
        .upsert_action_config(&ActionConfigRow {
            id: 601,
            plugin_id: "notice".to_string(),
            name: "oncall notice".to_string(),
            biz_id: 2,
            timeout_secs: 30,
            template_detail: serde_json::json!({
                "title": "{{ alert.alert_name }}",
                "content": "value breached on {{ alert.dedupe_md5 }}"
            })
            .to_string(),
        })
        .unwrap();
    (temp_dir, runtime)
}

fn raw_record(value: f64, time: i64) -> RawRecord {
    let mut dimensions = BTreeMap::new();
    dimensions.insert("bk_target_ip".to_string(), "10.0.0.1".to_string());
    dimensions.insert("bk_target_cloud_id".to_string(), "0".to_string());
    let mut metrics = std::collections::HashMap::new();
    metrics.insert("idle".to_string(), value);
    RawRecord {
        data_id: 1001,
        dimensions,
        metrics,
        value: None,
        time,
        description: None,
    }
}

#[tokio::test]
async fn one_record_becomes_an_alert_with_a_queued_notice() {
    let (_tmp, runtime) = build_runtime();
    let now = chrono::Utc::now().timestamp();

    // access: the record routes to the strategy's queue
    let strategy = runtime.strategies.get(STRATEGY_ID).unwrap().unwrap();
    let emitted = runtime
        .access
        .process_record(&raw_record(95.0, now), &[strategy.clone()], &[], chrono::Utc::now())
        .unwrap();
    assert_eq!(emitted, 1);

    // detect: the point breaches the threshold and emits one anomaly
    let leased = runtime
        .stores
        .queue
        .lease(&strategy_queue(STRATEGY_ID), 10, 60)
        .unwrap();
    assert_eq!(leased.len(), 1);
    let points: Vec<DataPoint> = leased.iter().map(|l| l.decode().unwrap()).collect();
    let outcome = runtime.detect.process_batch(&strategy, points).unwrap();
    assert_eq!(outcome.anomalies, 1);

    // trigger: the anomaly opens an alert
    let anomalies = runtime.stores.queue.lease(QUEUE_ANOMALY, 10, 60).unwrap();
    assert_eq!(anomalies.len(), 1);
    let record: AnomalyRecord = anomalies[0].decode().unwrap();
    let events = runtime.trigger.handle_anomaly(&strategy, &record).unwrap();
    assert_eq!(events.len(), 1);
    let mut alert = match &events[0] {
        TriggerEvent::Opened(alert) => alert.clone(),
        other => panic!("expected Opened, got {other:?}"),
    };
    assert_eq!(alert.status, AlertStatus::Abnormal);

    // assignment: no groups configured, so strategy notice wins
    let assignment = runtime.assign.assign(&alert, &strategy).unwrap();
    assert_eq!(assignment.appointee, vec!["oncall".to_string()]);
    assert_eq!(assignment.action_config_ids, vec![601]);
    assignment.apply_to(&mut alert);
    runtime.stores.alerts.save(&alert).unwrap();

    // action: the notice instance renders and runs to success
    let instance = runtime
        .actions
        .create_instance(&alert, 2, "abnormal", 601, serde_json::json!({}))
        .unwrap()
        .unwrap();
    assert_eq!(instance.status, ActionStatus::Waiting);
    let done = runtime.actions.execute(&instance.id).await.unwrap();
    // no gateway_url configured: delivery degrades to the log sink
    assert_eq!(done.status, ActionStatus::Success);

    let saved = runtime
        .stores
        .alerts
        .search(&AlertFilter {
            strategy_id: Some(STRATEGY_ID),
            status: Some(AlertStatus::Abnormal),
            ..AlertFilter::default()
        })
        .unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].appointee, vec!["oncall".to_string()]);
}

#[tokio::test]
async fn raw_queue_feeds_the_access_stage() {
    let (_tmp, runtime) = build_runtime();
    let now = chrono::Utc::now().timestamp();

    runtime
        .stores
        .queue
        .push(QUEUE_RAW, &raw_record(10.0, now))
        .unwrap();
    let leased = runtime.stores.queue.lease(QUEUE_RAW, 10, 60).unwrap();
    assert_eq!(leased.len(), 1);
    let record: RawRecord = leased[0].decode().unwrap();

    // a healthy value still routes (detection, not access, decides)
    let strategy = runtime.strategies.get(STRATEGY_ID).unwrap().unwrap();
    let emitted = runtime
        .access
        .process_record(&record, &[strategy], &[], chrono::Utc::now())
        .unwrap();
    assert_eq!(emitted, 1);
}
