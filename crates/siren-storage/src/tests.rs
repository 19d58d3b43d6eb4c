use crate::action_store::{ActionInstance, ActionStore};
use crate::alert_store::{AlertFilter, AlertStore};
use crate::check_result::{CheckResultStore, SeriesKey};
use crate::config_store::{AssignGroupRow, ConfigStore};
use crate::db::Db;
use crate::locks::LockStore;
use crate::queue::{DelayedTask, QueueStore, QUEUE_ANOMALY};
use crate::snapshot::SnapshotStore;
use siren_common::types::{
    ActionStatus, Alert, AlertLogEntry, AlertLogOp, AlertStatus, Severity,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn core_db() -> Arc<Db> {
    Arc::new(Db::open_in_memory().unwrap())
}

fn dims(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn series_key() -> SeriesKey {
    SeriesKey {
        strategy_id: 11,
        item_id: 22,
        dimensions: dims(&[("ip", "10.0.0.1")]),
        level: 1,
    }
}

fn make_alert(id: &str, dedupe: &str, status: AlertStatus) -> Alert {
    let epoch = siren_common::id::alert_id_epoch(id).unwrap();
    Alert {
        id: id.to_string(),
        seq_id: 1,
        strategy_id: 11,
        alert_name: "cpu high".to_string(),
        severity: Severity::Major,
        status,
        begin_time: epoch,
        latest_time: epoch,
        end_time: None,
        first_anomaly_time: epoch,
        dimensions: dims(&[("ip", "10.0.0.1")]),
        dedupe_md5: dedupe.to_string(),
        event: None,
        assignee: vec![],
        appointee: vec![],
        supervisor: vec![],
        follower: vec![],
        is_ack: false,
        is_ack_noticed: false,
        is_shielded: false,
        is_blocked: false,
        is_handled: false,
        handle_stage: vec![],
        labels: vec![],
        extra_info: Default::default(),
        next_status: None,
        next_status_time: None,
    }
}

#[test]
fn queue_is_fifo_and_lease_hides_items() {
    let q = QueueStore::new(core_db());
    q.push_raw(QUEUE_ANOMALY, "a").unwrap();
    q.push_raw(QUEUE_ANOMALY, "b").unwrap();
    q.push_raw(QUEUE_ANOMALY, "c").unwrap();

    let first = q.lease(QUEUE_ANOMALY, 2, 30).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].payload, "a");
    assert_eq!(first[1].payload, "b");

    // leased items are invisible to a second worker
    let second = q.lease(QUEUE_ANOMALY, 10, 30).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].payload, "c");

    q.ack(first[0].id).unwrap();
    q.ack(first[1].id).unwrap();
    q.ack(second[0].id).unwrap();
    assert_eq!(q.len(QUEUE_ANOMALY).unwrap(), 0);
}

#[test]
fn queue_release_makes_item_visible_again() {
    let q = QueueStore::new(core_db());
    q.push_raw("test", "x").unwrap();
    let leased = q.lease("test", 1, 30).unwrap();
    assert!(q.lease("test", 1, 30).unwrap().is_empty());
    q.release(leased[0].id).unwrap();
    assert_eq!(q.lease("test", 1, 30).unwrap().len(), 1);
}

#[test]
fn delayed_task_dispatch_moves_envelope_atomically() {
    let q = QueueStore::new(core_db());
    q.push_delayed(&DelayedTask {
        task_id: "recover.1234".to_string(),
        cmd: "recover".to_string(),
        queue: QUEUE_ANOMALY.to_string(),
        values_json: r#"{"alert_id":"1234"}"#.to_string(),
        score: 100,
    })
    .unwrap();

    // not due yet
    assert_eq!(q.dispatch_due(99).unwrap(), 0);
    assert!(q.delayed_task("recover.1234").unwrap().is_some());

    assert_eq!(q.dispatch_due(100).unwrap(), 1);
    assert!(q.delayed_task("recover.1234").unwrap().is_none());

    let leased = q.lease(QUEUE_ANOMALY, 1, 30).unwrap();
    let env: serde_json::Value = leased[0].decode().unwrap();
    assert_eq!(env["cmd"], "recover");
    assert_eq!(env["values"]["alert_id"], "1234");
}

#[test]
fn delayed_task_reschedule_replaces_score() {
    let q = QueueStore::new(core_db());
    let mut task = DelayedTask {
        task_id: "t1".to_string(),
        cmd: "close".to_string(),
        queue: "q".to_string(),
        values_json: "{}".to_string(),
        score: 50,
    };
    q.push_delayed(&task).unwrap();
    task.score = 500;
    q.push_delayed(&task).unwrap();
    assert_eq!(q.delayed_task("t1").unwrap().unwrap().score, 500);
    assert!(q.cancel_delayed("t1").unwrap());
    assert!(!q.cancel_delayed("t1").unwrap());
}

#[test]
fn check_results_window_reads_and_checkpoints() {
    let store = CheckResultStore::new(core_db());
    let key = series_key();
    for (ts, label) in [(60, "10"), (120, "ANOMALY"), (180, "ANOMALY")] {
        store
            .append(&key, ts, label.parse().unwrap(), 86400, 5)
            .unwrap();
    }

    let window = store.recent_points(&key, 180, 2).unwrap();
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].0, 120);
    assert!(window[1].1.is_anomaly());

    // window read is bounded by upto_ts
    let earlier = store.recent_points(&key, 120, 5).unwrap();
    assert_eq!(earlier.len(), 2);
    assert_eq!(earlier.last().unwrap().0, 120);

    assert_eq!(store.last_checkpoint(&key).unwrap(), Some(180));
    assert_eq!(store.latest_checkpoint(11, 22, 1).unwrap(), Some(180));
}

#[test]
fn check_result_append_is_idempotent_and_trims() {
    let store = CheckResultStore::new(core_db());
    let key = series_key();
    store.append(&key, 60, "5".parse().unwrap(), 120, 1).unwrap();
    store.append(&key, 60, "5".parse().unwrap(), 120, 1).unwrap();
    assert_eq!(store.range(&key, 0, 1000).unwrap().len(), 1);

    // point at ts=300 trims everything older than 300 - 120 = 180
    store.append(&key, 300, "6".parse().unwrap(), 120, 1).unwrap();
    let points = store.range(&key, 0, 1000).unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].0, 300);
}

#[test]
fn trim_keeps_the_window_for_sparse_series() {
    let store = CheckResultStore::new(core_db());
    let key = series_key();
    for ts in [60, 120, 180, 240, 300] {
        store
            .append(&key, ts, "ANOMALY".parse().unwrap(), 3600, 5)
            .unwrap();
    }

    // the series goes quiet for longer than retention; the next point
    // must not wipe the 5-point window
    store.append(&key, 7500, "40".parse().unwrap(), 3600, 5).unwrap();
    let points = store.range(&key, 0, 10_000).unwrap();
    assert_eq!(points.len(), 5);
    assert_eq!(points[0].0, 120);

    let window = store.recent_points(&key, 7500, 5).unwrap();
    assert_eq!(window.len(), 5);
    assert!(window.iter().filter(|(_, l)| l.is_anomaly()).count() >= 4);

    // an explicit trim honors the same floor
    assert_eq!(store.trim(&key, i64::MAX, 5).unwrap(), 0);
    assert_eq!(store.range(&key, 0, 10_000).unwrap().len(), 5);
}

#[test]
fn series_discovery_tracks_dimension_sets() {
    let store = CheckResultStore::new(core_db());
    let mut key = series_key();
    store.append(&key, 60, "1".parse().unwrap(), 86400, 5).unwrap();
    key.dimensions = dims(&[("ip", "10.0.0.2")]);
    store.append(&key, 120, "2".parse().unwrap(), 86400, 5).unwrap();

    let series = store.series_for_item(11, 22, 1).unwrap();
    assert_eq!(series.len(), 2);
    // the shared latest checkpoint is the max across both
    assert_eq!(store.latest_checkpoint(11, 22, 1).unwrap(), Some(120));
}

#[test]
fn snapshot_put_is_idempotent_and_sweep_expires() {
    let store = SnapshotStore::new(core_db());
    store.put("abc", 11, 1000, r#"{"id":11}"#).unwrap();
    store.put("abc", 11, 1000, r#"{"id":"CHANGED"}"#).unwrap();
    assert_eq!(store.get("abc").unwrap().unwrap(), r#"{"id":11}"#);

    store.touch("abc").unwrap();
    assert_eq!(store.sweep().unwrap(), 0);
    assert!(store.get("abc").unwrap().is_some());
}

#[test]
fn lock_is_exclusive_and_reentrant_for_holder() {
    let locks = LockStore::new(core_db());
    assert!(locks.acquire("detect.11", "worker-1", 60).unwrap());
    assert!(!locks.acquire("detect.11", "worker-2", 60).unwrap());
    // same holder extends
    assert!(locks.acquire("detect.11", "worker-1", 60).unwrap());
    assert_eq!(locks.holder("detect.11").unwrap().unwrap(), "worker-1");

    locks.release("detect.11", "worker-1").unwrap();
    assert!(locks.acquire("detect.11", "worker-2", 60).unwrap());
    // release by the wrong holder is a no-op
    locks.release("detect.11", "worker-1").unwrap();
    assert_eq!(locks.holder("detect.11").unwrap().unwrap(), "worker-2");
}

#[test]
fn lock_sweep_only_drops_expired_rows() {
    let locks = LockStore::new(core_db());
    assert!(locks.acquire("detect.11", "worker-1", -1).unwrap());
    assert!(locks.acquire("detect.12", "worker-1", 60).unwrap());

    assert_eq!(locks.sweep_expired().unwrap(), 1);
    assert!(locks.holder("detect.11").unwrap().is_none());
    assert_eq!(locks.holder("detect.12").unwrap().unwrap(), "worker-1");
}

#[test]
fn alert_store_roundtrip_and_dedupe_lookup() {
    let tmp = TempDir::new().unwrap();
    let store = AlertStore::new(tmp.path()).unwrap();
    let now = chrono::Utc::now().timestamp();
    let id = siren_common::id::alert_id(now);
    let alert = make_alert(&id, "d41d8cd9", AlertStatus::Abnormal);
    store.save(&alert).unwrap();

    let loaded = store.get(&id).unwrap();
    assert_eq!(loaded.dedupe_md5, "d41d8cd9");
    assert_eq!(loaded.status, AlertStatus::Abnormal);

    let open = store.get_open_by_dedupe("d41d8cd9", 7).unwrap();
    assert_eq!(open.unwrap().id, id);

    // terminal alerts never match the dedupe lookup
    let mut closed = loaded;
    closed.status = AlertStatus::Recovered;
    closed.end_time = Some(now);
    store.save(&closed).unwrap();
    assert!(store.get_open_by_dedupe("d41d8cd9", 7).unwrap().is_none());
}

#[test]
fn mget_skips_ids_with_no_stored_alert() {
    let tmp = TempDir::new().unwrap();
    let store = AlertStore::new(tmp.path()).unwrap();
    let now = chrono::Utc::now().timestamp();
    let a = make_alert(&siren_common::id::alert_id(now), "m1", AlertStatus::Abnormal);
    let b = make_alert(&siren_common::id::alert_id(now), "m2", AlertStatus::Abnormal);
    store.save(&a).unwrap();
    store.save(&b).unwrap();

    let missing = siren_common::id::alert_id(now);
    let got = store
        .mget(&[a.id.clone(), missing, b.id.clone()])
        .unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].id, a.id);
    assert_eq!(got[1].id, b.id);
}

#[test]
fn alert_search_filters_by_status_and_strategy() {
    let tmp = TempDir::new().unwrap();
    let store = AlertStore::new(tmp.path()).unwrap();
    let now = chrono::Utc::now().timestamp();
    let a = make_alert(&siren_common::id::alert_id(now), "m1", AlertStatus::Abnormal);
    let mut b = make_alert(&siren_common::id::alert_id(now), "m2", AlertStatus::Recovered);
    b.strategy_id = 99;
    store.save(&a).unwrap();
    store.save(&b).unwrap();

    let hits = store
        .search(&AlertFilter {
            status: Some(AlertStatus::Abnormal),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].dedupe_md5, "m1");

    let hits = store
        .search(&AlertFilter {
            strategy_id: Some(99),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].dedupe_md5, "m2");
}

#[test]
fn alert_logs_sorted_by_time_then_op() {
    let tmp = TempDir::new().unwrap();
    let store = AlertStore::new(tmp.path()).unwrap();
    let now = chrono::Utc::now().timestamp();
    let id = siren_common::id::alert_id(now);
    store
        .save(&make_alert(&id, "m1", AlertStatus::Abnormal))
        .unwrap();

    for (log_id, op, t) in [
        ("l3", AlertLogOp::Recover, now + 10),
        ("l1", AlertLogOp::Create, now),
        ("l2", AlertLogOp::Converge, now),
    ] {
        store
            .append_log(&AlertLogEntry {
                id: log_id.to_string(),
                alert_id: id.clone(),
                op_type: op,
                create_time: t,
                description: String::new(),
                event_id: None,
            })
            .unwrap();
    }

    let logs = store.logs(&id).unwrap();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].op_type, AlertLogOp::Converge);
    assert_eq!(logs[1].op_type, AlertLogOp::Create);
    assert_eq!(logs[2].op_type, AlertLogOp::Recover);
    assert!(logs[0].create_time <= logs[2].create_time);
}

#[test]
fn assign_groups_ordered_by_priority_then_id() {
    let store = ConfigStore::new(core_db());
    for (id, priority) in [(1, 10), (2, 50), (3, 50)] {
        store
            .upsert_assign_group(&AssignGroupRow {
                id,
                biz_id: 2,
                priority,
                name: format!("group-{id}"),
                source: String::new(),
                rules_json: "[]".to_string(),
            })
            .unwrap();
    }
    let groups = store.assign_groups(2).unwrap();
    let ids: Vec<i64> = groups.iter().map(|g| g.id).collect();
    assert_eq!(ids, vec![2, 3, 1]);
}

#[test]
fn action_instance_roundtrip_and_recovery_listing() {
    let store = ActionStore::new(core_db());
    let now = chrono::Utc::now().timestamp();
    let mut inst = ActionInstance {
        id: "act-1".to_string(),
        signal: "abnormal".to_string(),
        config_id: 7,
        plugin: "notice".to_string(),
        status: ActionStatus::Running,
        next_function: Some("schedule".to_string()),
        retry_count: 0,
        inputs: "{}".to_string(),
        outputs: "{}".to_string(),
        kwargs: "{}".to_string(),
        message: String::new(),
        bk_biz_id: 2,
        alerts: vec!["1700000000000001".to_string()],
        created_at: now,
        updated_at: now,
    };
    store.save(&inst).unwrap();

    let running = store.list_by_status(ActionStatus::Running).unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].next_function.as_deref(), Some("schedule"));
    assert!(!running[0].is_finished());

    inst.status = ActionStatus::Success;
    inst.updated_at = now + 5;
    store.save(&inst).unwrap();
    assert!(store.get("act-1").unwrap().is_finished());
    assert_eq!(store.cleanup_finished(now + 10).unwrap(), 1);
}
