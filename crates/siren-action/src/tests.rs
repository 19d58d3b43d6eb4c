use crate::error::ActionError;
use crate::plugin::{
    ActionContext, ActionPlugin, PhaseResult, PluginRegistry, RetryPolicy, PHASE_CALLBACK,
    PHASE_CREATE_TASK, PHASE_SCHEDULE,
};
use crate::plugins::itsm::ItsmPlugin;
use crate::processor::ActionProcessor;
use crate::qos::{QosConfig, QosLimiter};
use async_trait::async_trait;
use serde_json::{json, Value};
use siren_common::id::alert_id;
use siren_common::types::{ActionStatus, Alert, AlertLogOp, AlertStatus, Severity};
use siren_storage::action_store::ActionInstance;
use siren_storage::config_store::ActionConfigRow;
use siren_storage::queue::QUEUE_ACTION;
use siren_storage::Stores;
use siren_strategy::model::{NoticeConfig, Strategy};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct FakePlugin {
    phases: &'static [&'static str],
    policy: RetryPolicy,
    script: Mutex<VecDeque<PhaseResult>>,
    calls: Mutex<Vec<String>>,
}

impl FakePlugin {
    fn scripted(phases: &'static [&'static str], script: Vec<PhaseResult>) -> Arc<Self> {
        Arc::new(Self {
            phases,
            policy: RetryPolicy {
                max_retries: 1,
                retry_interval_secs: 60,
            },
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionPlugin for FakePlugin {
    fn kind(&self) -> &'static str {
        "fake"
    }

    fn phases(&self) -> &'static [&'static str] {
        self.phases
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn run_phase(&self, phase: &str, _ctx: &ActionContext) -> PhaseResult {
        self.calls.lock().unwrap().push(phase.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| PhaseResult::fatal("script exhausted"))
    }
}

fn open_stores() -> (TempDir, Stores) {
    let tmp = TempDir::new().unwrap();
    let stores = Stores::open(tmp.path()).unwrap();
    (tmp, stores)
}

fn save_alert(stores: &Stores) -> Alert {
    let now = chrono::Utc::now().timestamp();
    let alert = Alert {
        id: alert_id(now),
        seq_id: 1,
        strategy_id: 11,
        alert_name: "cpu idle".to_string(),
        severity: Severity::Minor,
        status: AlertStatus::Abnormal,
        begin_time: now,
        latest_time: now,
        end_time: None,
        first_anomaly_time: now,
        dimensions: Default::default(),
        dedupe_md5: "abc".to_string(),
        event: None,
        assignee: vec![],
        appointee: vec!["oncall".to_string()],
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
    };
    stores.alerts.save(&alert).unwrap();
    alert
}

fn save_config(stores: &Stores, id: i64, plugin_id: &str, template_detail: &str) {
    stores
        .config
        .upsert_action_config(&ActionConfigRow {
            id,
            plugin_id: plugin_id.to_string(),
            name: format!("config-{id}"),
            biz_id: 2,
            timeout_secs: 30,
            template_detail: template_detail.to_string(),
        })
        .unwrap();
}

fn processor(stores: &Stores, plugin: Arc<dyn ActionPlugin>, qos: QosLimiter) -> ActionProcessor {
    let mut registry = PluginRegistry::new();
    registry.register(plugin);
    ActionProcessor::new(
        registry,
        stores.actions.clone(),
        stores.alerts.clone(),
        stores.config.clone(),
        stores.queue.clone(),
        qos,
    )
}

fn log_ops(stores: &Stores, alert_id: &str) -> Vec<AlertLogOp> {
    stores
        .alerts
        .logs(alert_id)
        .unwrap()
        .iter()
        .map(|l| l.op_type)
        .collect()
}

#[test]
fn create_instance_renders_inputs_and_queues() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(
        &stores,
        501,
        "fake",
        r#"{"title": "alert {{ alert.alert_name }} ({{ signal }})"}"#,
    );
    let plugin = FakePlugin::scripted(&[PHASE_CREATE_TASK], vec![]);
    let proc = processor(&stores, plugin, QosLimiter::default());

    let instance = proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .unwrap();
    assert_eq!(instance.status, ActionStatus::Waiting);
    assert_eq!(instance.next_function.as_deref(), Some(PHASE_CREATE_TASK));
    let inputs: Value = serde_json::from_str(&instance.inputs).unwrap();
    assert_eq!(inputs["title"], "alert cpu idle (abnormal)");
    assert_eq!(stores.queue.len(QUEUE_ACTION).unwrap(), 1);
    assert!(log_ops(&stores, &alert.id).contains(&AlertLogOp::Action));
}

#[test]
fn render_failure_is_fatal_for_the_instance() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(&stores, 501, "fake", r#"{"title": "{{ alert.alert_name "}"#);
    let plugin = FakePlugin::scripted(&[PHASE_CREATE_TASK], vec![]);
    let proc = processor(&stores, plugin, QosLimiter::default());

    let instance = proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .unwrap();
    assert_eq!(instance.status, ActionStatus::Failure);
    assert!(!instance.message.is_empty());
    // nothing was queued for a dead instance
    assert_eq!(stores.queue.len(QUEUE_ACTION).unwrap(), 0);
}

#[tokio::test]
async fn phases_chain_to_success() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(&stores, 501, "fake", r#"{"title": "x"}"#);
    let plugin = FakePlugin::scripted(
        &[PHASE_CREATE_TASK, PHASE_SCHEDULE],
        vec![
            PhaseResult::success("created").with_data(json!({"task": 1})),
            PhaseResult::success("done"),
        ],
    );
    let proc = processor(&stores, plugin.clone(), QosLimiter::default());

    let instance = proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .unwrap();

    let instance = proc.execute(&instance.id).await.unwrap();
    assert_eq!(instance.status, ActionStatus::Waiting);
    assert_eq!(instance.next_function.as_deref(), Some(PHASE_SCHEDULE));

    let instance = proc.execute(&instance.id).await.unwrap();
    assert_eq!(instance.status, ActionStatus::Success);
    assert_eq!(instance.next_function, None);
    let outputs: Value = serde_json::from_str(&instance.outputs).unwrap();
    assert_eq!(outputs["create_task"]["task"], 1);
    assert_eq!(plugin.calls(), vec!["create_task", "schedule"]);

    let ops = log_ops(&stores, &alert.id);
    assert!(ops.iter().filter(|op| **op == AlertLogOp::Action).count() >= 2);
}

#[tokio::test]
async fn failed_phase_retries_then_finishes_failure() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(&stores, 501, "fake", r#"{"title": "x"}"#);
    let plugin = FakePlugin::scripted(
        &[PHASE_CREATE_TASK],
        vec![
            PhaseResult::failure("gateway 502"),
            PhaseResult::failure("gateway 502"),
        ],
    );
    let proc = processor(&stores, plugin, QosLimiter::default());
    let instance = proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .unwrap();

    // first failure: parked for retry, delayed task scheduled
    let instance = proc.execute(&instance.id).await.unwrap();
    assert_eq!(instance.status, ActionStatus::Sleep);
    assert_eq!(instance.retry_count, 1);
    let retry_task = format!("action.retry.{}", instance.id);
    assert!(stores.queue.delayed_task(&retry_task).unwrap().is_some());

    // retry budget exhausted: FAILURE
    let instance = proc.execute(&instance.id).await.unwrap();
    assert_eq!(instance.status, ActionStatus::Failure);
    assert!(instance.message.contains("gateway 502"));
}

#[tokio::test]
async fn fatal_failure_skips_the_retry_controller() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(&stores, 501, "fake", r#"{"title": "x"}"#);
    let plugin = FakePlugin::scripted(
        &[PHASE_CREATE_TASK],
        vec![PhaseResult::fatal("no receivers")],
    );
    let proc = processor(&stores, plugin, QosLimiter::default());
    let instance = proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .unwrap();

    let instance = proc.execute(&instance.id).await.unwrap();
    assert_eq!(instance.status, ActionStatus::Failure);
    assert_eq!(instance.retry_count, 0);
}

#[tokio::test]
async fn pending_parks_until_the_callback_settles_it() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(&stores, 501, "fake", r#"{"title": "x"}"#);
    let plugin = FakePlugin::scripted(
        &[PHASE_CREATE_TASK, PHASE_SCHEDULE],
        vec![
            PhaseResult::success("created"),
            PhaseResult::pending("waiting for approval", 120),
            PhaseResult::success("approved"),
        ],
    );
    let proc = processor(&stores, plugin.clone(), QosLimiter::default());
    let instance = proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .unwrap();

    let instance = proc.execute(&instance.id).await.unwrap();
    let instance = proc.execute(&instance.id).await.unwrap();
    assert_eq!(instance.status, ActionStatus::Sleep);
    let wait_task = format!("action.wait.{}", instance.id);
    assert!(stores.queue.delayed_task(&wait_task).unwrap().is_some());

    let instance = proc
        .handle_callback(&instance.id, json!({"approve_result": true}))
        .await
        .unwrap();
    assert_eq!(instance.status, ActionStatus::Success);
    // the callback cancelled the scheduled wake-up
    assert!(stores.queue.delayed_task(&wait_task).unwrap().is_none());
    assert_eq!(plugin.calls(), vec!["create_task", "schedule", "callback"]);
}

#[tokio::test]
async fn finished_instances_reject_re_entry() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(&stores, 501, "fake", r#"{"title": "x"}"#);
    let plugin = FakePlugin::scripted(&[PHASE_CREATE_TASK], vec![PhaseResult::success("done")]);
    let proc = processor(&stores, plugin, QosLimiter::default());
    let instance = proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .unwrap();
    proc.execute(&instance.id).await.unwrap();

    let err = proc.execute(&instance.id).await.unwrap_err();
    assert!(matches!(err, ActionError::AlreadyFinished(_)));
    let err = proc
        .handle_callback(&instance.id, Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::AlreadyFinished(_)));
}

#[test]
fn qos_overflow_drops_with_logs_instead_of_actions() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(&stores, 501, "fake", r#"{"title": "x"}"#);
    let plugin = FakePlugin::scripted(&[PHASE_CREATE_TASK], vec![]);
    let qos = QosLimiter::new(QosConfig {
        capacity: 1.0,
        refill_per_sec: 0.0,
    });
    let proc = processor(&stores, plugin, qos);

    assert!(proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .is_some());
    assert!(proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .is_none());

    let ops = log_ops(&stores, &alert.id);
    assert!(ops.contains(&AlertLogOp::AlertQos));
    assert!(ops.contains(&AlertLogOp::EventDrop));
    assert_eq!(stores.queue.len(QUEUE_ACTION).unwrap(), 1);
}

#[test]
fn shielded_alert_suppresses_dispatch() {
    let (_tmp, stores) = open_stores();
    let mut alert = save_alert(&stores);
    alert.is_shielded = true;
    stores.alerts.save(&alert).unwrap();
    save_config(&stores, 501, "fake", r#"{"title": "x"}"#);
    let plugin = FakePlugin::scripted(&[PHASE_CREATE_TASK], vec![]);
    let proc = processor(&stores, plugin, QosLimiter::default());

    assert!(proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .is_none());
    assert!(log_ops(&stores, &alert.id).contains(&AlertLogOp::AlertQos));
    assert_eq!(stores.queue.len(QUEUE_ACTION).unwrap(), 0);
}

#[test]
fn unacked_notice_upgrades_after_the_interval() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(&stores, 501, "fake", r#"{"title": "x"}"#);
    let plugin = FakePlugin::scripted(&[PHASE_CREATE_TASK], vec![]);
    let proc = processor(&stores, plugin, QosLimiter::default());

    let strategy = Strategy {
        id: 11,
        biz_id: 2,
        name: "cpu idle".to_string(),
        scenario: "host".to_string(),
        priority: 0,
        priority_group_key: String::new(),
        update_time: 1000,
        items: vec![],
        detects: vec![],
        notice: NoticeConfig {
            user_groups: vec!["oncall".to_string()],
            upgrade_interval: Some(300),
            upgrade_user_groups: vec!["ops-lead".to_string()],
        },
        actions: vec![],
        labels: vec![],
        no_data_config: None,
        uptime: None,
        is_enabled: true,
    };
    let now = chrono::Utc::now().timestamp();

    // interval not yet elapsed
    assert!(proc
        .check_upgrade(&alert, &strategy, 501, now - 100)
        .unwrap()
        .is_none());

    let instance = proc
        .check_upgrade(&alert, &strategy, 501, now - 400)
        .unwrap()
        .unwrap();
    assert_eq!(instance.signal, "upgrade");
    let kwargs: Value = serde_json::from_str(&instance.kwargs).unwrap();
    assert_eq!(kwargs["user_groups"][0], "ops-lead");

    // acked alerts never escalate
    let mut acked = alert.clone();
    acked.is_ack = true;
    assert!(proc
        .check_upgrade(&acked, &strategy, 501, now - 400)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn crashed_running_instances_are_requeued() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    save_config(&stores, 501, "fake", r#"{"title": "x"}"#);
    let plugin = FakePlugin::scripted(&[PHASE_CREATE_TASK], vec![PhaseResult::success("done")]);
    let proc = processor(&stores, plugin, QosLimiter::default());
    let mut instance = proc
        .create_instance(&alert, 2, "abnormal", 501, Value::Null)
        .unwrap()
        .unwrap();

    // simulate a crash mid-execution
    instance.status = ActionStatus::Running;
    stores.alerts.save(&alert).unwrap();
    stores.actions.save(&instance).unwrap();

    assert_eq!(proc.requeue_interrupted().unwrap(), 1);
    let reloaded = stores.actions.get(&instance.id).unwrap();
    assert_eq!(reloaded.status, ActionStatus::Waiting);
    let settled = proc.execute(&instance.id).await.unwrap();
    assert_eq!(settled.status, ActionStatus::Success);
}

#[tokio::test]
async fn itsm_callback_settles_from_the_approval_payload() {
    let (_tmp, stores) = open_stores();
    let alert = save_alert(&stores);
    let plugin = ItsmPlugin::new();
    let config = ActionConfigRow {
        id: 502,
        plugin_id: "itsm".to_string(),
        name: "ticket".to_string(),
        biz_id: 2,
        timeout_secs: 30,
        template_detail: "{}".to_string(),
    };
    let now = chrono::Utc::now().timestamp();
    let instance = ActionInstance {
        id: "a1".to_string(),
        signal: "abnormal".to_string(),
        config_id: 502,
        plugin: "itsm".to_string(),
        status: ActionStatus::Sleep,
        next_function: Some(PHASE_SCHEDULE.to_string()),
        retry_count: 0,
        inputs: "{}".to_string(),
        outputs: r#"{"create_task":{"sn":"T-1"}}"#.to_string(),
        kwargs: "null".to_string(),
        message: String::new(),
        bk_biz_id: 2,
        alerts: vec![alert.id.clone()],
        created_at: now,
        updated_at: now,
    };
    let ctx = |payload: Option<Value>| ActionContext {
        instance: instance.clone(),
        alert: alert.clone(),
        config: config.clone(),
        inputs: json!({}),
        callback_payload: payload,
    };

    let approved = plugin
        .run_phase(
            PHASE_CALLBACK,
            &ctx(Some(json!({"approve_result": true, "updated_by": "ops"}))),
        )
        .await;
    assert!(approved.finished && approved.success);
    assert!(approved.message.contains("ops"));

    let rejected = plugin
        .run_phase(
            PHASE_CALLBACK,
            &ctx(Some(json!({"approve_result": false, "updated_by": "ops"}))),
        )
        .await;
    assert!(rejected.finished && !rejected.success && !rejected.retryable);
}
