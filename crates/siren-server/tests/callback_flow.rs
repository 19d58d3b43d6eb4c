use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use siren_common::types::{ActionStatus, Alert, AlertStatus, Severity};
use siren_server::callback::{router, sign_callback, CallbackPayload};
use siren_server::config::CoreConfig;
use siren_server::state::CoreRuntime;
use siren_storage::action_store::ActionInstance;
use siren_storage::config_store::ActionConfigRow;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

const SECRET: &str = "integration-secret";

struct TestContext {
    _temp_dir: TempDir,
    runtime: Arc<CoreRuntime>,
    app: axum::Router,
}

fn build_context() -> TestContext {
    siren_common::id::init(1, 1);
    let temp_dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        data_dir: temp_dir.path().to_string_lossy().into_owned(),
        signature_secret: SECRET.to_string(),
        ..CoreConfig::default()
    };
    let runtime = CoreRuntime::build(config).unwrap();
    let app = router(runtime.clone());
    TestContext {
        _temp_dir: temp_dir,
        runtime,
        app,
    }
}

fn save_alert(runtime: &CoreRuntime) -> Alert {
    let now = chrono::Utc::now().timestamp();
    let mut dimensions = BTreeMap::new();
    dimensions.insert("bk_target_ip".to_string(), "127.0.0.1".to_string());
    let alert = Alert {
        id: siren_common::id::alert_id(now),
        seq_id: 1,
        strategy_id: 11,
        alert_name: "disk full".to_string(),
        severity: Severity::Major,
        status: AlertStatus::Abnormal,
        begin_time: now,
        latest_time: now,
        end_time: None,
        first_anomaly_time: now,
        dimensions,
        dedupe_md5: "cb-test".to_string(),
        event: None,
        assignee: vec!["oncall".to_string()],
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
    runtime.stores.alerts.save(&alert).unwrap();
    alert
}

/// An ITSM instance parked in `schedule`, waiting on the approval
/// callback.
fn park_itsm_instance(runtime: &CoreRuntime, id: &str, alert_id: &str) {
    runtime
        .stores
        .config
        .upsert_action_config(&ActionConfigRow {
            id: 501,
            plugin_id: "itsm".to_string(),
            name: "change approval".to_string(),
            biz_id: 2,
            timeout_secs: 30,
            template_detail: "{}".to_string(),
        })
        .unwrap();
    let now = chrono::Utc::now().timestamp();
    runtime
        .stores
        .actions
        .save(&ActionInstance {
            id: id.to_string(),
            signal: "abnormal".to_string(),
            config_id: 501,
            plugin: "itsm".to_string(),
            status: ActionStatus::Sleep,
            next_function: Some("schedule".to_string()),
            retry_count: 0,
            inputs: "{}".to_string(),
            outputs: "{}".to_string(),
            kwargs: "{}".to_string(),
            message: "waiting for approval callback".to_string(),
            bk_biz_id: 2,
            alerts: vec![alert_id.to_string()],
            created_at: now,
            updated_at: now,
        })
        .unwrap();
}

fn payload(approve: bool) -> CallbackPayload {
    let mut payload = CallbackPayload {
        sn: "TICKET-7".to_string(),
        title: "change approval".to_string(),
        approve_result: approve,
        updated_by: "ops".to_string(),
        token: String::new(),
    };
    payload.token = sign_callback(SECRET, &payload);
    payload
}

async fn post_callback(
    app: &axum::Router,
    action_id: &str,
    payload: &CallbackPayload,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/action/callback/{action_id}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(payload).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, body)
}

#[tokio::test]
async fn signed_approval_settles_the_instance() {
    let ctx = build_context();
    let alert = save_alert(&ctx.runtime);
    park_itsm_instance(&ctx.runtime, "900001", &alert.id);

    let (status, body) = post_callback(&ctx.app, "900001", &payload(true)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], serde_json::json!(true));

    let instance = ctx.runtime.stores.actions.get("900001").unwrap();
    assert_eq!(instance.status, ActionStatus::Success);
    assert!(instance.message.contains("approved by ops"));
}

#[tokio::test]
async fn altered_body_fails_verification_without_mutating() {
    let ctx = build_context();
    let alert = save_alert(&ctx.runtime);
    park_itsm_instance(&ctx.runtime, "900002", &alert.id);

    // token was computed for approve_result=true; the body says false
    let mut tampered = payload(true);
    tampered.approve_result = false;

    let (status, body) = post_callback(&ctx.app, "900002", &tampered).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], serde_json::json!(false));
    assert_eq!(body["message"], serde_json::json!("signature mismatch"));

    let instance = ctx.runtime.stores.actions.get("900002").unwrap();
    assert_eq!(instance.status, ActionStatus::Sleep);
    assert_eq!(instance.next_function.as_deref(), Some("schedule"));
}

#[tokio::test]
async fn signed_rejection_finishes_the_instance_as_failure() {
    let ctx = build_context();
    let alert = save_alert(&ctx.runtime);
    park_itsm_instance(&ctx.runtime, "900003", &alert.id);

    let (status, body) = post_callback(&ctx.app, "900003", &payload(false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], serde_json::json!(true));

    let instance = ctx.runtime.stores.actions.get("900003").unwrap();
    assert_eq!(instance.status, ActionStatus::Failure);
    assert!(instance.message.contains("rejected by ops"));
}

#[tokio::test]
async fn finished_instances_report_an_error_message() {
    let ctx = build_context();
    let alert = save_alert(&ctx.runtime);
    park_itsm_instance(&ctx.runtime, "900004", &alert.id);

    let (_, first) = post_callback(&ctx.app, "900004", &payload(true)).await;
    assert_eq!(first["result"], serde_json::json!(true));

    let (status, second) = post_callback(&ctx.app, "900004", &payload(true)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["result"], serde_json::json!(false));
    assert!(second["message"].as_str().unwrap().contains("900004"));
}

#[tokio::test]
async fn healthz_answers() {
    let ctx = build_context();
    let request = Request::builder()
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    let response = ctx.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
