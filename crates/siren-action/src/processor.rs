use crate::error::{ActionError, Result};
use crate::plugin::{ActionContext, ActionPlugin, PhaseResult, PluginRegistry, PHASE_CALLBACK, PHASE_CREATE_TASK};
use crate::qos::QosLimiter;
use crate::render::render_inputs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use siren_common::id::next_id;
use siren_common::types::{ActionStatus, Alert, AlertLogEntry, AlertLogOp};
use siren_storage::action_store::{ActionInstance, ActionStore};
use siren_storage::alert_store::AlertStore;
use siren_storage::config_store::ConfigStore;
use siren_storage::queue::{DelayedTask, QueueStore, QUEUE_ACTION};
use std::sync::Arc;

/// Wait this long for an external callback when the plugin did not say.
const DEFAULT_WAIT_SECS: i64 = 60;

/// The unit of work on the action queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTask {
    pub action_id: String,
}

/// The generic action runner: creates instances from alert signals,
/// drives plugin phases forward, applies per-plugin retry policy, and
/// parks instances waiting on delayed wake-ups or external callbacks.
pub struct ActionProcessor {
    plugins: PluginRegistry,
    actions: Arc<ActionStore>,
    alerts: Arc<AlertStore>,
    config: Arc<ConfigStore>,
    queue: Arc<QueueStore>,
    qos: QosLimiter,
}

impl ActionProcessor {
    pub fn new(
        plugins: PluginRegistry,
        actions: Arc<ActionStore>,
        alerts: Arc<AlertStore>,
        config: Arc<ConfigStore>,
        queue: Arc<QueueStore>,
        qos: QosLimiter,
    ) -> Self {
        Self {
            plugins,
            actions,
            alerts,
            config,
            queue,
            qos,
        }
    }

    fn append_alert_log(
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

    /// Creates one action instance for an alert signal. Returns `None`
    /// when the dispatch was suppressed (shield or QoS); a render failure
    /// returns the instance already marked FAILURE.
    pub fn create_instance(
        &self,
        alert: &Alert,
        biz_id: i64,
        signal: &str,
        config_id: i64,
        kwargs: Value,
    ) -> Result<Option<ActionInstance>> {
        if alert.is_shielded {
            self.append_alert_log(
                &alert.id,
                AlertLogOp::AlertQos,
                format!("action config {config_id} suppressed: alert is shielded"),
                None,
            )?;
            return Ok(None);
        }
        if !self.qos.try_acquire(biz_id, &alert.id) {
            let event_id = alert.event.as_ref().map(|e| e.record_id.clone());
            self.append_alert_log(
                &alert.id,
                AlertLogOp::AlertQos,
                format!("action config {config_id} dropped by qos"),
                None,
            )?;
            self.append_alert_log(
                &alert.id,
                AlertLogOp::EventDrop,
                "event dropped: action qos exceeded".to_string(),
                event_id,
            )?;
            return Ok(None);
        }

        let config = self.config.action_config(config_id)?;
        let plugin = self.plugins.get(&config.plugin_id)?;
        let now = chrono::Utc::now().timestamp();
        let context = serde_json::json!({
            "alert": alert,
            "signal": signal,
            "kwargs": kwargs,
            "action": { "id": config.id, "name": config.name, "plugin": config.plugin_id },
        });
        let mut instance = ActionInstance {
            id: next_id(),
            signal: signal.to_string(),
            config_id,
            plugin: config.plugin_id.clone(),
            status: ActionStatus::Waiting,
            next_function: plugin.phases().first().map(|p| p.to_string()),
            retry_count: 0,
            inputs: "null".to_string(),
            outputs: "{}".to_string(),
            kwargs: kwargs.to_string(),
            message: String::new(),
            bk_biz_id: biz_id,
            alerts: vec![alert.id.clone()],
            created_at: now,
            updated_at: now,
        };

        match render_inputs(&config.template_detail, &context) {
            Ok(inputs) => {
                instance.inputs = inputs.to_string();
            }
            Err(ActionError::Render(reason)) => {
                instance.status = ActionStatus::Failure;
                instance.message = reason.clone();
                self.actions.save(&instance)?;
                self.append_alert_log(
                    &alert.id,
                    AlertLogOp::Action,
                    format!("action {} failed: {reason}", config.name),
                    None,
                )?;
                tracing::warn!(action_id = %instance.id, %reason, "action input render failed");
                return Ok(Some(instance));
            }
            Err(e) => return Err(e),
        }

        self.actions.save(&instance)?;
        self.queue.push(
            QUEUE_ACTION,
            &ActionTask {
                action_id: instance.id.clone(),
            },
        )?;
        self.append_alert_log(
            &alert.id,
            AlertLogOp::Action,
            format!("action {} queued on signal {signal}", config.name),
            None,
        )?;
        Ok(Some(instance))
    }

    /// Runs the instance's next phase. Instances in a terminal status
    /// must not be re-entered.
    pub async fn execute(&self, instance_id: &str) -> Result<ActionInstance> {
        let mut instance = self.actions.get(instance_id)?;
        if !instance.status.can_execute() {
            return Err(ActionError::AlreadyFinished(instance_id.to_string()));
        }
        let plugin = self.plugins.get(&instance.plugin)?.clone();
        let phase = instance
            .next_function
            .clone()
            .unwrap_or_else(|| PHASE_CREATE_TASK.to_string());

        instance.status = ActionStatus::Running;
        instance.updated_at = chrono::Utc::now().timestamp();
        self.actions.save(&instance)?;

        let ctx = match self.build_context(&instance, None) {
            Ok(ctx) => ctx,
            Err(e) => return self.finish_failure(instance, format!("context unavailable: {e}")),
        };
        let result = plugin.run_phase(&phase, &ctx).await;
        self.apply_result(instance, plugin.as_ref(), &phase, result)
    }

    /// Applies an external callback (ITSM approval, webhook receipt) to a
    /// parked instance.
    pub async fn handle_callback(
        &self,
        instance_id: &str,
        payload: Value,
    ) -> Result<ActionInstance> {
        let instance = self.actions.get(instance_id)?;
        if !instance.status.can_execute() {
            return Err(ActionError::AlreadyFinished(instance_id.to_string()));
        }
        // the callback supersedes any scheduled wake-up
        self.queue.cancel_delayed(&wait_task_id(&instance.id))?;
        self.queue.cancel_delayed(&retry_task_id(&instance.id))?;

        let plugin = self.plugins.get(&instance.plugin)?.clone();
        let ctx = match self.build_context(&instance, Some(payload)) {
            Ok(ctx) => ctx,
            Err(e) => return self.finish_failure(instance, format!("context unavailable: {e}")),
        };
        let result = plugin.run_phase(PHASE_CALLBACK, &ctx).await;
        self.apply_result(instance, plugin.as_ref(), PHASE_CALLBACK, result)
    }

    /// Escalates an unacked notice: when `upgrade_interval` has elapsed
    /// since the last notice and upgrade user groups exist, a new notice
    /// instance goes through the normal creation path, QoS included.
    pub fn check_upgrade(
        &self,
        alert: &Alert,
        strategy: &siren_strategy::model::Strategy,
        config_id: i64,
        last_notice_at: i64,
    ) -> Result<Option<ActionInstance>> {
        let Some(interval) = strategy.notice.upgrade_interval else {
            return Ok(None);
        };
        if alert.is_ack || strategy.notice.upgrade_user_groups.is_empty() {
            return Ok(None);
        }
        let now = chrono::Utc::now().timestamp();
        if now - last_notice_at < interval as i64 {
            return Ok(None);
        }
        self.create_instance(
            alert,
            strategy.biz_id,
            "upgrade",
            config_id,
            serde_json::json!({
                "upgrade": true,
                "user_groups": strategy.notice.upgrade_user_groups,
            }),
        )
    }

    /// Re-enqueues instances stranded in RUNNING by a crash. Called once
    /// at startup before workers begin leasing.
    pub fn requeue_interrupted(&self) -> Result<u32> {
        let mut requeued = 0;
        for mut instance in self.actions.list_by_status(ActionStatus::Running)? {
            instance.status = ActionStatus::Waiting;
            instance.updated_at = chrono::Utc::now().timestamp();
            self.actions.save(&instance)?;
            self.queue.push(
                QUEUE_ACTION,
                &ActionTask {
                    action_id: instance.id.clone(),
                },
            )?;
            requeued += 1;
        }
        Ok(requeued)
    }

    fn build_context(
        &self,
        instance: &ActionInstance,
        callback_payload: Option<Value>,
    ) -> Result<ActionContext> {
        let alert_id = instance
            .alerts
            .first()
            .ok_or_else(|| ActionError::BadPayload("instance has no alert".to_string()))?;
        let alert = self.alerts.get(alert_id)?;
        let config = self.config.action_config(instance.config_id)?;
        let inputs: Value = serde_json::from_str(&instance.inputs).unwrap_or(Value::Null);
        Ok(ActionContext {
            instance: instance.clone(),
            alert,
            config,
            inputs,
            callback_payload,
        })
    }

    fn apply_result(
        &self,
        mut instance: ActionInstance,
        plugin: &dyn ActionPlugin,
        phase: &str,
        result: PhaseResult,
    ) -> Result<ActionInstance> {
        self.merge_outputs(&mut instance, phase, &result)?;
        instance.message = result.message.clone();
        instance.updated_at = chrono::Utc::now().timestamp();

        if result.finished && result.success {
            match phase_after(plugin.phases(), phase) {
                Some(next) => {
                    instance.next_function = Some(next.to_string());
                    instance.status = ActionStatus::Waiting;
                    self.actions.save(&instance)?;
                    self.queue.push(
                        QUEUE_ACTION,
                        &ActionTask {
                            action_id: instance.id.clone(),
                        },
                    )?;
                }
                None => {
                    instance.status = ActionStatus::Success;
                    instance.next_function = None;
                    self.actions.save(&instance)?;
                    self.log_outcome(&instance, "succeeded")?;
                }
            }
            return Ok(instance);
        }

        if result.finished {
            let policy = plugin.retry_policy();
            if result.retryable && instance.retry_count < policy.max_retries {
                instance.retry_count += 1;
                instance.status = ActionStatus::Sleep;
                instance.next_function = Some(phase.to_string());
                self.actions.save(&instance)?;
                let now = chrono::Utc::now().timestamp();
                self.queue.push_delayed(&DelayedTask {
                    task_id: retry_task_id(&instance.id),
                    cmd: "execute_action".to_string(),
                    queue: QUEUE_ACTION.to_string(),
                    values_json: serde_json::json!({ "action_id": instance.id }).to_string(),
                    score: now + policy.retry_interval_secs,
                })?;
                tracing::warn!(
                    action_id = %instance.id,
                    retry = instance.retry_count,
                    message = %result.message,
                    "action phase failed, retry scheduled"
                );
                return Ok(instance);
            }
            return self.finish_failure(
                instance,
                format!(
                    "failed after {} retries: {}",
                    policy.max_retries, result.message
                ),
            );
        }

        // not finished: park until the delayed wake-up or a callback
        let delta = result.schedule_delta.unwrap_or(DEFAULT_WAIT_SECS);
        instance.status = ActionStatus::Sleep;
        instance.next_function = Some(phase.to_string());
        self.actions.save(&instance)?;
        let now = chrono::Utc::now().timestamp();
        self.queue.push_delayed(&DelayedTask {
            task_id: wait_task_id(&instance.id),
            cmd: "execute_action".to_string(),
            queue: QUEUE_ACTION.to_string(),
            values_json: serde_json::json!({ "action_id": instance.id }).to_string(),
            score: now + delta,
        })?;
        Ok(instance)
    }

    fn finish_failure(
        &self,
        mut instance: ActionInstance,
        message: String,
    ) -> Result<ActionInstance> {
        instance.status = ActionStatus::Failure;
        instance.message = message;
        instance.next_function = None;
        instance.updated_at = chrono::Utc::now().timestamp();
        self.actions.save(&instance)?;
        self.log_outcome(&instance, "failed")?;
        Ok(instance)
    }

    fn merge_outputs(
        &self,
        instance: &mut ActionInstance,
        phase: &str,
        result: &PhaseResult,
    ) -> Result<()> {
        if result.data.is_null() {
            return Ok(());
        }
        let mut outputs: Value =
            serde_json::from_str(&instance.outputs).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(map) = outputs.as_object_mut() {
            map.insert(phase.to_string(), result.data.clone());
        }
        instance.outputs = outputs.to_string();
        Ok(())
    }

    fn log_outcome(&self, instance: &ActionInstance, outcome: &str) -> Result<()> {
        for alert_id in &instance.alerts {
            self.append_alert_log(
                alert_id,
                AlertLogOp::Action,
                format!(
                    "action {} ({}) {outcome}: {}",
                    instance.id, instance.plugin, instance.message
                ),
                None,
            )?;
        }
        Ok(())
    }
}

fn phase_after<'a>(phases: &'a [&'a str], current: &str) -> Option<&'a str> {
    let idx = phases.iter().position(|p| *p == current)?;
    phases.get(idx + 1).copied()
}

fn retry_task_id(instance_id: &str) -> String {
    format!("action.retry.{instance_id}")
}

fn wait_task_id(instance_id: &str) -> String {
    format!("action.wait.{instance_id}")
}
