use crate::plugin::{ActionContext, ActionPlugin, PhaseResult, RetryPolicy, PHASE_CREATE_TASK};
use crate::plugins::{request_timeout, str_field};
use async_trait::async_trait;
use serde_json::Value;

/// Notice delivery. With a `gateway_url` input the rendered notice is
/// POSTed to the notification gateway; without one it is emitted as a
/// structured log line, which keeps small deployments gateway-free.
pub struct NoticePlugin {
    client: reqwest::Client,
}

impl NoticePlugin {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn receivers(ctx: &ActionContext) -> Vec<String> {
        let from_inputs: Vec<String> = ctx
            .inputs
            .get("receivers")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !from_inputs.is_empty() {
            return from_inputs;
        }
        // upgrade notices carry their user groups in kwargs
        let kwargs: Value = serde_json::from_str(&ctx.instance.kwargs).unwrap_or(Value::Null);
        let upgraded: Vec<String> = kwargs
            .get("user_groups")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !upgraded.is_empty() {
            return upgraded;
        }
        ctx.alert.appointee.clone()
    }

    async fn create_task(&self, ctx: &ActionContext) -> PhaseResult {
        let receivers = Self::receivers(ctx);
        if receivers.is_empty() {
            return PhaseResult::fatal("notice has no receivers and no fallback assignees");
        }
        let title = str_field(&ctx.inputs, "title").unwrap_or(&ctx.alert.alert_name);
        let content = str_field(&ctx.inputs, "content").unwrap_or_default();

        let Some(url) = str_field(&ctx.inputs, "gateway_url") else {
            tracing::info!(
                alert_id = %ctx.alert.id,
                receivers = receivers.len(),
                %title,
                "notice delivered via log"
            );
            return PhaseResult::success(format!("notified {} receivers", receivers.len()));
        };

        let body = serde_json::json!({
            "receivers": receivers,
            "title": title,
            "content": content,
            "alert_id": ctx.alert.id,
            "severity": ctx.alert.severity.level(),
        });
        match self
            .client
            .post(url)
            .json(&body)
            .timeout(request_timeout(ctx.config.timeout_secs))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                PhaseResult::success(format!("notified {} receivers", receivers.len()))
                    .with_data(serde_json::json!({ "status": resp.status().as_u16() }))
            }
            Ok(resp) => PhaseResult::failure(format!("notice gateway returned {}", resp.status())),
            Err(e) => PhaseResult::failure(format!("notice gateway unreachable: {e}")),
        }
    }
}

impl Default for NoticePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionPlugin for NoticePlugin {
    fn kind(&self) -> &'static str {
        "notice"
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            retry_interval_secs: 60,
        }
    }

    async fn run_phase(&self, phase: &str, ctx: &ActionContext) -> PhaseResult {
        match phase {
            PHASE_CREATE_TASK => self.create_task(ctx).await,
            other => PhaseResult::fatal(format!("notice plugin has no phase {other}")),
        }
    }
}
