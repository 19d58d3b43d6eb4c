use crate::plugin::{ActionContext, ActionPlugin, PhaseResult, RetryPolicy, PHASE_CREATE_TASK};
use crate::plugins::{request_timeout, str_field};
use async_trait::async_trait;
use serde_json::Value;

/// Generic webhook delivery: POSTs the rendered body (or the whole alert
/// when no body template is configured) to the target URL. One attempt
/// per phase entry; the runner's retry policy spaces out repeats.
pub struct WebhookPlugin {
    client: reqwest::Client,
}

impl WebhookPlugin {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn create_task(&self, ctx: &ActionContext) -> PhaseResult {
        let Some(url) = str_field(&ctx.inputs, "url") else {
            return PhaseResult::fatal("webhook url is not configured");
        };
        let body = match ctx.inputs.get("body") {
            Some(body) if !body.is_null() => body.clone(),
            _ => match serde_json::to_value(&ctx.alert) {
                Ok(alert) => alert,
                Err(e) => return PhaseResult::fatal(format!("alert not serializable: {e}")),
            },
        };

        let mut request = self
            .client
            .post(url)
            .timeout(request_timeout(ctx.config.timeout_secs))
            .json(&body);
        if let Some(headers) = ctx.inputs.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                PhaseResult::success(format!("webhook accepted ({})", resp.status()))
                    .with_data(serde_json::json!({ "status": resp.status().as_u16() }))
            }
            Ok(resp) => PhaseResult::failure(format!("webhook returned {}", resp.status())),
            Err(e) => PhaseResult::failure(format!("webhook unreachable: {e}")),
        }
    }
}

impl Default for WebhookPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionPlugin for WebhookPlugin {
    fn kind(&self) -> &'static str {
        "webhook"
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
            other => PhaseResult::fatal(format!("webhook plugin has no phase {other}")),
        }
    }
}
