use crate::plugin::{
    ActionContext, ActionPlugin, PhaseResult, RetryPolicy, PHASE_CALLBACK, PHASE_CREATE_TASK,
    PHASE_SCHEDULE,
};
use crate::plugins::{request_timeout, str_field};
use async_trait::async_trait;
use serde_json::Value;

/// ITSM ticketing: `create_task` opens a ticket and records its `sn`,
/// `schedule` parks the instance until the approval callback arrives,
/// and `callback` settles it from the approval payload.
pub struct ItsmPlugin {
    client: reqwest::Client,
}

impl ItsmPlugin {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn create_task(&self, ctx: &ActionContext) -> PhaseResult {
        let Some(url) = str_field(&ctx.inputs, "create_url") else {
            return PhaseResult::fatal("itsm create_url is not configured");
        };
        let body = serde_json::json!({
            "title": str_field(&ctx.inputs, "title").unwrap_or(&ctx.alert.alert_name),
            "fields": ctx.inputs.get("fields").cloned().unwrap_or(Value::Null),
            "alert_id": ctx.alert.id,
        });
        let resp = match self
            .client
            .post(url)
            .json(&body)
            .timeout(request_timeout(ctx.config.timeout_secs))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                return PhaseResult::failure(format!("itsm create returned {}", resp.status()))
            }
            Err(e) => return PhaseResult::failure(format!("itsm unreachable: {e}")),
        };
        match resp.json::<Value>().await {
            Ok(payload) => match payload.get("sn").and_then(Value::as_str) {
                Some(sn) => PhaseResult::success(format!("ticket {sn} created"))
                    .with_data(serde_json::json!({ "sn": sn })),
                None => PhaseResult::failure("itsm response carried no ticket sn"),
            },
            Err(e) => PhaseResult::failure(format!("itsm response not decodable: {e}")),
        }
    }

    fn schedule(&self, ctx: &ActionContext) -> PhaseResult {
        PhaseResult::pending("waiting for approval callback", ctx.config.timeout_secs.max(1))
    }

    fn callback(&self, ctx: &ActionContext) -> PhaseResult {
        let Some(payload) = ctx.callback_payload.as_ref() else {
            return PhaseResult::failure("callback arrived without a payload");
        };
        let approved = payload
            .get("approve_result")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let operator = payload
            .get("updated_by")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        if approved {
            PhaseResult::success(format!("ticket approved by {operator}"))
                .with_data(payload.clone())
        } else {
            // a rejection is an answer, not an error
            PhaseResult::fatal(format!("ticket rejected by {operator}"))
        }
    }
}

impl Default for ItsmPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionPlugin for ItsmPlugin {
    fn kind(&self) -> &'static str {
        "itsm"
    }

    fn phases(&self) -> &'static [&'static str] {
        &[PHASE_CREATE_TASK, PHASE_SCHEDULE]
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            retry_interval_secs: 120,
        }
    }

    async fn run_phase(&self, phase: &str, ctx: &ActionContext) -> PhaseResult {
        match phase {
            PHASE_CREATE_TASK => self.create_task(ctx).await,
            PHASE_SCHEDULE => self.schedule(ctx),
            PHASE_CALLBACK => self.callback(ctx),
            other => PhaseResult::fatal(format!("itsm plugin has no phase {other}")),
        }
    }
}
