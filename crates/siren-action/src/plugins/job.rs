use crate::plugin::{
    ActionContext, ActionPlugin, PhaseResult, RetryPolicy, PHASE_CREATE_TASK, PHASE_SCHEDULE,
};
use crate::plugins::{request_timeout, str_field};
use async_trait::async_trait;
use serde_json::Value;

/// How often the schedule phase re-polls an unfinished job.
const POLL_INTERVAL_SECS: i64 = 30;

/// Remediation job execution: `create_task` launches the job and records
/// its instance id, `schedule` polls the status endpoint until the job
/// settles. Without a `status_url` the launch is fire-and-forget.
pub struct JobPlugin {
    client: reqwest::Client,
}

impl JobPlugin {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn create_task(&self, ctx: &ActionContext) -> PhaseResult {
        let Some(url) = str_field(&ctx.inputs, "job_url") else {
            return PhaseResult::fatal("job_url is not configured");
        };
        let body = serde_json::json!({
            "script": ctx.inputs.get("script").cloned().unwrap_or(Value::Null),
            "params": ctx.inputs.get("params").cloned().unwrap_or(Value::Null),
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
                return PhaseResult::failure(format!("job launch returned {}", resp.status()))
            }
            Err(e) => return PhaseResult::failure(format!("job platform unreachable: {e}")),
        };
        match resp.json::<Value>().await {
            Ok(payload) => match payload.get("job_instance_id") {
                Some(id) => PhaseResult::success("job launched")
                    .with_data(serde_json::json!({ "job_instance_id": id.clone() })),
                None => PhaseResult::failure("job response carried no job_instance_id"),
            },
            Err(e) => PhaseResult::failure(format!("job response not decodable: {e}")),
        }
    }

    async fn schedule(&self, ctx: &ActionContext) -> PhaseResult {
        let Some(url) = str_field(&ctx.inputs, "status_url") else {
            return PhaseResult::success("job launched, no status endpoint to poll");
        };
        let outputs: Value = serde_json::from_str(&ctx.instance.outputs).unwrap_or(Value::Null);
        let job_instance_id = outputs
            .pointer("/create_task/job_instance_id")
            .cloned()
            .unwrap_or(Value::Null);

        let resp = match self
            .client
            .post(url)
            .json(&serde_json::json!({ "job_instance_id": job_instance_id }))
            .timeout(request_timeout(ctx.config.timeout_secs))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                return PhaseResult::failure(format!("job status returned {}", resp.status()))
            }
            Err(e) => return PhaseResult::failure(format!("job platform unreachable: {e}")),
        };
        let payload = match resp.json::<Value>().await {
            Ok(payload) => payload,
            Err(e) => return PhaseResult::failure(format!("job status not decodable: {e}")),
        };
        let finished = payload.get("finished").and_then(Value::as_bool).unwrap_or(false);
        if !finished {
            return PhaseResult::pending("job still running", POLL_INTERVAL_SECS);
        }
        let success = payload.get("success").and_then(Value::as_bool).unwrap_or(false);
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if success {
            PhaseResult::success(message).with_data(payload)
        } else {
            PhaseResult::failure(message)
        }
    }
}

impl Default for JobPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionPlugin for JobPlugin {
    fn kind(&self) -> &'static str {
        "job"
    }

    fn phases(&self) -> &'static [&'static str] {
        &[PHASE_CREATE_TASK, PHASE_SCHEDULE]
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            retry_interval_secs: 300,
        }
    }

    async fn run_phase(&self, phase: &str, ctx: &ActionContext) -> PhaseResult {
        match phase {
            PHASE_CREATE_TASK => self.create_task(ctx).await,
            PHASE_SCHEDULE => self.schedule(ctx).await,
            other => PhaseResult::fatal(format!("job plugin has no phase {other}")),
        }
    }
}
