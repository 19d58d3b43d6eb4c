use crate::error::{ActionError, Result};
use async_trait::async_trait;
use serde_json::Value;
use siren_common::types::Alert;
use siren_storage::action_store::ActionInstance;
use siren_storage::config_store::ActionConfigRow;
use std::collections::HashMap;
use std::sync::Arc;

pub const PHASE_CREATE_TASK: &str = "create_task";
pub const PHASE_SCHEDULE: &str = "schedule";
pub const PHASE_CALLBACK: &str = "callback";

/// Result of one plugin phase, handed back to the generic runner.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub finished: bool,
    pub success: bool,
    pub message: String,
    /// Plugin-owned data merged into the instance outputs (ticket sn,
    /// job instance id, gateway response).
    pub data: Value,
    /// When not finished: seconds until the runner should re-enter the
    /// phase (or give the external callback this long to arrive).
    pub schedule_delta: Option<i64>,
    /// Unsuccessful results go through the retry controller unless the
    /// condition is final (no receivers, ticket rejected).
    pub retryable: bool,
}

impl PhaseResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            finished: true,
            success: true,
            message: message.into(),
            data: Value::Null,
            schedule_delta: None,
            retryable: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            finished: true,
            success: false,
            message: message.into(),
            data: Value::Null,
            schedule_delta: None,
            retryable: true,
        }
    }

    /// A final failure the retry controller must not re-enter.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::failure(message)
        }
    }

    pub fn pending(message: impl Into<String>, schedule_delta: i64) -> Self {
        Self {
            finished: false,
            success: false,
            message: message.into(),
            data: Value::Null,
            schedule_delta: Some(schedule_delta),
            retryable: false,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Per-plugin retry bounds applied by the runner when a phase finishes
/// unsuccessfully.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_interval_secs: i64,
}

/// Everything a phase may look at: the persisted instance, the alert it
/// serves, the action config, the rendered inputs, and (for the callback
/// phase) the external payload.
pub struct ActionContext {
    pub instance: ActionInstance,
    pub alert: Alert,
    pub config: ActionConfigRow,
    pub inputs: Value,
    pub callback_payload: Option<Value>,
}

/// One action plugin kind. Phases run in the declared order; a phase
/// that returns `pending` parks the instance until the delayed task or
/// an external callback wakes it.
#[async_trait]
pub trait ActionPlugin: Send + Sync {
    fn kind(&self) -> &'static str;

    fn phases(&self) -> &'static [&'static str] {
        &[PHASE_CREATE_TASK]
    }

    fn retry_policy(&self) -> RetryPolicy;

    async fn run_phase(&self, phase: &str, ctx: &ActionContext) -> PhaseResult;
}

/// Compile-time plugin registry keyed by the config's `plugin_id`.
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Arc<dyn ActionPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(crate::plugins::notice::NoticePlugin::new()));
        reg.register(Arc::new(crate::plugins::webhook::WebhookPlugin::new()));
        reg.register(Arc::new(crate::plugins::itsm::ItsmPlugin::new()));
        reg.register(Arc::new(crate::plugins::job::JobPlugin::new()));
        reg
    }

    pub fn register(&mut self, plugin: Arc<dyn ActionPlugin>) {
        self.plugins.insert(plugin.kind(), plugin);
    }

    pub fn get(&self, kind: &str) -> Result<&Arc<dyn ActionPlugin>> {
        self.plugins
            .get(kind)
            .ok_or_else(|| ActionError::UnknownPlugin(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
