use serde::{Deserialize, Serialize};
use siren_common::condition::Condition;
use siren_common::types::Severity;

/// Default evaluation period when no query config specifies one.
pub const DEFAULT_AGG_INTERVAL: u64 = 60;

/// Dimension key injected on synthetic no-data points.
pub const NO_DATA_TAG: &str = "__NO_DATA_DIMENSION__";

/// How an alert leaves ABNORMAL when the recovery window is clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSetter {
    Recovery,
    Close,
}

impl Default for StatusSetter {
    fn default() -> Self {
        StatusSetter::Recovery
    }
}

/// How per-level algorithm results combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connector {
    And,
    Or,
}

impl Default for Connector {
    fn default() -> Self {
        Connector::And
    }
}

/// One metric query feeding an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub data_source: String,
    pub table: String,
    pub metric: String,
    #[serde(default)]
    pub agg_dimensions: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default = "default_agg_interval")]
    pub agg_interval: u64,
}

fn default_agg_interval() -> u64 {
    DEFAULT_AGG_INTERVAL
}

/// One detection algorithm bound to a severity level. `config` is the
/// algorithm-specific payload decoded by the matching plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(rename = "type")]
    pub algorithm: String,
    pub level: Severity,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Static IP target entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpTarget {
    pub ip: String,
    #[serde(default)]
    pub cloud_id: i64,
}

/// Target scope of an item, flattened into a tagged variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetScope {
    /// Match `(ip, cloud_id)` pairs exactly.
    StaticIp { hosts: Vec<IpTarget> },
    /// Host's topo link set must intersect the configured node ids.
    TopoNodes { node_ids: Vec<String> },
    /// Resolved to host ids via CMDB dynamic groups.
    DynamicGroup { group_ids: Vec<String> },
    /// Service/set/module templates resolved to concrete instances.
    Template { template_ids: Vec<i64> },
    /// No target restriction.
    All,
}

impl Default for TargetScope {
    fn default() -> Self {
        TargetScope::All
    }
}

/// One detection unit inside a strategy: a metric plus its algorithm set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub query_configs: Vec<QueryConfig>,
    pub algorithms: Vec<AlgorithmConfig>,
    #[serde(default)]
    pub target: TargetScope,
}

/// Trigger side of a detect block: open when the trigger window holds at
/// least `count` anomalous points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub check_window: u32,
    pub count: u32,
    #[serde(default)]
    pub uptime: Option<UptimeConfig>,
}

/// Recovery side of a detect block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub check_window: u32,
    #[serde(default)]
    pub status_setter: StatusSetter,
}

/// Per-level trigger/recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    pub level: Severity,
    pub trigger_config: TriggerConfig,
    pub recovery_config: RecoveryConfig,
    #[serde(default)]
    pub connector: Connector,
}

/// Daily time range, `"HH:MM"` inclusive on both ends; `start > end`
/// wraps midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// Calendar kind referenced by uptime config: `rest` occurrences turn the
/// strategy off, `active` occurrences force it on (active beats rest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarKind {
    Active,
    Rest,
}

/// One occurrence inside a calendar, Unix-second bounds inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarItem {
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    pub id: i64,
    pub kind: CalendarKind,
    #[serde(default)]
    pub items: Vec<CalendarItem>,
}

/// When the strategy is in force.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UptimeConfig {
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,
    #[serde(default)]
    pub calendar_ids: Vec<i64>,
}

/// Notification defaults used when no assignment rule matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoticeConfig {
    #[serde(default)]
    pub user_groups: Vec<String>,
    /// Seconds a notice may go unacked before escalating.
    #[serde(default)]
    pub upgrade_interval: Option<u64>,
    #[serde(default)]
    pub upgrade_user_groups: Vec<String>,
}

/// Reference to an action config to fan out on trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRef {
    pub config_id: i64,
    pub signal: String,
}

/// No-data detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoDataConfig {
    pub is_enabled: bool,
    /// Periods without any point before a dimension is declared silent.
    pub continuous: u32,
    pub level: Severity,
    #[serde(default)]
    pub agg_dimensions: Vec<String>,
}

/// The strategy aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub biz_id: i64,
    pub name: String,
    pub scenario: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub priority_group_key: String,
    pub update_time: i64,
    pub items: Vec<Item>,
    pub detects: Vec<DetectConfig>,
    #[serde(default)]
    pub notice: NoticeConfig,
    #[serde(default)]
    pub actions: Vec<ActionRef>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub no_data_config: Option<NoDataConfig>,
    #[serde(default)]
    pub uptime: Option<UptimeConfig>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Strategy {
    /// The strategy's evaluation period: minimum `agg_interval` across all
    /// query configs, 60s by default.
    pub fn interval(&self) -> u64 {
        self.items
            .iter()
            .flat_map(|item| item.query_configs.iter())
            .map(|qc| qc.agg_interval)
            .min()
            .unwrap_or(DEFAULT_AGG_INTERVAL)
    }

    pub fn item(&self, item_id: i64) -> Option<&Item> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn detect_for_level(&self, level: Severity) -> Option<&DetectConfig> {
        self.detects.iter().find(|d| d.level == level)
    }

    /// The longest trigger/recovery window configured on any level, used
    /// to size check-result retention.
    pub fn max_window(&self) -> u32 {
        self.detects
            .iter()
            .map(|d| d.trigger_config.check_window.max(d.recovery_config.check_window))
            .max()
            .unwrap_or(0)
    }

    pub fn snapshot_key(&self) -> String {
        siren_common::dims::snapshot_key(self.id, self.update_time)
    }

    /// Decodes a strategy from raw JSON, surfacing structured validation
    /// errors instead of panicking on bad payloads.
    pub fn decode(payload: &str) -> Result<Strategy, siren_common::error::PipelineError> {
        let strategy: Strategy = serde_json::from_str(payload).map_err(|e| {
            siren_common::error::PipelineError::Validation {
                entity: "strategy",
                reason: e.to_string(),
            }
        })?;
        if strategy.items.is_empty() {
            return Err(siren_common::error::PipelineError::Validation {
                entity: "strategy",
                reason: "strategy has no items".to_string(),
            });
        }
        if strategy.detects.is_empty() {
            return Err(siren_common::error::PipelineError::Validation {
                entity: "strategy",
                reason: "strategy has no detect configs".to_string(),
            });
        }
        Ok(strategy)
    }
}
