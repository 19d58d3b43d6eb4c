use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Alert severity level. Lower number is worse: 1 = critical, 2 = major,
/// 3 = minor.
///
/// # Examples
///
/// ```
/// use siren_common::types::Severity;
///
/// let sev = Severity::try_from(1u8).unwrap();
/// assert_eq!(sev, Severity::Critical);
/// assert!(Severity::Critical.is_worse_than(Severity::Minor));
/// assert_eq!(sev.to_string(), "critical");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn level(self) -> u8 {
        match self {
            Severity::Critical => 1,
            Severity::Major => 2,
            Severity::Minor => 3,
        }
    }

    /// A smaller level number means a more severe alert.
    pub fn is_worse_than(self, other: Severity) -> bool {
        self.level() < other.level()
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Severity::Critical),
            2 => Ok(Severity::Major),
            3 => Ok(Severity::Minor),
            _ => Err(format!("unknown severity level: {v}")),
        }
    }
}

impl From<Severity> for u8 {
    fn from(s: Severity) -> u8 {
        s.level()
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Major => write!(f, "major"),
            Severity::Minor => write!(f, "minor"),
        }
    }
}

/// Lifecycle status of an alert. `Recovered` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Abnormal,
    Recovering,
    Recovered,
    Closed,
}

impl AlertStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Recovered | AlertStatus::Closed)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertStatus::Abnormal => "ABNORMAL",
            AlertStatus::Recovering => "RECOVERING",
            AlertStatus::Recovered => "RECOVERED",
            AlertStatus::Closed => "CLOSED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ABNORMAL" => Ok(AlertStatus::Abnormal),
            "RECOVERING" => Ok(AlertStatus::Recovering),
            "RECOVERED" => Ok(AlertStatus::Recovered),
            "CLOSED" => Ok(AlertStatus::Closed),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// Operation type of an append-only alert log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLogOp {
    Create,
    Converge,
    Recover,
    Close,
    Recovering,
    DelayRecover,
    AbortRecover,
    SystemRecover,
    SystemClose,
    Ack,
    SeverityUp,
    Action,
    AlertQos,
    EventDrop,
}

impl std::fmt::Display for AlertLogOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertLogOp::Create => "CREATE",
            AlertLogOp::Converge => "CONVERGE",
            AlertLogOp::Recover => "RECOVER",
            AlertLogOp::Close => "CLOSE",
            AlertLogOp::Recovering => "RECOVERING",
            AlertLogOp::DelayRecover => "DELAY_RECOVER",
            AlertLogOp::AbortRecover => "ABORT_RECOVER",
            AlertLogOp::SystemRecover => "SYSTEM_RECOVER",
            AlertLogOp::SystemClose => "SYSTEM_CLOSE",
            AlertLogOp::Ack => "ACK",
            AlertLogOp::SeverityUp => "SEVERITY_UP",
            AlertLogOp::Action => "ACTION",
            AlertLogOp::AlertQos => "ALERT_QOS",
            AlertLogOp::EventDrop => "EVENT_DROP",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AlertLogOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AlertLogOp::Create),
            "CONVERGE" => Ok(AlertLogOp::Converge),
            "RECOVER" => Ok(AlertLogOp::Recover),
            "CLOSE" => Ok(AlertLogOp::Close),
            "RECOVERING" => Ok(AlertLogOp::Recovering),
            "DELAY_RECOVER" => Ok(AlertLogOp::DelayRecover),
            "ABORT_RECOVER" => Ok(AlertLogOp::AbortRecover),
            "SYSTEM_RECOVER" => Ok(AlertLogOp::SystemRecover),
            "SYSTEM_CLOSE" => Ok(AlertLogOp::SystemClose),
            "ACK" => Ok(AlertLogOp::Ack),
            "SEVERITY_UP" => Ok(AlertLogOp::SeverityUp),
            "ACTION" => Ok(AlertLogOp::Action),
            "ALERT_QOS" => Ok(AlertLogOp::AlertQos),
            "EVENT_DROP" => Ok(AlertLogOp::EventDrop),
            _ => Err(format!("unknown alert log op: {s}")),
        }
    }
}

/// Execution status of an action instance. Transitions only move
/// forward, except retry which re-enters `Running` from `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionStatus {
    Waiting,
    Running,
    Sleep,
    Success,
    Failure,
    Skipped,
}

impl ActionStatus {
    /// Whether a runner may pick this instance up.
    pub fn can_execute(self) -> bool {
        matches!(self, ActionStatus::Waiting | ActionStatus::Running | ActionStatus::Sleep)
    }

    pub fn is_finished(self) -> bool {
        !self.can_execute()
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionStatus::Waiting => "WAITING",
            ActionStatus::Running => "RUNNING",
            ActionStatus::Sleep => "SLEEP",
            ActionStatus::Success => "SUCCESS",
            ActionStatus::Failure => "FAILURE",
            ActionStatus::Skipped => "SKIPPED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(ActionStatus::Waiting),
            "RUNNING" => Ok(ActionStatus::Running),
            "SLEEP" => Ok(ActionStatus::Sleep),
            "SUCCESS" => Ok(ActionStatus::Success),
            "FAILURE" => Ok(ActionStatus::Failure),
            "SKIPPED" => Ok(ActionStatus::Skipped),
            _ => Err(format!("unknown action status: {s}")),
        }
    }
}

/// A raw record from the collector input feed, before any strategy is
/// attached. `time` is Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub data_id: i64,
    pub dimensions: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    #[serde(default)]
    pub value: Option<f64>,
    pub time: i64,
    #[serde(default)]
    pub description: Option<String>,
}

/// A data point bound to one strategy item, as emitted by the access
/// stage into the per-strategy queue.
///
/// `record_id = dims_hash "." ts` and is the idempotence key for every
/// downstream stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub record_id: String,
    pub strategy_id: i64,
    pub item_id: i64,
    pub time: i64,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub values: HashMap<String, f64>,
    pub dimensions: BTreeMap<String, String>,
}

/// Label stored in the check-result stream for one evaluated point:
/// either the numeric value or the `ANOMALY` sentinel.
///
/// # Examples
///
/// ```
/// use siren_common::types::CheckLabel;
///
/// assert_eq!(CheckLabel::Anomaly.to_string(), "ANOMALY");
/// assert_eq!("42.5".parse::<CheckLabel>().unwrap(), CheckLabel::Value(42.5));
/// assert_eq!("ANOMALY".parse::<CheckLabel>().unwrap(), CheckLabel::Anomaly);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckLabel {
    Value(f64),
    Anomaly,
}

impl CheckLabel {
    pub fn is_anomaly(self) -> bool {
        matches!(self, CheckLabel::Anomaly)
    }
}

impl std::fmt::Display for CheckLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckLabel::Value(v) => write!(f, "{v}"),
            CheckLabel::Anomaly => write!(f, "ANOMALY"),
        }
    }
}

impl std::str::FromStr for CheckLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ANOMALY" {
            return Ok(CheckLabel::Anomaly);
        }
        s.parse::<f64>()
            .map(CheckLabel::Value)
            .map_err(|e| format!("invalid check label '{s}': {e}"))
    }
}

/// Per-level anomaly detail inside an [`AnomalyRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyInfo {
    pub anomaly_id: String,
    pub anomaly_message: String,
    pub anomaly_time: i64,
}

/// One anomalous point as emitted by the detect stage. The map is keyed
/// by severity level; `strategy_snapshot_key` pins the strategy payload
/// the point was evaluated against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub record_id: String,
    pub data: DataPoint,
    pub anomaly: BTreeMap<u8, AnomalyInfo>,
    pub strategy_snapshot_key: String,
}

impl AnomalyRecord {
    /// The worst (numerically smallest) level present on this record.
    pub fn worst_level(&self) -> Option<Severity> {
        self.anomaly
            .keys()
            .next()
            .and_then(|l| Severity::try_from(*l).ok())
    }
}

/// Rule-match bookkeeping produced by the assignment engine, persisted on
/// the alert so re-runs are comparable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchedRuleInfo {
    pub group_id: Option<i64>,
    pub rule_id: Option<i64>,
    #[serde(default)]
    pub additional_tags: Vec<String>,
    #[serde(default)]
    pub severity_override: Option<Severity>,
}

/// Opaque extension data carried on an alert across stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertExtra {
    #[serde(default)]
    pub strategy_snapshot_key: String,
    #[serde(default)]
    pub origin_alarm: Option<serde_json::Value>,
    #[serde(default)]
    pub matched_rule_info: Option<MatchedRuleInfo>,
    #[serde(default)]
    pub is_recovering: bool,
    #[serde(default)]
    pub cycle_handle_record: Option<serde_json::Value>,
}

/// A deduplicated, state-tracked alert.
///
/// Invariants: `begin_time <= first_anomaly_time <= latest_time <=
/// end_time` (when set) and `duration >= 60`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Sortable id: 10-digit creation epoch seconds followed by a
    /// 6-digit sequence.
    pub id: String,
    pub seq_id: i64,
    pub strategy_id: i64,
    pub alert_name: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub begin_time: i64,
    pub latest_time: i64,
    #[serde(default)]
    pub end_time: Option<i64>,
    pub first_anomaly_time: i64,
    pub dimensions: BTreeMap<String, String>,
    pub dedupe_md5: String,
    /// Latest anomaly record merged into this alert.
    #[serde(default)]
    pub event: Option<AnomalyRecord>,
    #[serde(default)]
    pub assignee: Vec<String>,
    #[serde(default)]
    pub appointee: Vec<String>,
    #[serde(default)]
    pub supervisor: Vec<String>,
    #[serde(default)]
    pub follower: Vec<String>,
    #[serde(default)]
    pub is_ack: bool,
    #[serde(default)]
    pub is_ack_noticed: bool,
    #[serde(default)]
    pub is_shielded: bool,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub is_handled: bool,
    #[serde(default)]
    pub handle_stage: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub extra_info: AlertExtra,
    #[serde(default)]
    pub next_status: Option<AlertStatus>,
    #[serde(default)]
    pub next_status_time: Option<i64>,
}

impl Alert {
    /// Alert duration in seconds, floored at 60.
    pub fn duration(&self) -> i64 {
        (self.latest_time - self.first_anomaly_time).max(60)
    }
}

/// One append-only lifecycle log entry for an alert. Sorted
/// `(create_time ASC, op_type ASC)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLogEntry {
    pub id: String,
    pub alert_id: String,
    pub op_type: AlertLogOp,
    pub create_time: i64,
    pub description: String,
    /// record_id of the triggering event, when there is one.
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Formats a dimension map into a stable, human-readable string.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use siren_common::types::format_dimensions;
///
/// let mut dims = BTreeMap::new();
/// dims.insert("ip".to_string(), "127.0.0.1".to_string());
/// dims.insert("cloud_id".to_string(), "0".to_string());
/// assert_eq!(format_dimensions(&dims), "cloud_id=0, ip=127.0.0.1");
/// ```
pub fn format_dimensions(dims: &BTreeMap<String, String>) -> String {
    dims.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
