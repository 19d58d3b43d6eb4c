use serde::{Deserialize, Serialize};
use siren_common::condition::Condition;
use siren_common::types::Severity;
use siren_storage::config_store::AssignGroupRow;

/// Role a user group plays on the alert. `Main` users become appointees
/// and may act on the alert; followers only receive notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Main,
    Follower,
}

/// One user group entry inside a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGroup {
    pub user_type: UserType,
    #[serde(default)]
    pub users: Vec<String>,
}

/// One assignment rule: a conjunction of conditions plus the effects
/// applied when it wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRule {
    pub id: i64,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub user_groups: Vec<UserGroup>,
    /// Action config ids fanned out instead of the strategy defaults.
    #[serde(default)]
    pub actions: Vec<i64>,
    #[serde(default)]
    pub additional_tags: Vec<String>,
    #[serde(default)]
    pub severity_override: Option<Severity>,
}

fn default_enabled() -> bool {
    true
}

/// An assignment group with its rules decoded out of the stored row.
#[derive(Debug, Clone)]
pub struct AssignGroup {
    pub id: i64,
    pub biz_id: i64,
    pub priority: i64,
    pub name: String,
    pub rules: Vec<AssignRule>,
}

impl AssignGroup {
    /// Decodes a stored row. A row with unreadable rules is a
    /// configuration error, not a silently empty group.
    pub fn decode(row: &AssignGroupRow) -> Result<Self, siren_common::error::PipelineError> {
        let rules: Vec<AssignRule> = serde_json::from_str(&row.rules_json).map_err(|e| {
            siren_common::error::PipelineError::Validation {
                entity: "assign_group",
                reason: format!("group {} rules not decodable: {e}", row.id),
            }
        })?;
        Ok(Self {
            id: row.id,
            biz_id: row.biz_id,
            priority: row.priority,
            name: row.name.clone(),
            rules,
        })
    }
}
