use crate::model::{AssignGroup, AssignRule, UserType};
use siren_common::cmdb::CmdbProvider;
use siren_common::error::Result;
use siren_common::types::{Alert, MatchedRuleInfo, Severity};
use siren_storage::config_store::ConfigStore;
use siren_strategy::model::Strategy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How long a decoded group list may be served from the per-process
/// cache before it is re-read from the store.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// The routing decision for one alert: who gets it, at what severity,
/// with which extra tags and which actions.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    pub appointee: Vec<String>,
    pub follower: Vec<String>,
    pub severity_override: Option<Severity>,
    pub additional_tags: Vec<String>,
    /// Action config ids to fan out. From the winning rule, or the
    /// strategy defaults when no rule matched.
    pub action_config_ids: Vec<i64>,
    pub matched: MatchedRuleInfo,
}

impl Assignment {
    /// Writes the decision onto the alert. Followers are notified but
    /// never land in the writable assignee set.
    pub fn apply_to(&self, alert: &mut Alert) {
        alert.appointee = self.appointee.clone();
        alert.assignee = self.appointee.clone();
        alert.follower = self.follower.clone();
        if let Some(severity) = self.severity_override {
            alert.severity = severity;
        }
        for tag in &self.additional_tags {
            if !alert.labels.contains(tag) {
                alert.labels.push(tag.clone());
            }
        }
        alert.extra_info.matched_rule_info = Some(self.matched.clone());
    }
}

/// The assignment engine. Groups are evaluated highest priority first
/// (id ascending as the tie-break); the first matching rule of the
/// winning group applies and everything below is ignored.
pub struct AssignEngine {
    config: Arc<ConfigStore>,
    cmdb: Arc<dyn CmdbProvider>,
    cache: Mutex<HashMap<i64, (Instant, Arc<Vec<AssignGroup>>)>>,
}

impl AssignEngine {
    pub fn new(config: Arc<ConfigStore>, cmdb: Arc<dyn CmdbProvider>) -> Self {
        Self {
            config,
            cmdb,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drops the cached groups for one business, forcing a re-read on
    /// the next assignment. Called when group config changes.
    pub fn invalidate(&self, biz_id: i64) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.remove(&biz_id);
    }

    fn groups_for(&self, biz_id: i64) -> Result<Arc<Vec<AssignGroup>>> {
        {
            let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some((loaded_at, groups)) = cache.get(&biz_id) {
                if loaded_at.elapsed() < CACHE_TTL {
                    return Ok(groups.clone());
                }
            }
        }
        // store returns priority DESC, id ASC
        let rows = self.config.assign_groups(biz_id)?;
        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            match AssignGroup::decode(row) {
                Ok(group) => groups.push(group),
                Err(e) => {
                    tracing::warn!(group_id = row.id, error = %e, "assign group skipped");
                }
            }
        }
        let groups = Arc::new(groups);
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.insert(biz_id, (Instant::now(), groups.clone()));
        Ok(groups)
    }

    /// Routes one alert. Never fails on rule evaluation; a condition
    /// over an absent field simply compares against the empty string.
    pub fn assign(&self, alert: &Alert, strategy: &Strategy) -> Result<Assignment> {
        let groups = self.groups_for(strategy.biz_id)?;
        for group in groups.iter() {
            for rule in &group.rules {
                if !rule.is_enabled {
                    continue;
                }
                if self.rule_matches(rule, alert, strategy) {
                    tracing::debug!(
                        alert_id = %alert.id,
                        group_id = group.id,
                        rule_id = rule.id,
                        "assignment rule matched"
                    );
                    return Ok(self.build(rule, group));
                }
            }
        }
        Ok(self.fallback(strategy))
    }

    fn rule_matches(&self, rule: &AssignRule, alert: &Alert, strategy: &Strategy) -> bool {
        rule.conditions.iter().all(|c| {
            let value = self.resolve_field(&c.field, alert, strategy);
            c.matches(&value)
        })
    }

    /// A condition field comes from the alert itself, the event
    /// dimensions, or a computed scope (`host.*` resolves via CMDB,
    /// `is_empty_users` reflects the strategy's default assignees).
    fn resolve_field(&self, field: &str, alert: &Alert, strategy: &Strategy) -> String {
        match field {
            "is_empty_users" => {
                let empty = strategy
                    .notice
                    .user_groups
                    .iter()
                    .all(|g| g.trim().is_empty());
                return empty.to_string();
            }
            "severity" | "alert.severity" => return alert.severity.level().to_string(),
            "strategy_id" | "alert.strategy_id" => return alert.strategy_id.to_string(),
            "alert.name" => return alert.alert_name.clone(),
            "alert.status" => return alert.status.to_string(),
            _ => {}
        }
        if let Some(sub) = field.strip_prefix("host.") {
            return self.resolve_host_field(sub, alert);
        }
        alert.dimensions.get(field).cloned().unwrap_or_default()
    }

    fn resolve_host_field(&self, sub: &str, alert: &Alert) -> String {
        let Some(ip) = alert
            .dimensions
            .get("bk_target_ip")
            .or_else(|| alert.dimensions.get("ip"))
        else {
            return String::new();
        };
        let cloud_id = alert
            .dimensions
            .get("bk_target_cloud_id")
            .or_else(|| alert.dimensions.get("bk_cloud_id"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let Some(host) = self.cmdb.host_by_ip(ip, cloud_id) else {
            return String::new();
        };
        match sub {
            "bk_host_id" => host.bk_host_id.to_string(),
            "ip" => host.ip,
            "cloud_id" => host.cloud_id.to_string(),
            _ => String::new(),
        }
    }

    fn build(&self, rule: &AssignRule, group: &AssignGroup) -> Assignment {
        let mut appointee = Vec::new();
        let mut follower = Vec::new();
        for ug in &rule.user_groups {
            let bucket = match ug.user_type {
                UserType::Main => &mut appointee,
                UserType::Follower => &mut follower,
            };
            for user in &ug.users {
                if !bucket.contains(user) {
                    bucket.push(user.clone());
                }
            }
        }
        Assignment {
            appointee,
            follower,
            severity_override: rule.severity_override,
            additional_tags: rule.additional_tags.clone(),
            action_config_ids: rule.actions.clone(),
            matched: MatchedRuleInfo {
                group_id: Some(group.id),
                rule_id: Some(rule.id),
                additional_tags: rule.additional_tags.clone(),
                severity_override: rule.severity_override,
            },
        }
    }

    /// No group matched: the strategy's own notice/action defaults apply
    /// and `matched_rule_info` records the absence of a match.
    fn fallback(&self, strategy: &Strategy) -> Assignment {
        Assignment {
            appointee: strategy.notice.user_groups.clone(),
            follower: Vec::new(),
            severity_override: None,
            additional_tags: Vec::new(),
            action_config_ids: strategy.actions.iter().map(|a| a.config_id).collect(),
            matched: MatchedRuleInfo::default(),
        }
    }
}
