use chrono::{DateTime, Utc};
use siren_common::cmdb::{host_dimensions, CmdbProvider};
use siren_common::dims::record_id;
use siren_common::error::Result;
use siren_common::types::{DataPoint, RawRecord};
use siren_storage::queue::{QueueStore, QUEUE_DETECT};
use siren_strategy::model::{Calendar, Strategy, TargetScope};
use siren_strategy::uptime::in_alarm_time;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A monitored-object kind. Scenarios resolve target scopes to concrete
/// dimension sets and decide whether a record's dimensions fall inside a
/// scope; selection is by the strategy's `scenario` string.
pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a record with these dimensions belongs to the scope.
    fn matches_target(
        &self,
        scope: &TargetScope,
        dims: &BTreeMap<String, String>,
        cmdb: &dyn CmdbProvider,
    ) -> bool;

    /// The dimension sets the scope is expected to report under. Scopes
    /// that cannot be enumerated (discovery-driven ones) return empty.
    fn expected_dimensions(
        &self,
        scope: &TargetScope,
        cmdb: &dyn CmdbProvider,
    ) -> Vec<BTreeMap<String, String>>;
}

fn record_ip(dims: &BTreeMap<String, String>) -> Option<&str> {
    dims.get("bk_target_ip")
        .or_else(|| dims.get("ip"))
        .map(String::as_str)
}

fn record_cloud_id(dims: &BTreeMap<String, String>) -> i64 {
    dims.get("bk_target_cloud_id")
        .or_else(|| dims.get("bk_cloud_id"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Host monitoring: records are keyed by `(ip, cloud_id)`.
pub struct HostScenario;

impl Scenario for HostScenario {
    fn name(&self) -> &'static str {
        "host"
    }

    fn matches_target(
        &self,
        scope: &TargetScope,
        dims: &BTreeMap<String, String>,
        cmdb: &dyn CmdbProvider,
    ) -> bool {
        match scope {
            TargetScope::All => true,
            TargetScope::StaticIp { hosts } => match record_ip(dims) {
                Some(ip) => {
                    let cloud_id = record_cloud_id(dims);
                    hosts.iter().any(|t| t.ip == ip && t.cloud_id == cloud_id)
                }
                None => false,
            },
            TargetScope::TopoNodes { node_ids } => {
                let Some(ip) = record_ip(dims) else {
                    return false;
                };
                let Some(host) = cmdb.host_by_ip(ip, record_cloud_id(dims)) else {
                    return false;
                };
                node_ids.iter().any(|n| host.topo_node_ids.contains(n))
            }
            TargetScope::DynamicGroup { group_ids } => {
                let Some(ip) = record_ip(dims) else {
                    return false;
                };
                let cloud_id = record_cloud_id(dims);
                group_ids.iter().any(|g| {
                    cmdb.hosts_in_dynamic_group(g)
                        .iter()
                        .any(|h| h.ip == ip && h.cloud_id == cloud_id)
                })
            }
            TargetScope::Template { template_ids } => {
                let Some(ip) = record_ip(dims) else {
                    return false;
                };
                let cloud_id = record_cloud_id(dims);
                template_ids.iter().any(|t| {
                    cmdb.hosts_by_template(*t)
                        .iter()
                        .any(|h| h.ip == ip && h.cloud_id == cloud_id)
                })
            }
        }
    }

    fn expected_dimensions(
        &self,
        scope: &TargetScope,
        cmdb: &dyn CmdbProvider,
    ) -> Vec<BTreeMap<String, String>> {
        match scope {
            TargetScope::StaticIp { hosts } => hosts
                .iter()
                .map(|t| {
                    let mut dims = BTreeMap::new();
                    dims.insert("bk_target_ip".to_string(), t.ip.clone());
                    dims.insert("bk_target_cloud_id".to_string(), t.cloud_id.to_string());
                    dims
                })
                .collect(),
            TargetScope::DynamicGroup { group_ids } => group_ids
                .iter()
                .flat_map(|g| cmdb.hosts_in_dynamic_group(g))
                .map(|h| host_dimensions(&h))
                .collect(),
            TargetScope::Template { template_ids } => template_ids
                .iter()
                .flat_map(|t| cmdb.hosts_by_template(*t))
                .map(|h| host_dimensions(&h))
                .collect(),
            // Topo scopes and unrestricted targets are discovery-driven.
            TargetScope::TopoNodes { .. } | TargetScope::All => Vec::new(),
        }
    }
}

/// Service monitoring: records are keyed by `service_instance_id`.
pub struct ServiceScenario;

impl Scenario for ServiceScenario {
    fn name(&self) -> &'static str {
        "service"
    }

    fn matches_target(
        &self,
        scope: &TargetScope,
        dims: &BTreeMap<String, String>,
        cmdb: &dyn CmdbProvider,
    ) -> bool {
        match scope {
            TargetScope::All => true,
            TargetScope::Template { template_ids } => {
                let Some(instance_id) = dims
                    .get("service_instance_id")
                    .and_then(|v| v.parse::<i64>().ok())
                else {
                    return false;
                };
                template_ids.iter().any(|t| {
                    cmdb.service_instances_by_template(*t)
                        .iter()
                        .any(|i| i.id == instance_id)
                })
            }
            _ => false,
        }
    }

    fn expected_dimensions(
        &self,
        scope: &TargetScope,
        cmdb: &dyn CmdbProvider,
    ) -> Vec<BTreeMap<String, String>> {
        match scope {
            TargetScope::Template { template_ids } => template_ids
                .iter()
                .flat_map(|t| cmdb.service_instances_by_template(*t))
                .map(|i| {
                    let mut dims = BTreeMap::new();
                    dims.insert("service_instance_id".to_string(), i.id.to_string());
                    dims
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Kubernetes monitoring: workloads are discovered, not enumerated, so
/// only the unrestricted scope applies.
pub struct KubernetesScenario;

impl Scenario for KubernetesScenario {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn matches_target(
        &self,
        scope: &TargetScope,
        _dims: &BTreeMap<String, String>,
        _cmdb: &dyn CmdbProvider,
    ) -> bool {
        matches!(scope, TargetScope::All)
    }

    fn expected_dimensions(
        &self,
        _scope: &TargetScope,
        _cmdb: &dyn CmdbProvider,
    ) -> Vec<BTreeMap<String, String>> {
        Vec::new()
    }
}

/// Registration map keyed by the strategy's `scenario` string.
pub struct ScenarioRegistry {
    scenarios: HashMap<&'static str, Arc<dyn Scenario>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self {
            scenarios: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(HostScenario));
        reg.register(Arc::new(ServiceScenario));
        reg.register(Arc::new(KubernetesScenario));
        reg
    }

    pub fn register(&mut self, scenario: Arc<dyn Scenario>) {
        self.scenarios.insert(scenario.name(), scenario);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Scenario>> {
        self.scenarios.get(name)
    }
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The per-strategy queue a strategy's points land on.
pub fn strategy_queue(strategy_id: i64) -> String {
    format!("{QUEUE_DETECT}.{strategy_id}")
}

/// The access stage: routes raw records to the strategies that want them.
pub struct AccessStage {
    scenarios: ScenarioRegistry,
    cmdb: Arc<dyn CmdbProvider>,
    queue: Arc<QueueStore>,
}

impl AccessStage {
    pub fn new(scenarios: ScenarioRegistry, cmdb: Arc<dyn CmdbProvider>, queue: Arc<QueueStore>) -> Self {
        Self {
            scenarios,
            cmdb,
            queue,
        }
    }

    pub fn scenarios(&self) -> &ScenarioRegistry {
        &self.scenarios
    }

    /// Routes one raw record against the candidate strategies and emits a
    /// data point per matching item onto that strategy's queue. Returns
    /// how many points were emitted.
    pub fn process_record(
        &self,
        record: &RawRecord,
        strategies: &[Arc<Strategy>],
        calendars: &[Calendar],
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let mut emitted = 0u32;
        for strategy in strategies {
            if !strategy.is_enabled {
                continue;
            }
            let (in_force, _) = in_alarm_time(strategy.uptime.as_ref(), calendars, now);
            if !in_force {
                continue;
            }
            let Some(scenario) = self.scenarios.get(&strategy.scenario) else {
                tracing::warn!(
                    strategy_id = strategy.id,
                    scenario = %strategy.scenario,
                    "unknown scenario, strategy skipped"
                );
                continue;
            };

            for item in &strategy.items {
                if !scenario.matches_target(&item.target, &record.dimensions, self.cmdb.as_ref()) {
                    continue;
                }
                let Some(qc) = item.query_configs.iter().find(|qc| {
                    qc.conditions.iter().all(|c| {
                        let value = record.dimensions.get(&c.field).map(String::as_str);
                        c.matches(value.unwrap_or(""))
                    })
                }) else {
                    continue;
                };

                let value = record
                    .metrics
                    .get(&qc.metric)
                    .copied()
                    .or(record.value);
                let dimensions = if qc.agg_dimensions.is_empty() {
                    record.dimensions.clone()
                } else {
                    record
                        .dimensions
                        .iter()
                        .filter(|(k, _)| qc.agg_dimensions.contains(k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                };

                let point = DataPoint {
                    record_id: record_id(&dimensions, record.time),
                    strategy_id: strategy.id,
                    item_id: item.id,
                    time: record.time,
                    value,
                    values: record.metrics.clone(),
                    dimensions,
                };
                self.queue.push(&strategy_queue(strategy.id), &point)?;
                emitted += 1;
            }
        }
        Ok(emitted)
    }
}
