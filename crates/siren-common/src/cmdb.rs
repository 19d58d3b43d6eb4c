//! Narrow interface to the CMDB (configuration management database).
//!
//! The pipeline resolves target scopes (static IPs, topology nodes,
//! dynamic groups, service templates) through this trait; the concrete
//! catalog lives outside the core.

use std::collections::{BTreeMap, HashMap, HashSet};

/// A host as the pipeline sees it: identity plus its topology link set.
#[derive(Debug, Clone)]
pub struct Host {
    pub bk_host_id: i64,
    pub ip: String,
    pub cloud_id: i64,
    /// Every topo node id on the host's link from business root to module.
    pub topo_node_ids: HashSet<String>,
}

/// A concrete service instance resolved from a template.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub id: i64,
    pub name: String,
    pub host_id: i64,
}

/// Read-only CMDB lookups used for target resolution and computed
/// assignment-condition fields.
pub trait CmdbProvider: Send + Sync {
    fn host_by_ip(&self, ip: &str, cloud_id: i64) -> Option<Host>;

    fn host_by_id(&self, bk_host_id: i64) -> Option<Host>;

    fn hosts_in_dynamic_group(&self, group_id: &str) -> Vec<Host>;

    fn hosts_by_template(&self, template_id: i64) -> Vec<Host>;

    fn service_instances_by_template(&self, template_id: i64) -> Vec<ServiceInstance>;
}

/// In-memory provider backed by a fixed host table. Used in tests and as
/// the embedding seam for deployments that sync CMDB data periodically.
#[derive(Default)]
pub struct StaticCmdb {
    hosts: Vec<Host>,
    dynamic_groups: HashMap<String, Vec<i64>>,
    host_templates: HashMap<i64, Vec<i64>>,
    service_templates: HashMap<i64, Vec<ServiceInstance>>,
}

impl StaticCmdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&mut self, host: Host) -> &mut Self {
        self.hosts.push(host);
        self
    }

    pub fn add_dynamic_group(&mut self, group_id: &str, host_ids: Vec<i64>) -> &mut Self {
        self.dynamic_groups.insert(group_id.to_string(), host_ids);
        self
    }

    pub fn add_host_template(&mut self, template_id: i64, host_ids: Vec<i64>) -> &mut Self {
        self.host_templates.insert(template_id, host_ids);
        self
    }

    pub fn add_service_template(
        &mut self,
        template_id: i64,
        instances: Vec<ServiceInstance>,
    ) -> &mut Self {
        self.service_templates.insert(template_id, instances);
        self
    }
}

impl CmdbProvider for StaticCmdb {
    fn host_by_ip(&self, ip: &str, cloud_id: i64) -> Option<Host> {
        self.hosts
            .iter()
            .find(|h| h.ip == ip && h.cloud_id == cloud_id)
            .cloned()
    }

    fn host_by_id(&self, bk_host_id: i64) -> Option<Host> {
        self.hosts.iter().find(|h| h.bk_host_id == bk_host_id).cloned()
    }

    fn hosts_in_dynamic_group(&self, group_id: &str) -> Vec<Host> {
        let Some(ids) = self.dynamic_groups.get(group_id) else {
            return Vec::new();
        };
        self.hosts
            .iter()
            .filter(|h| ids.contains(&h.bk_host_id))
            .cloned()
            .collect()
    }

    fn hosts_by_template(&self, template_id: i64) -> Vec<Host> {
        let Some(ids) = self.host_templates.get(&template_id) else {
            return Vec::new();
        };
        self.hosts
            .iter()
            .filter(|h| ids.contains(&h.bk_host_id))
            .cloned()
            .collect()
    }

    fn service_instances_by_template(&self, template_id: i64) -> Vec<ServiceInstance> {
        self.service_templates
            .get(&template_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Builds the dimension set a host is expected to report under.
pub fn host_dimensions(host: &Host) -> BTreeMap<String, String> {
    let mut dims = BTreeMap::new();
    dims.insert("bk_target_ip".to_string(), host.ip.clone());
    dims.insert("bk_target_cloud_id".to_string(), host.cloud_id.to_string());
    dims
}
