use crate::config::CmdbSeedFile;
use siren_common::cmdb::{Host, ServiceInstance, StaticCmdb};
use siren_common::error::{PipelineError, Result};
use siren_strategy::cache::StrategyProvider;
use siren_strategy::model::Strategy;
use std::path::{Path, PathBuf};

/// Strategy provider over a directory of `{id}.json` payloads. The config
/// service outside the core writes these files; the cache's refresh loop
/// picks up `update_time` changes.
pub struct FileStrategyProvider {
    dir: PathBuf,
}

impl FileStrategyProvider {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn read(&self, id: i64) -> Result<Option<Strategy>> {
        let path = self.dir.join(format!("{id}.json"));
        let payload = match std::fs::read_to_string(&path) {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::Persistent(format!(
                    "strategy file {} unreadable: {e}",
                    path.display()
                )))
            }
        };
        Strategy::decode(&payload).map(Some)
    }
}

impl StrategyProvider for FileStrategyProvider {
    fn load(&self, id: i64) -> Result<Option<Strategy>> {
        self.read(id)
    }

    fn update_time(&self, id: i64) -> Result<Option<i64>> {
        Ok(self.read(id)?.map(|s| s.update_time))
    }

    fn list_ids(&self) -> Result<Vec<i64>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PipelineError::Persistent(format!(
                    "strategy dir {} unreadable: {e}",
                    self.dir.display()
                )))
            }
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::Persistent(e.to_string()))?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(id) = stem.parse::<i64>() {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Builds the in-memory CMDB from a seed file. An absent path yields an
/// empty catalog; strategies targeting `all` still work against it.
pub fn load_cmdb(seed_path: Option<&str>) -> anyhow::Result<StaticCmdb> {
    let mut cmdb = StaticCmdb::new();
    let Some(path) = seed_path else {
        return Ok(cmdb);
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read cmdb seed '{path}': {e}"))?;
    let seed: CmdbSeedFile = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse cmdb seed '{path}': {e}"))?;

    for host in &seed.hosts {
        cmdb.add_host(Host {
            bk_host_id: host.bk_host_id,
            ip: host.ip.clone(),
            cloud_id: host.cloud_id,
            topo_node_ids: host.topo_node_ids.iter().cloned().collect(),
        });
    }
    for group in &seed.dynamic_groups {
        cmdb.add_dynamic_group(&group.group_id, group.host_ids.clone());
    }
    for template in &seed.host_templates {
        cmdb.add_host_template(template.template_id, template.host_ids.clone());
    }
    for template in &seed.service_templates {
        let instances = template
            .instances
            .iter()
            .map(|i| ServiceInstance {
                id: i.id,
                name: i.name.clone(),
                host_id: i.host_id,
            })
            .collect();
        cmdb.add_service_template(template.template_id, instances);
    }
    tracing::info!(hosts = seed.hosts.len(), "cmdb seed loaded");
    Ok(cmdb)
}
