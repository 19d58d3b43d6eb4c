use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Port the callback/health HTTP listener binds.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_access_workers")]
    pub access_workers: u32,
    #[serde(default = "default_detect_workers")]
    pub detect_workers: u32,
    #[serde(default = "default_trigger_workers")]
    pub trigger_workers: u32,
    #[serde(default = "default_action_workers")]
    pub action_workers: u32,
    /// Items taken per queue lease.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Lease visibility timeout in seconds.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,
    /// An ABNORMAL alert with no fresh anomaly for this long is
    /// system-closed by the periodic scan.
    #[serde(default = "default_system_close_secs")]
    pub system_close_secs: i64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_nodata_interval_secs")]
    pub nodata_interval_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_selfmon_flush_secs")]
    pub selfmon_flush_secs: u64,
    /// Daily alert partitions older than this are dropped.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Shared secret for callback HMAC verification. Empty means a
    /// random secret is generated at startup (callbacks then require a
    /// restart-stable secret to work, so set it in production).
    #[serde(default)]
    pub signature_secret: String,
    /// Directory of `{strategy_id}.json` strategy payloads. Relative
    /// paths resolve against `data_dir`.
    #[serde(default = "default_strategy_dir")]
    pub strategy_dir: String,
    /// Optional CMDB seed file (hosts, dynamic groups, templates).
    #[serde(default)]
    pub cmdb_seed: Option<String>,
}

fn default_http_port() -> u16 {
    8200
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_access_workers() -> u32 {
    2
}
fn default_detect_workers() -> u32 {
    4
}
fn default_trigger_workers() -> u32 {
    2
}
fn default_action_workers() -> u32 {
    2
}
fn default_batch_size() -> u32 {
    100
}
fn default_lease_secs() -> i64 {
    60
}
fn default_system_close_secs() -> i64 {
    7200
}
fn default_scan_interval_secs() -> u64 {
    60
}
fn default_nodata_interval_secs() -> u64 {
    60
}
fn default_cleanup_interval_secs() -> u64 {
    3600
}
fn default_selfmon_flush_secs() -> u64 {
    60
}
fn default_retention_days() -> u32 {
    30
}
fn default_strategy_dir() -> String {
    "strategies".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            access_workers: default_access_workers(),
            detect_workers: default_detect_workers(),
            trigger_workers: default_trigger_workers(),
            action_workers: default_action_workers(),
            batch_size: default_batch_size(),
            lease_secs: default_lease_secs(),
            system_close_secs: default_system_close_secs(),
            scan_interval_secs: default_scan_interval_secs(),
            nodata_interval_secs: default_nodata_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            selfmon_flush_secs: default_selfmon_flush_secs(),
            retention_days: default_retention_days(),
            signature_secret: String::new(),
            strategy_dir: default_strategy_dir(),
            cmdb_seed: None,
        }
    }
}

impl CoreConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Environment variables override the file. `STORE_URL`/`QUEUE_URL`
    /// accept `sqlite://<dir>`; both address the same embedded database,
    /// so a `QUEUE_URL` that disagrees with the store is rejected.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = lookup("ACCESS_WORKERS").and_then(|v| v.parse().ok()) {
            self.access_workers = n;
        }
        if let Some(n) = lookup("DETECT_WORKERS").and_then(|v| v.parse().ok()) {
            self.detect_workers = n;
        }
        if let Some(n) = lookup("TRIGGER_WORKERS").and_then(|v| v.parse().ok()) {
            self.trigger_workers = n;
        }
        if let Some(n) = lookup("ACTION_WORKERS").and_then(|v| v.parse().ok()) {
            self.action_workers = n;
        }
        if let Some(secret) = lookup("SIGNATURE_SECRET") {
            self.signature_secret = secret;
        }
        if let Some(url) = lookup("STORE_URL") {
            self.data_dir = strip_sqlite_scheme(&url).to_string();
        }
        if let Some(url) = lookup("QUEUE_URL") {
            let dir = strip_sqlite_scheme(&url);
            if dir != self.data_dir {
                tracing::warn!(
                    queue_url = %url,
                    data_dir = %self.data_dir,
                    "QUEUE_URL ignored: queues share the core store"
                );
            }
        }
    }

    pub fn strategy_dir_path(&self) -> std::path::PathBuf {
        let dir = std::path::Path::new(&self.strategy_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::path::Path::new(&self.data_dir).join(dir)
        }
    }
}

fn strip_sqlite_scheme(url: &str) -> &str {
    url.strip_prefix("sqlite://").unwrap_or(url)
}

// ---- Seed file types (used by `init-assign-groups` / `init-action-configs`) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignSeedFile {
    #[serde(default)]
    pub groups: Vec<SeedAssignGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedAssignGroup {
    pub id: i64,
    pub biz_id: i64,
    #[serde(default)]
    pub priority: i64,
    pub name: String,
    #[serde(default = "default_seed_source")]
    pub source: String,
    /// Rule list in the shape `siren-assign` decodes.
    pub rules: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSeedFile {
    #[serde(default)]
    pub configs: Vec<SeedActionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedActionConfig {
    pub id: i64,
    pub plugin_id: String,
    pub name: String,
    pub biz_id: i64,
    #[serde(default = "default_seed_timeout_secs")]
    pub timeout_secs: i64,
    /// Jinja-templated plugin inputs, rendered per dispatch.
    pub template_detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdbSeedFile {
    #[serde(default)]
    pub hosts: Vec<SeedHost>,
    #[serde(default)]
    pub dynamic_groups: Vec<SeedDynamicGroup>,
    #[serde(default)]
    pub host_templates: Vec<SeedTemplate>,
    #[serde(default)]
    pub service_templates: Vec<SeedServiceTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedHost {
    pub bk_host_id: i64,
    pub ip: String,
    #[serde(default)]
    pub cloud_id: i64,
    #[serde(default)]
    pub topo_node_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedDynamicGroup {
    pub group_id: String,
    pub host_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTemplate {
    pub template_id: i64,
    pub host_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedServiceTemplate {
    pub template_id: i64,
    pub instances: Vec<SeedServiceInstance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedServiceInstance {
    pub id: i64,
    pub name: String,
    pub host_id: i64,
}

fn default_seed_source() -> String {
    "seed".to_string()
}

fn default_seed_timeout_secs() -> i64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: CoreConfig = toml::from_str("").unwrap();
        assert_eq!(config.http_port, 8200);
        assert_eq!(config.detect_workers, 4);
        assert_eq!(config.system_close_secs, 7200);
        assert_eq!(config.retention_days, 30);
        assert!(config.signature_secret.is_empty());
    }

    #[test]
    fn env_overrides_beat_the_file() {
        let mut config: CoreConfig =
            toml::from_str("detect_workers = 8\ndata_dir = \"/var/siren\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("DETECT_WORKERS", "16"),
            ("SIGNATURE_SECRET", "s3cret"),
            ("STORE_URL", "sqlite:///srv/siren"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.detect_workers, 16);
        assert_eq!(config.signature_secret, "s3cret");
        assert_eq!(config.data_dir, "/srv/siren");
    }

    #[test]
    fn unparsable_worker_count_is_ignored() {
        let mut config = CoreConfig::default();
        config.apply_overrides(|key| {
            (key == "TRIGGER_WORKERS").then(|| "not-a-number".to_string())
        });
        assert_eq!(config.trigger_workers, 2);
    }

    #[test]
    fn relative_strategy_dir_resolves_under_data_dir() {
        let mut config = CoreConfig::default();
        config.data_dir = "/var/siren".to_string();
        assert_eq!(
            config.strategy_dir_path(),
            std::path::Path::new("/var/siren/strategies")
        );
    }
}
