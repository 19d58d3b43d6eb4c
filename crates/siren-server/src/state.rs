use crate::config::CoreConfig;
use crate::provider::{load_cmdb, FileStrategyProvider};
use crate::selfmon::SelfMonitor;
use siren_action::{ActionProcessor, PluginRegistry, QosConfig, QosLimiter};
use siren_assign::AssignEngine;
use siren_common::cmdb::CmdbProvider;
use siren_detect::registry::AlgorithmRegistry;
use siren_pipeline::access::{AccessStage, ScenarioRegistry};
use siren_pipeline::detect::DetectStage;
use siren_pipeline::nodata::NoDataDetector;
use siren_pipeline::trigger::TriggerStage;
use siren_storage::Stores;
use siren_strategy::cache::StrategyCache;
use siren_strategy::model::{Calendar, CalendarItem, CalendarKind};
use std::path::Path;
use std::sync::Arc;

/// Everything one running core holds: stores, caches and the pipeline
/// stages, all explicitly wired here. Workers take an `Arc<CoreRuntime>`.
pub struct CoreRuntime {
    pub config: CoreConfig,
    pub stores: Stores,
    pub strategies: Arc<StrategyCache>,
    pub cmdb: Arc<dyn CmdbProvider>,
    pub access: AccessStage,
    pub detect: DetectStage,
    pub trigger: TriggerStage,
    pub nodata: NoDataDetector,
    pub assign: AssignEngine,
    pub actions: ActionProcessor,
    pub selfmon: SelfMonitor,
}

impl CoreRuntime {
    pub fn build(config: CoreConfig) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;
        let stores = Stores::open(Path::new(&config.data_dir))?;
        let cmdb: Arc<dyn CmdbProvider> = Arc::new(load_cmdb(config.cmdb_seed.as_deref())?);
        let strategies = Arc::new(StrategyCache::new(Arc::new(FileStrategyProvider::new(
            &config.strategy_dir_path(),
        ))));
        let worker_id = format!("siren.{}", std::process::id());

        let access = AccessStage::new(
            ScenarioRegistry::with_builtins(),
            cmdb.clone(),
            stores.queue.clone(),
        );
        let detect = DetectStage::new(
            AlgorithmRegistry::with_builtins(),
            stores.check_result.clone(),
            stores.snapshot.clone(),
            stores.queue.clone(),
            stores.locks.clone(),
            worker_id.clone(),
        );
        let trigger = TriggerStage::new(
            stores.alerts.clone(),
            stores.check_result.clone(),
            stores.snapshot.clone(),
            stores.queue.clone(),
            stores.locks.clone(),
            worker_id,
        );
        let nodata = NoDataDetector::new(
            Arc::new(ScenarioRegistry::with_builtins()),
            cmdb.clone(),
            stores.check_result.clone(),
        );
        let assign = AssignEngine::new(stores.config.clone(), cmdb.clone());
        let actions = ActionProcessor::new(
            PluginRegistry::with_builtins(),
            stores.actions.clone(),
            stores.alerts.clone(),
            stores.config.clone(),
            stores.queue.clone(),
            QosLimiter::new(QosConfig::default()),
        );

        Ok(Arc::new(Self {
            config,
            stores,
            strategies,
            cmdb,
            access,
            detect,
            trigger,
            nodata,
            assign,
            actions,
            selfmon: SelfMonitor::new(),
        }))
    }

    /// Current calendars, decoded from their config rows. Undecodable
    /// rows are skipped with a warning so one bad calendar cannot stall
    /// the access stage.
    pub fn calendars(&self) -> anyhow::Result<Vec<Calendar>> {
        let mut out = Vec::new();
        for row in self.stores.config.calendars()? {
            let kind = match row.kind.as_str() {
                "active" => CalendarKind::Active,
                "rest" => CalendarKind::Rest,
                other => {
                    tracing::warn!(calendar_id = row.id, kind = %other, "unknown calendar kind");
                    continue;
                }
            };
            let items: Vec<CalendarItem> = match serde_json::from_str(&row.items_json) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(calendar_id = row.id, error = %e, "calendar items undecodable");
                    continue;
                }
            };
            out.push(Calendar {
                id: row.id,
                kind,
                items,
            });
        }
        Ok(out)
    }
}
