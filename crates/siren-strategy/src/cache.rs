use crate::model::Strategy;
use siren_common::error::{PipelineError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Source of truth for strategy configs. The cache reads through this;
/// the concrete implementation is the config service outside the core.
pub trait StrategyProvider: Send + Sync {
    /// Loads one strategy by id, `None` when it does not exist.
    fn load(&self, id: i64) -> Result<Option<Strategy>>;

    /// Current `update_time` for an id without loading the full payload.
    /// Used by the invalidation watcher.
    fn update_time(&self, id: i64) -> Result<Option<i64>>;

    /// Ids of all enabled strategies.
    fn list_ids(&self) -> Result<Vec<i64>>;
}

/// Read-through cache of strategies keyed by id. Entries are pinned to
/// their `update_time`; [`StrategyCache::refresh`] replaces any entry
/// whose update time moved.
pub struct StrategyCache {
    provider: Arc<dyn StrategyProvider>,
    entries: RwLock<HashMap<i64, Arc<Strategy>>>,
}

impl StrategyCache {
    pub fn new(provider: Arc<dyn StrategyProvider>) -> Self {
        Self {
            provider,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<i64, Arc<Strategy>>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<i64, Arc<Strategy>>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Gets a strategy, loading it on first access. Returns `None` when
    /// the provider does not know the id.
    pub fn get(&self, id: i64) -> Result<Option<Arc<Strategy>>> {
        if let Some(s) = self.read_entries().get(&id) {
            return Ok(Some(s.clone()));
        }
        let Some(loaded) = self.provider.load(id)? else {
            return Ok(None);
        };
        let arc = Arc::new(loaded);
        self.write_entries().insert(id, arc.clone());
        Ok(Some(arc))
    }

    /// All cached/loadable strategies sharing a priority group key.
    pub fn get_by_group_key(&self, group_key: &str) -> Result<Vec<Arc<Strategy>>> {
        let mut out = Vec::new();
        for id in self.provider.list_ids()? {
            if let Some(s) = self.get(id)? {
                if s.priority_group_key == group_key {
                    out.push(s);
                }
            }
        }
        // Highest priority first, ties broken by id for determinism.
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Evaluation period for a strategy; 60s when unknown.
    pub fn get_interval(&self, id: i64) -> u64 {
        match self.get(id) {
            Ok(Some(s)) => s.interval(),
            _ => crate::model::DEFAULT_AGG_INTERVAL,
        }
    }

    /// Replaces entries whose `update_time` changed and drops entries the
    /// provider no longer knows. Returns how many entries were replaced.
    pub fn refresh(&self) -> Result<usize> {
        let cached: Vec<(i64, i64)> = self
            .read_entries()
            .iter()
            .map(|(id, s)| (*id, s.update_time))
            .collect();

        let mut replaced = 0usize;
        for (id, cached_update_time) in cached {
            match self.provider.update_time(id)? {
                Some(t) if t == cached_update_time => {}
                Some(_) => {
                    let fresh = self.provider.load(id)?.ok_or_else(|| {
                        PipelineError::Persistent(format!("strategy {id} vanished during refresh"))
                    })?;
                    self.write_entries().insert(id, Arc::new(fresh));
                    replaced += 1;
                    tracing::debug!(strategy_id = id, "Strategy cache entry replaced");
                }
                None => {
                    self.write_entries().remove(&id);
                    replaced += 1;
                    tracing::debug!(strategy_id = id, "Strategy cache entry dropped");
                }
            }
        }
        Ok(replaced)
    }

    /// Ids of all enabled strategies, straight from the provider.
    pub fn list_ids(&self) -> Result<Vec<i64>> {
        self.provider.list_ids()
    }
}
