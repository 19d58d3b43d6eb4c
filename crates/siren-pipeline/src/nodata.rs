use crate::access::ScenarioRegistry;
use siren_common::cmdb::CmdbProvider;
use siren_common::dims::record_id;
use siren_common::error::Result;
use siren_common::types::DataPoint;
use siren_storage::check_result::CheckResultStore;
use siren_strategy::model::{Strategy, NO_DATA_TAG};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The no-data detector: diffs the dimension sets a strategy's targets
/// are expected to report under against what the check-result store has
/// actually seen, and emits one synthetic point per silent dimension set.
/// The synthetic points carry the no-data dimension and flow back through
/// the detect stage, which labels them at `no_data_config.level`.
pub struct NoDataDetector {
    scenarios: Arc<ScenarioRegistry>,
    cmdb: Arc<dyn CmdbProvider>,
    check_results: Arc<CheckResultStore>,
}

impl NoDataDetector {
    pub fn new(
        scenarios: Arc<ScenarioRegistry>,
        cmdb: Arc<dyn CmdbProvider>,
        check_results: Arc<CheckResultStore>,
    ) -> Self {
        Self {
            scenarios,
            cmdb,
            check_results,
        }
    }

    /// Scans one strategy. `now` is wall time in Unix seconds; a
    /// dimension set counts as silent after `continuous` whole periods
    /// without a point.
    pub fn scan_strategy(&self, strategy: &Strategy, now: i64) -> Result<Vec<DataPoint>> {
        let Some(ndc) = strategy.no_data_config.as_ref().filter(|c| c.is_enabled) else {
            return Ok(Vec::new());
        };
        let Some(scenario) = self.scenarios.get(&strategy.scenario) else {
            return Ok(Vec::new());
        };
        let interval = strategy.interval() as i64;
        let silence_horizon = ndc.continuous as i64 * interval;
        let aligned_now = now - now.rem_euclid(interval);
        let mut points = Vec::new();

        for item in &strategy.items {
            let expected = scenario.expected_dimensions(&item.target, self.cmdb.as_ref());
            if expected.is_empty() {
                continue;
            }

            // last seen ts per projected dimension set, across all levels
            let mut seen: BTreeMap<String, i64> = BTreeMap::new();
            for detect in &strategy.detects {
                for series in self.check_results.series_for_item(
                    strategy.id,
                    item.id,
                    detect.level.level(),
                )? {
                    if series.dimensions.contains_key(NO_DATA_TAG) {
                        continue;
                    }
                    let projected = project(&series.dimensions, &ndc.agg_dimensions);
                    let key = dims_key(&projected);
                    let entry = seen.entry(key).or_insert(series.last_ts);
                    *entry = (*entry).max(series.last_ts);
                }
            }

            for dims in expected {
                let projected = project(&dims, &ndc.agg_dimensions);
                let silent = match seen.get(&dims_key(&projected)) {
                    Some(&last_ts) => now - last_ts >= silence_horizon,
                    None => true,
                };
                if !silent {
                    continue;
                }
                let mut synthetic_dims = projected.clone();
                synthetic_dims.insert(NO_DATA_TAG.to_string(), "true".to_string());
                tracing::info!(
                    strategy_id = strategy.id,
                    item_id = item.id,
                    dims = %siren_common::types::format_dimensions(&projected),
                    "expected dimension fell silent"
                );
                points.push(DataPoint {
                    record_id: record_id(&synthetic_dims, aligned_now),
                    strategy_id: strategy.id,
                    item_id: item.id,
                    time: aligned_now,
                    value: None,
                    values: Default::default(),
                    dimensions: synthetic_dims,
                });
            }
        }
        Ok(points)
    }
}

fn project(dims: &BTreeMap<String, String>, keep: &[String]) -> BTreeMap<String, String> {
    if keep.is_empty() {
        return dims.clone();
    }
    dims.iter()
        .filter(|(k, _)| keep.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn dims_key(dims: &BTreeMap<String, String>) -> String {
    siren_common::dims::dims_hash(dims)
}
