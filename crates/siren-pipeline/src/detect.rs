use siren_common::dims::{anomaly_id, dedupe_md5};
use siren_common::error::{PipelineError, Result};
use siren_common::types::{AnomalyInfo, AnomalyRecord, CheckLabel, DataPoint};
use siren_detect::detector::evaluate_level;
use siren_detect::registry::AlgorithmRegistry;
use siren_detect::DetectContext;
use siren_storage::check_result::{CheckResultStore, SeriesKey};
use siren_storage::locks::LockStore;
use siren_storage::queue::{QueueStore, QUEUE_ANOMALY};
use siren_storage::snapshot::SnapshotStore;
use siren_strategy::model::{Strategy, NO_DATA_TAG};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How many prior points an algorithm may look back on. Sized for a day
/// of minute-resolution points so year-over-year comparisons at daily
/// period work from the retained stream.
const HISTORY_POINTS: u32 = 1440;

/// Result of one detect batch.
pub struct DetectOutcome {
    pub points: usize,
    pub anomalies: usize,
}

/// The detect stage: evaluates algorithms per point per level, writes
/// every evaluated point to the check-result store, and emits anomaly
/// records to the anomaly queue.
///
/// One strategy is processed by one worker at a time, guarded by the
/// per-strategy advisory lock; the lock is released before any queue push.
pub struct DetectStage {
    registry: AlgorithmRegistry,
    check_results: Arc<CheckResultStore>,
    snapshots: Arc<SnapshotStore>,
    queue: Arc<QueueStore>,
    locks: Arc<LockStore>,
    worker_id: String,
}

impl DetectStage {
    pub fn new(
        registry: AlgorithmRegistry,
        check_results: Arc<CheckResultStore>,
        snapshots: Arc<SnapshotStore>,
        queue: Arc<QueueStore>,
        locks: Arc<LockStore>,
        worker_id: String,
    ) -> Self {
        Self {
            registry,
            check_results,
            snapshots,
            queue,
            locks,
            worker_id,
        }
    }

    /// Processes one leased batch for one strategy. Points are evaluated
    /// in non-decreasing timestamp order; re-processing a point is
    /// harmless because check-result writes are keyed by `(series, ts)`
    /// and downstream consumers dedupe on `record_id`.
    pub fn process_batch(
        &self,
        strategy: &Strategy,
        mut points: Vec<DataPoint>,
    ) -> Result<DetectOutcome> {
        let lock_name = format!("detect.{}", strategy.id);
        let lock_ttl = 5 * strategy.interval() as i64;
        if !self.locks.acquire(&lock_name, &self.worker_id, lock_ttl)? {
            return Err(PipelineError::Transient(format!(
                "strategy {} is locked by another detect worker",
                strategy.id
            )));
        }

        let result = self.process_locked(strategy, &mut points);
        self.locks.release(&lock_name, &self.worker_id)?;

        let anomalies = result?;
        let emitted = anomalies.len();
        // lock is already released; queue pushes happen outside it
        for record in &anomalies {
            self.queue.push(QUEUE_ANOMALY, record)?;
        }
        Ok(DetectOutcome {
            points: points.len(),
            anomalies: emitted,
        })
    }

    fn process_locked(
        &self,
        strategy: &Strategy,
        points: &mut [DataPoint],
    ) -> Result<Vec<AnomalyRecord>> {
        points.sort_by_key(|p| p.time);
        let retention = retention_secs(strategy);
        let keep = retention_points(strategy);
        let snapshot_key = strategy.snapshot_key();
        let mut snapshot_written = false;
        let mut anomalies = Vec::new();

        for point in points.iter() {
            if strategy.item(point.item_id).is_none() {
                return Err(PipelineError::StrategyItemNotFound {
                    strategy_id: strategy.id,
                    item_id: point.item_id,
                });
            }
            let is_no_data_point = point.dimensions.contains_key(NO_DATA_TAG);
            let mut anomaly: BTreeMap<u8, AnomalyInfo> = BTreeMap::new();

            for detect in &strategy.detects {
                if is_no_data_point {
                    // synthetic points only ever fire the no-data level
                    let Some(ndc) = strategy.no_data_config.as_ref().filter(|c| c.is_enabled)
                    else {
                        continue;
                    };
                    if detect.level != ndc.level {
                        continue;
                    }
                }

                let key = SeriesKey {
                    strategy_id: strategy.id,
                    item_id: point.item_id,
                    dimensions: point.dimensions.clone(),
                    level: detect.level.level(),
                };
                let history_raw =
                    self.check_results
                        .recent_points(&key, point.time - 1, HISTORY_POINTS)?;
                let history: Vec<(i64, f64)> = history_raw
                    .iter()
                    .filter_map(|(ts, label)| match label {
                        CheckLabel::Value(v) => Some((*ts, *v)),
                        CheckLabel::Anomaly => None,
                    })
                    .collect();
                let ctx = DetectContext {
                    point,
                    history: &history,
                };

                let message = if is_no_data_point {
                    self.registry.get("NoData")?.detect(&serde_json::Value::Null, &ctx)?
                } else {
                    let item = strategy.item(point.item_id).ok_or(
                        PipelineError::StrategyItemNotFound {
                            strategy_id: strategy.id,
                            item_id: point.item_id,
                        },
                    )?;
                    evaluate_level(
                        &self.registry,
                        &item.algorithms,
                        detect.level,
                        detect.connector,
                        &ctx,
                    )?
                };

                match message {
                    Some(message) => {
                        self.check_results
                            .append(&key, point.time, CheckLabel::Anomaly, retention, keep)?;
                        anomaly.insert(
                            detect.level.level(),
                            AnomalyInfo {
                                anomaly_id: anomaly_id(
                                    &point.record_id,
                                    strategy.id,
                                    point.item_id,
                                    detect.level.level(),
                                ),
                                anomaly_message: message,
                                anomaly_time: point.time,
                            },
                        );
                    }
                    None => {
                        if let Some(value) = point.value {
                            self.check_results.append(
                                &key,
                                point.time,
                                CheckLabel::Value(value),
                                retention,
                                keep,
                            )?;
                        }
                    }
                }
            }

            if anomaly.is_empty() {
                continue;
            }
            if !snapshot_written {
                let payload = serde_json::to_string(strategy).map_err(|e| {
                    PipelineError::Persistent(format!("strategy {} not serializable: {e}", strategy.id))
                })?;
                self.snapshots
                    .put(&snapshot_key, strategy.id, strategy.update_time, &payload)?;
                snapshot_written = true;
            }
            tracing::debug!(
                strategy_id = strategy.id,
                record_id = %point.record_id,
                levels = anomaly.len(),
                "anomaly detected"
            );
            anomalies.push(AnomalyRecord {
                record_id: point.record_id.clone(),
                data: point.clone(),
                anomaly,
                strategy_snapshot_key: snapshot_key.clone(),
            });
        }
        Ok(anomalies)
    }
}

/// Check-result retention: generously past the largest window so trimming
/// never starves a trigger or recovery read.
pub fn retention_secs(strategy: &Strategy) -> i64 {
    let window_span = strategy.max_window() as i64 * strategy.interval() as i64 * 4;
    window_span.max(3600)
}

/// Point-count floor for trimming: a series that goes quiet for longer
/// than retention still keeps its largest trigger/recovery window.
pub fn retention_points(strategy: &Strategy) -> u32 {
    strategy.max_window().max(1)
}

/// Dedupe key for the series an anomaly record belongs to.
pub fn record_dedupe_md5(record: &AnomalyRecord) -> String {
    dedupe_md5(
        record.data.strategy_id,
        record.data.item_id,
        &record.data.dimensions,
    )
}
