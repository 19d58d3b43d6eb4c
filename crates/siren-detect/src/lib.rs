//! Detection algorithms for the detect stage.
//!
//! Each algorithm evaluates one data point (plus the prior points of its
//! series) against an algorithm-specific config and reports whether the
//! point is anomalous. Built-in algorithms cover static thresholds,
//! ring-ratio and year-over-year comparisons, the OsRestart / ProcPort /
//! PingUnreachable event detectors, and the synthetic NoData check.
//! Per-level results combine through the detect block's AND/OR connector.

pub mod algorithms;
pub mod detector;
pub mod registry;


use siren_common::error::PipelineError;
use siren_common::types::DataPoint;

/// What an algorithm sees for one evaluation.
pub struct DetectContext<'a> {
    pub point: &'a DataPoint,
    /// Prior points of the same series, oldest first, excluding `point`.
    /// Only numeric labels appear here.
    pub history: &'a [(i64, f64)],
}

impl DetectContext<'_> {
    /// The point's primary numeric value. Multi-metric points fall back
    /// to the `value` entry of the values map.
    pub fn value(&self) -> Option<f64> {
        self.point
            .value
            .or_else(|| self.point.values.get("value").copied())
    }
}

/// A detection algorithm evaluated per point per severity level.
///
/// Implementations are registered in [`registry::AlgorithmRegistry`] under
/// their `kind` string and looked up by the strategy's algorithm configs.
/// Returning `Some(message)` marks the point anomalous for that config.
pub trait DetectAlgorithm: Send + Sync {
    /// Registry key, matching the strategy's algorithm `type` string.
    fn kind(&self) -> &'static str;

    /// Evaluates one point. `config` is the algorithm-specific payload
    /// from the strategy; a malformed payload is a config error, not a
    /// clean result.
    fn detect(
        &self,
        config: &serde_json::Value,
        ctx: &DetectContext<'_>,
    ) -> Result<Option<String>, DetectError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("algorithm '{kind}': bad config: {reason}")]
    BadConfig { kind: &'static str, reason: String },

    #[error("unknown algorithm type: {0}")]
    UnknownAlgorithm(String),
}

/// Algorithm failures mean the strategy config is wrong for this record;
/// requeueing cannot fix that.
impl From<DetectError> for PipelineError {
    fn from(e: DetectError) -> Self {
        PipelineError::Persistent(e.to_string())
    }
}
