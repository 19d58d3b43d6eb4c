use crate::{DetectAlgorithm, DetectContext, DetectError};
use serde::Deserialize;

/// Config shape: `{"floor": 10.0, "ceil": 10.0}` in percent. Either bound
/// may be absent; at least one must be set.
#[derive(Debug, Deserialize)]
struct RingRatioConfig {
    #[serde(default)]
    floor: Option<f64>,
    #[serde(default)]
    ceil: Option<f64>,
}

/// Ring ratio against the immediately preceding point: anomalous when the
/// value rose more than `ceil`% or fell more than `floor`%. A point with
/// no predecessor is never anomalous.
pub struct SimpleRingRatio;

impl DetectAlgorithm for SimpleRingRatio {
    fn kind(&self) -> &'static str {
        "SimpleRingRatio"
    }

    fn detect(
        &self,
        config: &serde_json::Value,
        ctx: &DetectContext<'_>,
    ) -> Result<Option<String>, DetectError> {
        let cfg: RingRatioConfig =
            serde_json::from_value(config.clone()).map_err(|e| DetectError::BadConfig {
                kind: self.kind(),
                reason: e.to_string(),
            })?;
        if cfg.floor.is_none() && cfg.ceil.is_none() {
            return Err(DetectError::BadConfig {
                kind: self.kind(),
                reason: "neither floor nor ceil set".to_string(),
            });
        }
        let value = match ctx.value() {
            Some(v) => v,
            None => return Ok(None),
        };
        let prev = match ctx.history.last() {
            Some(&(_, v)) if v != 0.0 => v,
            _ => return Ok(None),
        };

        compare_against(self.kind(), value, prev, "previous point", cfg.floor, cfg.ceil)
    }
}

/// Shared rise/fall check for ratio-style algorithms.
pub(crate) fn compare_against(
    _kind: &'static str,
    value: f64,
    reference: f64,
    reference_name: &str,
    floor: Option<f64>,
    ceil: Option<f64>,
) -> Result<Option<String>, DetectError> {
    let change_pct = (value - reference) / reference.abs() * 100.0;
    if let Some(ceil) = ceil {
        if change_pct >= ceil {
            return Ok(Some(format!(
                "current value {value} is {change_pct:.1}% above {reference_name} {reference} (ceil {ceil}%)"
            )));
        }
    }
    if let Some(floor) = floor {
        if -change_pct >= floor {
            return Ok(Some(format!(
                "current value {value} is {:.1}% below {reference_name} {reference} (floor {floor}%)",
                -change_pct
            )));
        }
    }
    Ok(None)
}
