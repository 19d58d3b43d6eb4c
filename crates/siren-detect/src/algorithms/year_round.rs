use crate::algorithms::ratio::compare_against;
use crate::{DetectAlgorithm, DetectContext, DetectError};
use serde::Deserialize;

fn default_period_secs() -> i64 {
    86400
}

fn default_tolerance_secs() -> i64 {
    60
}

/// Config shape: `{"floor": 10.0, "ceil": 10.0, "period_secs": 86400,
/// "tolerance_secs": 60}`. The reference point is the one closest to
/// `now - period_secs` within the tolerance.
#[derive(Debug, Deserialize)]
struct YearRoundConfig {
    #[serde(default)]
    floor: Option<f64>,
    #[serde(default)]
    ceil: Option<f64>,
    #[serde(default = "default_period_secs")]
    period_secs: i64,
    #[serde(default = "default_tolerance_secs")]
    tolerance_secs: i64,
}

/// Seasonal comparison against the same moment one period ago. Without a
/// reference point in the retained history the point is never anomalous.
pub struct SimpleYearRound;

impl DetectAlgorithm for SimpleYearRound {
    fn kind(&self) -> &'static str {
        "SimpleYearRound"
    }

    fn detect(
        &self,
        config: &serde_json::Value,
        ctx: &DetectContext<'_>,
    ) -> Result<Option<String>, DetectError> {
        let cfg: YearRoundConfig =
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

        let target = ctx.point.time - cfg.period_secs;
        let reference = ctx
            .history
            .iter()
            .filter(|(ts, _)| (ts - target).abs() <= cfg.tolerance_secs)
            .min_by_key(|(ts, _)| (ts - target).abs())
            .map(|&(_, v)| v);
        let reference = match reference {
            Some(v) if v != 0.0 => v,
            _ => return Ok(None),
        };

        compare_against(
            self.kind(),
            value,
            reference,
            "same moment last period",
            cfg.floor,
            cfg.ceil,
        )
    }
}
