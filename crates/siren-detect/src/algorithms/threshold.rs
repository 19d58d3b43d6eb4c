use crate::{DetectAlgorithm, DetectContext, DetectError};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMethod {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FromStr for CompareMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            _ => Err(format!("unknown compare method: {s}")),
        }
    }
}

impl CompareMethod {
    fn check(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Eq => value == threshold,
            Self::Neq => value != threshold,
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Bound {
    method: String,
    threshold: f64,
}

/// Config shape: `{"threshold": [[{method, threshold}, ...], ...]}` where
/// the outer list is OR and each inner list is AND.
#[derive(Debug, Deserialize)]
struct ThresholdConfig {
    threshold: Vec<Vec<Bound>>,
    #[serde(default)]
    unit_prefix: String,
}

/// Static threshold: the point is anomalous when any AND-group of bounds
/// holds for its value.
pub struct Threshold;

impl DetectAlgorithm for Threshold {
    fn kind(&self) -> &'static str {
        "Threshold"
    }

    fn detect(
        &self,
        config: &serde_json::Value,
        ctx: &DetectContext<'_>,
    ) -> Result<Option<String>, DetectError> {
        let cfg: ThresholdConfig =
            serde_json::from_value(config.clone()).map_err(|e| DetectError::BadConfig {
                kind: self.kind(),
                reason: e.to_string(),
            })?;
        let value = match ctx.value() {
            Some(v) => v,
            None => return Ok(None),
        };

        for group in &cfg.threshold {
            if group.is_empty() {
                continue;
            }
            let mut parts = Vec::with_capacity(group.len());
            let mut all = true;
            for bound in group {
                let method =
                    CompareMethod::from_str(&bound.method).map_err(|reason| {
                        DetectError::BadConfig {
                            kind: self.kind(),
                            reason,
                        }
                    })?;
                if !method.check(value, bound.threshold) {
                    all = false;
                    break;
                }
                parts.push(format!(
                    "{} {}{}",
                    method.symbol(),
                    bound.threshold,
                    cfg.unit_prefix
                ));
            }
            if all {
                return Ok(Some(format!(
                    "current value {value}{} {}",
                    cfg.unit_prefix,
                    parts.join(" and ")
                )));
            }
        }
        Ok(None)
    }
}
