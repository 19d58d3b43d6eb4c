use crate::registry::AlgorithmRegistry;
use crate::{DetectContext, DetectError};
use siren_common::types::Severity;
use siren_strategy::model::{AlgorithmConfig, Connector};

/// Evaluates every algorithm bound to `level` and combines the results
/// through the detect block's connector. `And` needs every algorithm to
/// fire; `Or` fires on the first hit. A level with no algorithms never
/// fires.
pub fn evaluate_level(
    registry: &AlgorithmRegistry,
    algorithms: &[AlgorithmConfig],
    level: Severity,
    connector: Connector,
    ctx: &DetectContext<'_>,
) -> Result<Option<String>, DetectError> {
    let mut messages: Vec<String> = Vec::new();
    let mut evaluated = 0usize;

    for cfg in algorithms.iter().filter(|a| a.level == level) {
        evaluated += 1;
        let algorithm = registry.get(&cfg.algorithm)?;
        match algorithm.detect(&cfg.config, ctx)? {
            Some(message) => {
                if connector == Connector::Or {
                    return Ok(Some(message));
                }
                messages.push(message);
            }
            None => {
                if connector == Connector::And {
                    return Ok(None);
                }
            }
        }
    }

    if evaluated == 0 || messages.is_empty() {
        return Ok(None);
    }
    Ok(Some(messages.join("; ")))
}
