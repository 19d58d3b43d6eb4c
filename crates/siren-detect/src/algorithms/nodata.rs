use crate::{DetectAlgorithm, DetectContext, DetectError};
use siren_strategy::model::NO_DATA_TAG;

/// Marks the synthetic points produced by the no-data detector as
/// anomalous. Real points never carry the no-data dimension, so the
/// algorithm is inert on normal traffic.
pub struct NoData;

impl DetectAlgorithm for NoData {
    fn kind(&self) -> &'static str {
        "NoData"
    }

    fn detect(
        &self,
        _config: &serde_json::Value,
        ctx: &DetectContext<'_>,
    ) -> Result<Option<String>, DetectError> {
        if ctx.point.dimensions.contains_key(NO_DATA_TAG) {
            return Ok(Some("expected dimension reported no data".to_string()));
        }
        Ok(None)
    }
}
