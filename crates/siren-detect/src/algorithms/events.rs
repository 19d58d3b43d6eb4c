use crate::{DetectAlgorithm, DetectContext, DetectError};
use serde::Deserialize;

fn default_max_uptime_secs() -> f64 {
    600.0
}

#[derive(Debug, Deserialize)]
struct OsRestartConfig {
    #[serde(default = "default_max_uptime_secs")]
    max_uptime_secs: f64,
}

/// Host restart detector over the reported uptime metric: a small
/// positive uptime means the host came back recently.
pub struct OsRestart;

impl DetectAlgorithm for OsRestart {
    fn kind(&self) -> &'static str {
        "OsRestart"
    }

    fn detect(
        &self,
        config: &serde_json::Value,
        ctx: &DetectContext<'_>,
    ) -> Result<Option<String>, DetectError> {
        let cfg: OsRestartConfig =
            serde_json::from_value(config.clone()).map_err(|e| DetectError::BadConfig {
                kind: self.kind(),
                reason: e.to_string(),
            })?;
        let uptime = match ctx.value() {
            Some(v) => v,
            None => return Ok(None),
        };
        if uptime > 0.0 && uptime < cfg.max_uptime_secs {
            return Ok(Some(format!("host restarted {uptime:.0}s ago")));
        }
        Ok(None)
    }
}

/// Process port detector: the collector reports 1 when the port is
/// listening, anything else means the process lost its port.
pub struct ProcPort;

impl DetectAlgorithm for ProcPort {
    fn kind(&self) -> &'static str {
        "ProcPort"
    }

    fn detect(
        &self,
        _config: &serde_json::Value,
        ctx: &DetectContext<'_>,
    ) -> Result<Option<String>, DetectError> {
        let status = match ctx.value() {
            Some(v) => v,
            None => return Ok(None),
        };
        if status == 1.0 {
            return Ok(None);
        }
        let dims = &ctx.point.dimensions;
        let proc_name = dims.get("display_name").map(String::as_str).unwrap_or("process");
        match dims.get("port") {
            Some(port) => Ok(Some(format!("{proc_name} is not listening on port {port}"))),
            None => Ok(Some(format!("{proc_name} is not listening"))),
        }
    }
}

/// Ping detector: the collector reports loss as a 0/1 flag per target.
pub struct PingUnreachable;

impl DetectAlgorithm for PingUnreachable {
    fn kind(&self) -> &'static str {
        "PingUnreachable"
    }

    fn detect(
        &self,
        _config: &serde_json::Value,
        ctx: &DetectContext<'_>,
    ) -> Result<Option<String>, DetectError> {
        let unreachable = match ctx.value() {
            Some(v) => v,
            None => return Ok(None),
        };
        if unreachable >= 1.0 {
            let target = ctx
                .point
                .dimensions
                .get("ip")
                .map(String::as_str)
                .unwrap_or("target");
            return Ok(Some(format!("{target} is unreachable by ping")));
        }
        Ok(None)
    }
}
