use crate::algorithms::events::{OsRestart, PingUnreachable, ProcPort};
use crate::algorithms::nodata::NoData;
use crate::algorithms::ratio::SimpleRingRatio;
use crate::algorithms::threshold::Threshold;
use crate::algorithms::year_round::SimpleYearRound;
use crate::{DetectAlgorithm, DetectError};
use std::collections::HashMap;
use std::sync::Arc;

/// Compile-time registry of detection algorithms keyed by the strategy's
/// algorithm `type` string.
pub struct AlgorithmRegistry {
    algorithms: HashMap<&'static str, Arc<dyn DetectAlgorithm>>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self {
            algorithms: HashMap::new(),
        }
    }

    /// A registry with every built-in algorithm installed.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(Threshold));
        reg.register(Arc::new(SimpleRingRatio));
        reg.register(Arc::new(SimpleYearRound));
        reg.register(Arc::new(OsRestart));
        reg.register(Arc::new(ProcPort));
        reg.register(Arc::new(PingUnreachable));
        reg.register(Arc::new(NoData));
        reg
    }

    pub fn register(&mut self, algorithm: Arc<dyn DetectAlgorithm>) {
        self.algorithms.insert(algorithm.kind(), algorithm);
    }

    pub fn get(&self, kind: &str) -> Result<&Arc<dyn DetectAlgorithm>, DetectError> {
        self.algorithms
            .get(kind)
            .ok_or_else(|| DetectError::UnknownAlgorithm(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.algorithms.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
