//! The worker stages of the alert pipeline.
//!
//! Raw records enter through the access stage, which resolves target
//! scopes and fans points out to per-strategy queues. The detect stage
//! evaluates algorithms and writes check results; the trigger/recovery
//! evaluator owns the alert lifecycle state machine; the no-data detector
//! feeds synthetic points back into detect when expected dimensions fall
//! silent. Every stage reads from and writes to the durable stores, so a
//! crash between any two steps loses nothing.

pub mod access;
pub mod backoff;
pub mod detect;
pub mod nodata;
pub mod query;
pub mod trigger;
