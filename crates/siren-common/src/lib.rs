//! Shared types and helpers for the siren alert pipeline.
//!
//! Everything that crosses a stage boundary lives here: raw input records,
//! per-strategy data points, anomaly records, alerts and their lifecycle
//! log, plus the dimension-hashing and id-generation helpers every stage
//! relies on for idempotence.

pub mod clock;
pub mod cmdb;
pub mod condition;
pub mod dims;
pub mod error;
pub mod id;
pub mod types;
