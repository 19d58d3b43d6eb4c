//! Strategy aggregate model, read-through cache, and in-force calendar
//! logic.
//!
//! A strategy is the user-defined definition of what to detect, at what
//! level, over which targets, and what to do when firing. It is loaded as
//! a flat aggregate root by id; in-flight alarms never read the live
//! config but a frozen snapshot keyed by `(strategy_id, update_time)`.

pub mod cache;
pub mod model;
pub mod uptime;

#[cfg(test)]
mod tests;

pub use cache::{StrategyCache, StrategyProvider};
pub use model::*;
