//! Alert assignment: priority-ordered groups of ordered rules routing
//! alerts to user groups, severity overrides, extra tags and actions.
//!
//! Groups for a business are evaluated highest priority first; within
//! the winning group the first matching rule applies. When nothing
//! matches, the strategy's own notice/action defaults are used.

pub mod engine;
pub mod model;


pub use engine::{AssignEngine, Assignment};
pub use model::{AssignGroup, AssignRule, UserGroup, UserType};
