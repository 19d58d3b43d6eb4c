//! The action processor: plugin-driven execution of alert actions.
//!
//! Every action is an [`ActionInstance`](siren_storage::action_store::ActionInstance)
//! persisted before and after each phase, so a crashed runner resumes
//! where it stopped. Plugins declare ordered phases (`create_task`,
//! `schedule`, optional external `callback`); the generic runner in
//! [`processor`] owns status transitions, per-plugin retry policy,
//! delayed wake-ups, and per-`(biz, alert)` QoS.

pub mod error;
pub mod plugin;
pub mod plugins;
pub mod processor;
pub mod qos;
pub mod render;

#[cfg(test)]
mod tests;

pub use error::{ActionError, Result};
pub use plugin::{ActionContext, ActionPlugin, PhaseResult, PluginRegistry, RetryPolicy};
pub use processor::{ActionProcessor, ActionTask};
pub use qos::{QosConfig, QosLimiter};
