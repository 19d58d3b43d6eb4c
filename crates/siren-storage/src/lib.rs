//! Durable state for the alert pipeline.
//!
//! Everything a stage must not lose across a crash lives here, on SQLite
//! with WAL mode: the check-result streams, strategy snapshots, named
//! FIFO queues plus the delayed-task index, advisory locks, action
//! instances, and the daily-partitioned alert store with its append-only
//! lifecycle log.

pub mod action_store;
pub mod alert_store;
pub mod check_result;
pub mod config_store;
pub mod db;
pub mod error;
pub mod locks;
pub mod partition;
pub mod queue;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use error::{Result, StorageError};

use std::path::Path;
use std::sync::Arc;

/// Bundle of every store opened on one data directory. The shared core
/// database holds queues, check results, snapshots, locks and config;
/// alerts and their logs go to daily partitions.
pub struct Stores {
    pub queue: Arc<queue::QueueStore>,
    pub check_result: Arc<check_result::CheckResultStore>,
    pub snapshot: Arc<snapshot::SnapshotStore>,
    pub locks: Arc<locks::LockStore>,
    pub alerts: Arc<alert_store::AlertStore>,
    pub actions: Arc<action_store::ActionStore>,
    pub config: Arc<config_store::ConfigStore>,
}

impl Stores {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let core = Arc::new(db::Db::open(&data_dir.join("core.db"))?);
        Ok(Self {
            queue: Arc::new(queue::QueueStore::new(core.clone())),
            check_result: Arc::new(check_result::CheckResultStore::new(core.clone())),
            snapshot: Arc::new(snapshot::SnapshotStore::new(core.clone())),
            locks: Arc::new(locks::LockStore::new(core.clone())),
            actions: Arc::new(action_store::ActionStore::new(core.clone())),
            config: Arc::new(config_store::ConfigStore::new(core)),
            alerts: Arc::new(alert_store::AlertStore::new(data_dir)?),
        })
    }
}
