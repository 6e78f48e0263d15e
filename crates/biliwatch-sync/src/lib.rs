//! Acquisition orchestration: fetch cycles, scheduling, and runtime config.

pub mod config;
pub mod payload;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::SyncConfig;
pub use scheduler::{
    CrawlConfig, Scheduler, SchedulerStatus, ERROR_BACKOFF, ONLINE_COUNT_INTERVAL, TICK_INTERVAL,
};
pub use service::{AcquisitionService, CycleOutcome, CycleReport, RefreshOutcome};

pub const CRATE_NAME: &str = "biliwatch-sync";
