//! Dual-interval tick scheduler driving the acquisition cycles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::service::{AcquisitionService, CycleOutcome};

/// Eligibility is re-evaluated on every tick; the tick is much shorter than
/// either job interval so due jobs start promptly.
pub const TICK_INTERVAL: Duration = Duration::from_secs(30);
/// The online-count job interval is fixed; only the catalog interval is
/// operator-tunable.
pub const ONLINE_COUNT_INTERVAL: Duration = Duration::from_secs(300);
/// Pause after a failed tick before trying again.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub max_videos: usize,
    pub interval_minutes: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_videos: 100,
            interval_minutes: 60,
        }
    }
}

#[derive(Debug, Default)]
struct JobState {
    config: CrawlConfig,
    last_catalog_run: Option<DateTime<Utc>>,
    last_online_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub catalog_running: bool,
    pub online_running: bool,
    pub last_catalog_run: Option<DateTime<Utc>>,
    pub last_online_run: Option<DateTime<Utc>>,
    pub max_videos: usize,
    pub interval_minutes: u64,
}

/// Owns the tick loop and the per-job bookkeeping. `last_*_run` records the
/// start of the last successful run and only advances on completion, so a
/// failed or guarded cycle is retried on the next eligible tick.
pub struct Scheduler {
    service: Arc<AcquisitionService>,
    state: Arc<Mutex<JobState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(service: Arc<AcquisitionService>, config: CrawlConfig) -> Self {
        Self {
            service,
            state: Arc::new(Mutex::new(JobState {
                config,
                ..JobState::default()
            })),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the tick loop. Both jobs start due, so the first tick runs a
    /// catalog cycle and an online-count cycle back to back.
    pub async fn start(&self) {
        let service = self.service.clone();
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            info!("scheduler loop started");
            loop {
                match Self::tick(&service, &state).await {
                    Ok(()) => tokio::time::sleep(TICK_INTERVAL).await,
                    Err(err) => {
                        error!(%err, "scheduler tick failed");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        });
        *self.handle.lock().await = Some(task);
    }

    async fn tick(service: &AcquisitionService, state: &Mutex<JobState>) -> Result<()> {
        let now = Utc::now();
        let (catalog_due, online_due, max_videos) = {
            let st = state.lock().await;
            (
                is_due(
                    st.last_catalog_run,
                    Duration::from_secs(st.config.interval_minutes * 60),
                    now,
                ),
                is_due(st.last_online_run, ONLINE_COUNT_INTERVAL, now),
                st.config.max_videos,
            )
        };

        // each job's failure is contained here so the other job still gets
        // evaluated within the same tick
        let mut tick_err: Option<anyhow::Error> = None;
        if catalog_due {
            match service.run_catalog_cycle(max_videos).await {
                Ok(CycleOutcome::Completed(report)) => {
                    info!(updated = report.updated, "scheduled catalog cycle completed");
                    state.lock().await.last_catalog_run = Some(now);
                }
                Ok(CycleOutcome::AlreadyRunning) => {}
                Err(err) => tick_err = Some(err.context("catalog cycle")),
            }
        }
        if online_due {
            match service.run_online_cycle().await {
                Ok(CycleOutcome::Completed(report)) => {
                    info!(updated = report.updated, "scheduled online-count cycle completed");
                    state.lock().await.last_online_run = Some(now);
                }
                Ok(CycleOutcome::AlreadyRunning) => {}
                Err(err) => {
                    tick_err.get_or_insert(err.context("online-count cycle"));
                }
            }
        }
        match tick_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Start a catalog cycle now, outside the tick cadence. Returns
    /// [`CycleOutcome::AlreadyRunning`] when one is in flight.
    pub async fn trigger_catalog(&self) -> Result<CycleOutcome> {
        let max_videos = self.state.lock().await.config.max_videos;
        let started = Utc::now();
        let outcome = self.service.run_catalog_cycle(max_videos).await?;
        if matches!(outcome, CycleOutcome::Completed(_)) {
            self.state.lock().await.last_catalog_run = Some(started);
        }
        Ok(outcome)
    }

    pub async fn trigger_online(&self) -> Result<CycleOutcome> {
        let started = Utc::now();
        let outcome = self.service.run_online_cycle().await?;
        if matches!(outcome, CycleOutcome::Completed(_)) {
            self.state.lock().await.last_online_run = Some(started);
        }
        Ok(outcome)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let st = self.state.lock().await;
        SchedulerStatus {
            catalog_running: self.service.is_catalog_running(),
            online_running: self.service.is_online_running(),
            last_catalog_run: st.last_catalog_run,
            last_online_run: st.last_online_run,
            max_videos: st.config.max_videos,
            interval_minutes: st.config.interval_minutes,
        }
    }

    pub async fn config(&self) -> CrawlConfig {
        self.state.lock().await.config
    }

    /// Apply new crawl settings and make the catalog job immediately due.
    pub async fn update_config(&self, config: CrawlConfig) {
        let mut st = self.state.lock().await;
        st.config = config;
        st.last_catalog_run = None;
        info!(
            max_videos = config.max_videos,
            interval_minutes = config.interval_minutes,
            "crawl configuration updated"
        );
    }

    /// Stop the tick loop and release the browser session. Best effort; a
    /// cycle in flight is cancelled.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.service.close().await;
    }
}

fn is_due(last_run: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> bool {
    match last_run {
        None => true,
        Some(last) => now.signed_duration_since(last).num_seconds() >= interval.as_secs() as i64,
    }
}
