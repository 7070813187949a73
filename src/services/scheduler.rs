//! Periodic crawl-and-process loop.
//!
//! Each tick crawls retailers only when the cooldown since the last recorded
//! crawl has elapsed, then always works through pending pages. The crawl
//! timestamp is written before the crawl starts so a slow or failing crawl
//! cannot cause back-to-back retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::manager::{DownloadReport, ProcessReport};
use crate::repository::JobStatusStore;

/// Job name under which crawl timestamps are stored.
pub const FLYER_DOWNLOAD_JOB: &str = "flyer_download";

/// The two pipeline stages the scheduler drives.
#[async_trait]
pub trait PipelineJobs: Send + Sync {
    async fn download_new_flyers(&self) -> anyhow::Result<DownloadReport>;

    async fn process_pending_pages(&self) -> anyhow::Result<ProcessReport>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub tick_interval: Duration,
    /// Minimum time between two crawls.
    pub cooldown: chrono::Duration,
    /// Tick once as soon as the loop starts.
    pub run_immediately: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(24 * 3600),
            cooldown: chrono::Duration::hours(12),
            run_immediately: true,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub crawled: bool,
    pub download: Option<DownloadReport>,
    pub process: Option<ProcessReport>,
}

pub struct Scheduler {
    jobs: Arc<dyn PipelineJobs>,
    status: Arc<dyn JobStatusStore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn PipelineJobs>,
        status: Arc<dyn JobStatusStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            jobs,
            status,
            config,
        }
    }

    /// Whether a crawl is due at `now`.
    ///
    /// A store error is treated as "not due" so a broken status table never
    /// turns into a crawl on every tick.
    pub async fn crawl_due(&self, now: DateTime<Utc>) -> bool {
        match self.status.last_run(FLYER_DOWNLOAD_JOB).await {
            Ok(None) => true,
            Ok(Some(last)) => now - last >= self.config.cooldown,
            Err(e) => {
                warn!(error = %e, "Could not read last crawl time, skipping crawl");
                false
            }
        }
    }

    /// Run one scheduling pass as of `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if self.crawl_due(now).await {
            outcome.crawled = true;
            outcome.download = self.crawl(now).await;
        } else {
            info!("Crawl cooldown has not elapsed, skipping download");
        }

        outcome.process = self.process().await;
        outcome
    }

    /// Crawl and process immediately, ignoring the cooldown.
    pub async fn trigger_now(&self) -> TickOutcome {
        let now = Utc::now();
        TickOutcome {
            crawled: true,
            download: self.crawl(now).await,
            process: self.process().await,
        }
    }

    async fn crawl(&self, now: DateTime<Utc>) -> Option<DownloadReport> {
        if let Err(e) = self.status.record_run(FLYER_DOWNLOAD_JOB, now).await {
            warn!(error = %e, "Failed to record crawl time");
        }

        match self.jobs.download_new_flyers().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Flyer download failed");
                None
            }
        }
    }

    async fn process(&self) -> Option<ProcessReport> {
        match self.jobs.process_pending_pages().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Page processing failed");
                None
            }
        }
    }

    /// Run ticks on the configured interval until `token` is cancelled.
    ///
    /// Cancellation is checked between ticks; a running tick finishes first.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.tick_interval;
            let start = if self.config.run_immediately {
                tokio::time::Instant::now()
            } else {
                tokio::time::Instant::now() + period
            };
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = period.as_secs(), "Scheduler started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick(Utc::now()).await;
                    }
                }
            }
            info!("Scheduler stopped");
        })
    }
}
