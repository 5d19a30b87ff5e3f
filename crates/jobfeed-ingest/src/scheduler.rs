//! Periodic feed ingestion
//!
//! Triggers a run on a fixed interval until cancelled. A tick that arrives
//! while a run is still in progress is skipped, and each completed run is
//! followed by expiry of documents the feed no longer carries.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{DEFAULT_RETENTION_SECS, DEFAULT_SCHEDULE_INTERVAL_SECS};
use crate::error::{IngestError, RunAborted};
use crate::orchestrator::IngestOrchestrator;
use crate::source::FeedSource;
use crate::summary::{RunState, RunSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    /// Time between runs
    pub interval: Duration,
    /// Fire once immediately instead of waiting a full interval
    pub run_on_start: bool,
    /// Documents not refreshed within this window are purged after each run
    pub retention: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SCHEDULE_INTERVAL_SECS),
            run_on_start: true,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
        }
    }
}

pub struct FeedScheduler {
    orchestrator: Arc<IngestOrchestrator>,
    source: Arc<dyn FeedSource>,
    settings: ScheduleSettings,
}

impl FeedScheduler {
    pub fn new(
        orchestrator: Arc<IngestOrchestrator>,
        source: Arc<dyn FeedSource>,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            orchestrator,
            source,
            settings,
        }
    }

    pub fn orchestrator(&self) -> &Arc<IngestOrchestrator> {
        &self.orchestrator
    }

    /// Run once unless a run is already in progress, then purge expired
    /// documents if the run completed.
    pub async fn trigger_once(&self, cancel: &CancellationToken) -> Result<RunSummary, RunAborted> {
        if self.orchestrator.state() == RunState::Running {
            warn!("Previous feed run still in progress; skipping trigger");
            return Err(RunAborted {
                summary: RunSummary::default(),
                error: IngestError::AlreadyRunning,
            });
        }

        let summary = self
            .orchestrator
            .run(self.source.as_ref(), cancel.child_token())
            .await?;

        self.purge_expired().await;
        Ok(summary)
    }

    /// Delete expired documents now; returns how many were removed.
    pub async fn purge_expired(&self) -> u64 {
        match self
            .orchestrator
            .sink()
            .purge_expired(self.settings.retention)
            .await
        {
            Ok(expired) => {
                info!(
                    expired,
                    retention_secs = self.settings.retention.as_secs(),
                    "Purged expired feed jobs"
                );
                expired
            },
            Err(e) => {
                warn!(error = %e, "Failed to purge expired feed jobs");
                0
            },
        }
    }

    /// Trigger runs on the configured interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            run_on_start = self.settings.run_on_start,
            source = %self.source.describe(),
            "Feed scheduler started"
        );

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.settings.run_on_start {
            // The first tick completes immediately
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            info!("Scheduled feed run triggered");
            match self.trigger_once(&cancel).await {
                Ok(_) => {},
                Err(aborted) if matches!(aborted.error, IngestError::Cancelled) => break,
                // Already logged by the orchestrator
                Err(_) => {},
            }
        }

        info!("Feed scheduler stopped");
    }
}
