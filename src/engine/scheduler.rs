//! Periodic ingestion.
//!
//! Drives the pipeline on two fixed intervals: current conditions and
//! forecasts. A pass in progress always runs to completion; shutdown is
//! observed between passes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::ingest::{IngestReport, IngestionPipeline};
use crate::types::StoreError;

pub struct Scheduler {
    pipeline: Arc<IngestionPipeline>,
    current_every: Duration,
    /// `None` disables the forecast pass.
    forecast_every: Option<Duration>,
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<IngestionPipeline>, current_every: Duration, forecast_every: Option<Duration>) -> Self {
        Self {
            pipeline,
            current_every,
            forecast_every: forecast_every.filter(|d| !d.is_zero()),
        }
    }

    /// Start ticking. Both passes fire once immediately.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(self.run(stopped));
        SchedulerHandle { stop, task }
    }

    async fn run(self, mut stopped: watch::Receiver<bool>) {
        let mut current = tokio::time::interval(self.current_every);
        current.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let forecast_enabled = self.forecast_every.is_some();
        let mut forecast = tokio::time::interval(self.forecast_every.unwrap_or(self.current_every));
        forecast.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            current_secs = self.current_every.as_secs(),
            forecast_secs = self.forecast_every.map(|d| d.as_secs()),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = current.tick() => {
                    log_pass(self.pipeline.refresh_all().await);
                }
                _ = forecast.tick(), if forecast_enabled => {
                    log_pass(self.pipeline.refresh_forecasts_all().await);
                }
                res = stopped.changed() => {
                    if res.is_err() || *stopped.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}

fn log_pass(result: Result<IngestReport, StoreError>) {
    if let Err(e) = result {
        error!(error = %e, "Scheduled ingestion pass aborted");
    }
}

impl SchedulerHandle {
    /// Signal the loop to stop and wait for any in-flight pass to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
