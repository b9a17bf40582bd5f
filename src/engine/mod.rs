//! Core engine: ingestion, windowed queries and their scheduling.

pub mod filters;
pub mod ingest;
pub mod query;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use crate::data::WeatherProvider;
use crate::storage::SnapshotStore;
use ingest::IngestionPipeline;
use query::QueryEngine;
use scheduler::{Scheduler, SchedulerHandle};

/// Owns the long-lived components and their shutdown order.
pub struct Core {
    pub store: SnapshotStore,
    pub pipeline: Arc<IngestionPipeline>,
    pub queries: Arc<QueryEngine>,
    scheduler: Option<SchedulerHandle>,
}

impl Core {
    pub fn new(cfg: &AppConfig, store: SnapshotStore, provider: Arc<dyn WeatherProvider>) -> Self {
        let pipeline = Arc::new(IngestionPipeline::new(
            provider,
            store.clone(),
            Duration::from_secs(cfg.ingest.fetch_timeout_secs),
            cfg.ingest.concurrency,
        ));
        let queries = Arc::new(QueryEngine::new(
            store.clone(),
            Some(Arc::clone(&pipeline)),
            cfg.query.clone(),
        ));

        Self { store, pipeline, queries, scheduler: None }
    }

    /// Start periodic ingestion. Calling twice is a no-op.
    pub fn start_scheduler(&mut self, cfg: &AppConfig) {
        if self.scheduler.is_some() {
            return;
        }
        let scheduler = Scheduler::new(
            Arc::clone(&self.pipeline),
            Duration::from_secs(cfg.ingest.current_interval_secs),
            Some(Duration::from_secs(cfg.ingest.forecast_interval_secs)),
        );
        self.scheduler = Some(scheduler.spawn());
    }

    /// Stop the scheduler, let in-flight passes finish, then close the pool.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.scheduler.take() {
            handle.shutdown().await;
        }
        self.queries.drain_background().await;
        self.store.close().await;
        info!("Core shut down");
    }
}
