//! Ingestion pipeline.
//!
//! Fetches current conditions and forecast series for every registered
//! location and appends them to the snapshot store. Provider failures and
//! timeouts are isolated per location and reported; a store failure aborts
//! the pass.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::data::WeatherProvider;
use crate::storage::SnapshotStore;
use crate::types::{ForecastBatch, IngestError, Location, ObservationSnapshot, StoreError};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestKind {
    Current,
    Forecast,
}

impl fmt::Display for IngestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestKind::Current => write!(f, "current"),
            IngestKind::Forecast => write!(f, "forecast"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded { rows: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationOutcome {
    pub location: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// Per-location tally of one ingestion pass.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub kind: IngestKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<LocationOutcome>,
}

impl IngestReport {
    fn new(kind: IngestKind) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            kind,
            started_at: now,
            finished_at: now,
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Succeeded { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Total snapshot rows written during the pass.
    pub fn rows_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                OutcomeStatus::Succeeded { rows } => rows,
                OutcomeStatus::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn outcome(&self, location: &str) -> Option<&OutcomeStatus> {
        self.outcomes.iter().find(|o| o.location == location).map(|o| &o.status)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct IngestionPipeline {
    provider: Arc<dyn WeatherProvider>,
    store: SnapshotStore,
    fetch_timeout: Duration,
    concurrency: usize,
}

impl IngestionPipeline {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        store: SnapshotStore,
        fetch_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            store,
            fetch_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Refresh current conditions for every registered location.
    pub async fn refresh_all(&self) -> Result<IngestReport, StoreError> {
        self.run_pass(IngestKind::Current).await
    }

    /// Refresh forecast series for every registered location.
    pub async fn refresh_forecasts_all(&self) -> Result<IngestReport, StoreError> {
        self.run_pass(IngestKind::Forecast).await
    }

    /// Refresh current conditions for one location, surfacing any failure.
    pub async fn refresh_one(&self, name: &str) -> Result<ObservationSnapshot, IngestError> {
        let location = self.lookup(name).await?;
        self.ingest_current(&location).await
    }

    /// Refresh the forecast series for one location, surfacing any failure.
    pub async fn refresh_forecast_one(&self, name: &str) -> Result<ForecastBatch, IngestError> {
        let location = self.lookup(name).await?;
        self.ingest_forecast(&location).await
    }

    async fn lookup(&self, name: &str) -> Result<Location, IngestError> {
        self.store
            .find_location(name)
            .await?
            .ok_or_else(|| IngestError::UnknownLocation(name.to_string()))
    }

    async fn run_pass(&self, kind: IngestKind) -> Result<IngestReport, StoreError> {
        let locations = self.store.list_locations().await?;
        let mut report = IngestReport::new(kind);
        info!(run_id = %report.run_id, %kind, locations = locations.len(), "Starting ingestion pass");

        let mut results = stream::iter(locations)
            .map(move |location| async move {
                let result = self.ingest_rows(kind, &location).await;
                (location, result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((location, result)) = results.next().await {
            let status = match result {
                Ok(rows) => OutcomeStatus::Succeeded { rows },
                Err(IngestError::Store(e)) => {
                    error!(run_id = %report.run_id, location = %location.name, error = %e, "Store failure, aborting pass");
                    return Err(e);
                }
                Err(e) => {
                    warn!(run_id = %report.run_id, location = %location.name, error = %e, "Location skipped");
                    OutcomeStatus::Failed { reason: e.to_string() }
                }
            };
            report.outcomes.push(LocationOutcome { location: location.name, status });
        }

        report.outcomes.sort_by(|a, b| a.location.cmp(&b.location));
        report.finished_at = Utc::now();

        info!(
            run_id = %report.run_id,
            %kind,
            succeeded = report.succeeded(),
            failed = report.failed(),
            rows = report.rows_written(),
            "Ingestion pass complete"
        );
        Ok(report)
    }

    async fn ingest_rows(&self, kind: IngestKind, location: &Location) -> Result<usize, IngestError> {
        match kind {
            IngestKind::Current => self.ingest_current(location).await.map(|_| 1),
            IngestKind::Forecast => self.ingest_forecast(location).await.map(|b| b.rows),
        }
    }

    async fn ingest_current(&self, location: &Location) -> Result<ObservationSnapshot, IngestError> {
        let reading = self
            .bounded(location, self.provider.fetch_current(location.latitude, location.longitude))
            .await?;
        let snapshot = self.store.insert_observation(location.id, &reading, Utc::now()).await?;
        info!(
            location = %location.name,
            temperature_f = snapshot.temperature_f,
            wind_speed_mph = snapshot.wind_speed_mph,
            "Inserted snapshot"
        );
        Ok(snapshot)
    }

    async fn ingest_forecast(&self, location: &Location) -> Result<ForecastBatch, IngestError> {
        let steps = self
            .bounded(location, self.provider.fetch_forecast(location.latitude, location.longitude))
            .await?;
        let issued_at = Utc::now();
        let batch = self.store.insert_forecast_batch(location.id, issued_at, &steps).await?;
        info!(location = %location.name, rows = batch.rows, "Inserted forecast");
        Ok(batch)
    }

    /// Apply the fetch timeout and attach the location to provider errors.
    async fn bounded<T, F>(&self, location: &Location, fetch: F) -> Result<T, IngestError>
    where
        F: std::future::Future<Output = Result<T, crate::types::ProviderError>>,
    {
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(IngestError::Provider { location: location.name.clone(), source }),
            Err(_) => Err(IngestError::Timeout { location: location.name.clone(), after: self.fetch_timeout }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
