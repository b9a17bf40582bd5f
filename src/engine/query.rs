//! Windowed query engine.
//!
//! Answers "which locations currently satisfy these bounds" against the
//! trailing observation window, and "which locations are forecast to
//! satisfy them around `now + offset`" against forecast history. All input
//! is validated before the store is touched.

use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::filters::{parse_offset, parse_window, FilterParams};
use super::ingest::IngestionPipeline;
use crate::config::{ForecastRefresh, QueryConfig};
use crate::storage::SnapshotStore;
use crate::types::{CurrentConditions, ForecastConditions, QueryError};

/// Raw current-conditions query (`GET /cities`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentQuery {
    pub as_of: Option<String>,
    #[serde(flatten)]
    pub filters: FilterParams,
}

/// Raw forecast-conditions query (`GET /cities/forecast`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForecastQuery {
    #[serde(rename = "in")]
    pub offset: Option<String>,
    #[serde(flatten)]
    pub filters: FilterParams,
}

pub struct QueryEngine {
    store: SnapshotStore,
    pipeline: Option<Arc<IngestionPipeline>>,
    settings: QueryConfig,
    /// At most one background forecast refresh in flight.
    background: Mutex<Option<JoinHandle<()>>>,
}

impl QueryEngine {
    /// `pipeline` is used for refresh-before-read on forecast queries; without
    /// one the refresh policy is treated as `off`.
    pub fn new(store: SnapshotStore, pipeline: Option<Arc<IngestionPipeline>>, settings: QueryConfig) -> Self {
        Self { store, pipeline, settings, background: Mutex::new(None) }
    }

    pub async fn query_current(&self, query: &CurrentQuery) -> Result<Vec<CurrentConditions>, QueryError> {
        let window = parse_window(query.as_of.as_deref(), &self.settings.default_window)?;
        let predicates = query.filters.to_predicates()?;

        debug!(
            window_secs = window.num_seconds(),
            predicates = predicates.len(),
            "Current conditions query"
        );
        let rows = self.store.latest_observations(Utc::now(), window, &predicates).await?;
        Ok(rows)
    }

    pub async fn query_forecast(&self, query: &ForecastQuery) -> Result<Vec<ForecastConditions>, QueryError> {
        let offset = parse_offset(query.offset.as_deref(), &self.settings.default_offset)?;
        let predicates = query.filters.to_predicates()?;

        self.refresh_forecasts().await?;

        let tolerance = Duration::minutes(self.settings.forecast_tolerance_mins);
        debug!(
            offset_secs = offset.num_seconds(),
            tolerance_mins = self.settings.forecast_tolerance_mins,
            predicates = predicates.len(),
            "Forecast conditions query"
        );
        let rows = self
            .store
            .best_forecasts(Utc::now(), offset, tolerance, &predicates)
            .await?;
        Ok(rows)
    }

    async fn refresh_forecasts(&self) -> Result<(), QueryError> {
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };

        match self.settings.forecast_refresh {
            ForecastRefresh::Off => {}
            ForecastRefresh::Blocking => {
                pipeline.refresh_forecasts_all().await?;
            }
            ForecastRefresh::Background => {
                let mut slot = self.background.lock().await;
                if slot.as_ref().is_some_and(|h| !h.is_finished()) {
                    debug!("Background forecast refresh already running");
                    return Ok(());
                }
                let pipeline = Arc::clone(pipeline);
                *slot = Some(tokio::spawn(async move {
                    if let Err(e) = pipeline.refresh_forecasts_all().await {
                        warn!(error = %e, "Background forecast refresh failed");
                    }
                }));
            }
        }
        Ok(())
    }

    /// Wait for an in-flight background refresh to finish.
    pub async fn drain_background(&self) {
        let handle = self.background.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Background forecast refresh task failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
