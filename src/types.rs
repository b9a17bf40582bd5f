//! Shared types for weatherwatch.
//!
//! The data model (locations, snapshots, query rows) and the domain error
//! taxonomy used across the provider, storage, engine and API modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Locations
// ---------------------------------------------------------------------------

/// A tracked geographic point from the location registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    /// Free-form region label, e.g. a state code.
    pub region: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}, {} ({:.4}, {:.4})", self.name, region, self.latitude, self.longitude),
            None => write!(f, "{} ({:.4}, {:.4})", self.name, self.latitude, self.longitude),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider readings
// ---------------------------------------------------------------------------

/// A current-conditions reading as returned by a provider.
/// Temperatures are °F, wind speeds mph.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentReading {
    pub temperature_f: f64,
    pub wind_speed_mph: f64,
    /// The provider's reported observation time.
    pub observed_at: DateTime<Utc>,
}

/// One future time step of a provider forecast series.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastStep {
    pub forecast_time: DateTime<Utc>,
    pub temperature_f: f64,
    pub wind_speed_mph: f64,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// A persisted current-conditions reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationSnapshot {
    pub id: i64,
    pub location_id: i64,
    pub temperature_f: f64,
    pub wind_speed_mph: f64,
    pub observed_at: DateTime<Utc>,
    /// When ingestion captured the reading.
    pub recorded_at: DateTime<Utc>,
}

/// A persisted predicted-conditions reading for one forecast time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSnapshot {
    pub id: i64,
    pub location_id: i64,
    pub forecast_time: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub temperature_f: f64,
    pub wind_speed_mph: f64,
}

/// Summary of one inserted forecast batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastBatch {
    pub location_id: i64,
    pub issued_at: DateTime<Utc>,
    pub rows: usize,
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// One resolved row of a current-conditions query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentConditions {
    pub location: String,
    pub region: Option<String>,
    pub temperature_f: f64,
    pub wind_speed_mph: f64,
    pub observed_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// One resolved row of a forecast-conditions query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastConditions {
    pub location: String,
    pub region: Option<String>,
    pub temperature_f: f64,
    pub wind_speed_mph: f64,
    pub forecast_time: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Caller-supplied query input that was rejected before any I/O.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("At least one weather filter is required")]
    MissingFilter,

    #[error("invalid {param} format: {value:?}")]
    InvalidDuration { param: &'static str, value: String },

    #[error("Weather filters must be numeric ({param}={value:?})")]
    NonNumericFilter { param: &'static str, value: String },
}

impl ValidationError {
    /// Machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingFilter => "missing_filter",
            ValidationError::InvalidDuration { .. } => "invalid_duration",
            ValidationError::NonNumericFilter { .. } => "non_numeric_filter",
        }
    }
}

/// Failure talking to the upstream weather provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider payload: {0}")]
    Malformed(String),
}

/// Failure of the snapshot store capability.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("snapshot store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failure to ingest one location.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unknown location: {0}")]
    UnknownLocation(String),

    #[error("fetch failed for {location}: {source}")]
    Provider {
        location: String,
        #[source]
        source: ProviderError,
    },

    #[error("fetch for {location} timed out after {after:?}")]
    Timeout { location: String, after: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of a windowed query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
