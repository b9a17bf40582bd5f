//! HTTP route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::engine::ingest::{IngestReport, IngestionPipeline};
use crate::engine::query::{CurrentQuery, ForecastQuery, QueryEngine};
use crate::engine::Core;
use crate::storage::SnapshotStore;
use crate::types::{
    CurrentConditions, ForecastBatch, ForecastConditions, IngestError, Location, ObservationSnapshot,
    QueryError, StoreError, ValidationError,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub service: String,
    pub store: SnapshotStore,
    pub pipeline: Arc<IngestionPipeline>,
    pub queries: Arc<QueryEngine>,
}

impl ApiState {
    pub fn from_core(core: &Core, service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            store: core.store.clone(),
            pipeline: Arc::clone(&core.pipeline),
            queries: Arc::clone(&core.queries),
        }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error responses, rendered as `{ "error": ..., "reason": ... }`.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    /// The request body is not a JSON object of the expected shape.
    InvalidBody(String),
    MissingCity,
    NotFound(String),
    Provider(String),
    Timeout(String),
    Store(StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidBody(_) | ApiError::MissingCity => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            ApiError::Validation(v) => v.reason(),
            ApiError::InvalidBody(_) => "invalid_body",
            ApiError::MissingCity => "missing_city",
            ApiError::NotFound(_) => "not_found",
            ApiError::Provider(_) => "provider_error",
            ApiError::Timeout(_) => "provider_timeout",
            ApiError::Store(_) => "store_error",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Validation(v) => v.to_string(),
            ApiError::InvalidBody(detail) => format!("Invalid request body: {detail}"),
            ApiError::MissingCity => "You must provide a city".to_string(),
            ApiError::NotFound(name) => format!("City not found: {name}"),
            ApiError::Provider(msg) | ApiError::Timeout(msg) => msg.clone(),
            // Store details stay in the logs.
            ApiError::Store(_) => "internal storage error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Store(e) => error!(error = %e, "Request failed on store"),
            ApiError::Provider(msg) | ApiError::Timeout(msg) => warn!(error = %msg, "Provider failure"),
            _ => {}
        }
        let body = json!({ "error": self.message(), "reason": self.reason() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Validation(v) => ApiError::Validation(v),
            QueryError::Store(s) => ApiError::Store(s),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::UnknownLocation(name) => ApiError::NotFound(name),
            e @ IngestError::Provider { .. } => ApiError::Provider(e.to_string()),
            e @ IngestError::Timeout { .. } => ApiError::Timeout(e.to_string()),
            IngestError::Store(s) => ApiError::Store(s),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::InvalidBody(e.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotRequest {
    pub city: Option<String>,
}

impl SnapshotRequest {
    fn city(&self) -> Result<&str, ApiError> {
        match self.city.as_deref().map(str::trim) {
            Some(city) if !city.is_empty() => Ok(city),
            _ => Err(ApiError::MissingCity),
        }
    }
}

/// Response to a single-location or whole-registry refresh.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ObservationSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<ForecastBatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<IngestReport>,
}

impl SnapshotResponse {
    fn message(message: String) -> Self {
        Self { message, snapshot: None, batch: None, report: None }
    }
}

const ALL_CITIES: &str = "all";

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /cities
pub async fn get_cities(
    State(state): State<AppState>,
    Query(query): Query<CurrentQuery>,
) -> Result<Json<Vec<CurrentConditions>>, ApiError> {
    let rows = state.queries.query_current(&query).await?;
    Ok(Json(rows))
}

/// GET /cities/forecast
pub async fn get_forecast(
    State(state): State<AppState>,
    Query(query): Query<ForecastQuery>,
) -> Result<Json<Vec<ForecastConditions>>, ApiError> {
    let rows = state.queries.query_forecast(&query).await?;
    Ok(Json(rows))
}

/// POST /snapshot
pub async fn post_snapshot(
    State(state): State<AppState>,
    body: Result<Json<SnapshotRequest>, JsonRejection>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let Json(req) = body?;
    let city = req.city()?;

    if city == ALL_CITIES {
        let report = state.pipeline.refresh_all().await?;
        return Ok(Json(SnapshotResponse {
            report: Some(report),
            ..SnapshotResponse::message("All cities refreshed".to_string())
        }));
    }

    let snapshot = state.pipeline.refresh_one(city).await?;
    Ok(Json(SnapshotResponse {
        snapshot: Some(snapshot),
        ..SnapshotResponse::message(format!("Successfully added {city} to snapshot"))
    }))
}

/// POST /snapshot/forecast
pub async fn post_forecast_snapshot(
    State(state): State<AppState>,
    body: Result<Json<SnapshotRequest>, JsonRejection>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let Json(req) = body?;
    let city = req.city()?;

    if city == ALL_CITIES {
        let report = state.pipeline.refresh_forecasts_all().await?;
        return Ok(Json(SnapshotResponse {
            report: Some(report),
            ..SnapshotResponse::message("All forecasts refreshed".to_string())
        }));
    }

    let batch = state.pipeline.refresh_forecast_one(city).await?;
    Ok(Json(SnapshotResponse {
        batch: Some(batch),
        ..SnapshotResponse::message(format!("Successfully added {city} forecast to snapshot"))
    }))
}

/// GET /locations
pub async fn get_locations(State(state): State<AppState>) -> Result<Json<Vec<Location>>, ApiError> {
    Ok(Json(state.store.list_locations().await?))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({
            "status": "ok",
            "service": state.service,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": "database_unreachable" })),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
