//! Weather data providers.
//!
//! Defines the `WeatherProvider` trait: the capability to fetch a current
//! reading and a forecast series for a coordinate pair.

pub mod openweather;

use async_trait::async_trait;

use crate::types::{CurrentReading, ForecastStep, ProviderError};

/// Abstraction over upstream weather sources.
///
/// Implementations report temperature in °F and wind speed in mph.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Fetch current conditions at a coordinate pair.
    async fn fetch_current(&self, latitude: f64, longitude: f64) -> Result<CurrentReading, ProviderError>;

    /// Fetch the forecast series at a coordinate pair, ordered by forecast time.
    async fn fetch_forecast(&self, latitude: f64, longitude: f64) -> Result<Vec<ForecastStep>, ProviderError>;
}
