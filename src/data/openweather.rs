//! OpenWeather data provider.
//!
//! Uses the OpenWeather 2.5 REST API for current conditions and the
//! 5-day / 3-hour forecast. All requests ask for imperial units.
//!
//! API: `https://api.openweathermap.org/data/2.5/{weather,forecast}`
//! Auth: `appid` query parameter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::WeatherProvider;
use crate::types::{CurrentReading, ForecastStep, ProviderError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

const UNITS: &str = "imperial";

/// Longest slice of an error body kept for logs.
const MAX_ERROR_BODY: usize = 200;

// ---------------------------------------------------------------------------
// OpenWeather response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    /// Observation time, Unix seconds.
    dt: i64,
    main: OwMain,
    wind: OwWind,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    list: Vec<OwForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    /// Forecast time, Unix seconds.
    dt: i64,
    main: OwMain,
    wind: OwWind,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct OpenWeatherClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl OpenWeatherClient {
    pub fn new(api_key: SecretString, base_url: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("weatherwatch/0.1.0")
            .build()
            .map_err(|e| ProviderError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{endpoint}", self.base_url.trim_end_matches('/'));
        debug!(endpoint, latitude, longitude, "OpenWeather request");

        // `without_url` keeps the appid out of error messages.
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("units", UNITS.to_string()),
                ("appid", self.api_key.expose_secret().clone()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.without_url().to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::Unreachable(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn fetch_current(&self, latitude: f64, longitude: f64) -> Result<CurrentReading, ProviderError> {
        let resp: OwCurrentResponse = self.get_json("weather", latitude, longitude).await?;
        current_from_response(resp)
    }

    async fn fetch_forecast(&self, latitude: f64, longitude: f64) -> Result<Vec<ForecastStep>, ProviderError> {
        let resp: OwForecastResponse = self.get_json("forecast", latitude, longitude).await?;
        forecast_from_response(resp)
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn unix_to_utc(secs: i64) -> Result<DateTime<Utc>, ProviderError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ProviderError::Malformed(format!("timestamp out of range: {secs}")))
}

fn current_from_response(resp: OwCurrentResponse) -> Result<CurrentReading, ProviderError> {
    Ok(CurrentReading {
        temperature_f: resp.main.temp,
        wind_speed_mph: resp.wind.speed,
        observed_at: unix_to_utc(resp.dt)?,
    })
}

fn forecast_from_response(resp: OwForecastResponse) -> Result<Vec<ForecastStep>, ProviderError> {
    if resp.list.is_empty() {
        return Err(ProviderError::Malformed("forecast list is empty".into()));
    }

    let mut steps = resp
        .list
        .into_iter()
        .map(|entry| {
            Ok(ForecastStep {
                forecast_time: unix_to_utc(entry.dt)?,
                temperature_f: entry.main.temp,
                wind_speed_mph: entry.wind.speed,
            })
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;
    steps.sort_by_key(|s| s.forecast_time);
    Ok(steps)
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{cut}...")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT_JSON: &str = r#"{
        "coord": {"lon": -86.1581, "lat": 39.7684},
        "main": {"temp": 28.4, "feels_like": 19.0, "humidity": 71},
        "wind": {"speed": 11.5, "deg": 250},
        "dt": 1760000000,
        "name": "Indianapolis"
    }"#;

    const FORECAST_JSON: &str = r#"{
        "cnt": 3,
        "list": [
            {"dt": 1760010800, "main": {"temp": 30.1}, "wind": {"speed": 9.0}},
            {"dt": 1760000000, "main": {"temp": 28.0}, "wind": {"speed": 12.0}},
            {"dt": 1760021600, "main": {"temp": 33.5}, "wind": {"speed": 4.2}}
        ]
    }"#;

    #[test]
    fn test_parse_current() {
        let resp: OwCurrentResponse = serde_json::from_str(CURRENT_JSON).unwrap();
        let reading = current_from_response(resp).unwrap();
        assert!((reading.temperature_f - 28.4).abs() < 1e-9);
        assert!((reading.wind_speed_mph - 11.5).abs() < 1e-9);
        assert_eq!(reading.observed_at.timestamp(), 1_760_000_000);
    }

    #[test]
    fn test_current_missing_wind_is_malformed() {
        let json = r#"{"main": {"temp": 50.0}, "dt": 1760000000}"#;
        let parsed: Result<OwCurrentResponse, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_parse_forecast_sorted() {
        let resp: OwForecastResponse = serde_json::from_str(FORECAST_JSON).unwrap();
        let steps = forecast_from_response(resp).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].forecast_time.timestamp(), 1_760_000_000);
        assert_eq!(steps[2].forecast_time.timestamp(), 1_760_021_600);
        assert!((steps[2].wind_speed_mph - 4.2).abs() < 1e-9);
    }

    #[test]
    fn test_empty_forecast_is_malformed() {
        let resp = OwForecastResponse { list: Vec::new() };
        let err = forecast_from_response(resp).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn test_out_of_range_timestamp_is_malformed() {
        let err = unix_to_utc(i64::MAX).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(500);
        let cut = truncate_body(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.len(), MAX_ERROR_BODY + 3);
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn test_client_construction() {
        let client = OpenWeatherClient::new(
            SecretString::new("key".to_string()),
            None,
            Duration::from_secs(5),
        );
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url, DEFAULT_BASE_URL);
    }
}
