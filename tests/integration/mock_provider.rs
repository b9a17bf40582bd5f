//! Mock weather provider for integration testing.
//!
//! Deterministic `WeatherProvider` keyed by latitude: each tracked point
//! gets a scripted current reading and forecast series, and can be made to
//! fail or stall. All state is in-memory.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use weatherwatch::data::WeatherProvider;
use weatherwatch::types::{CurrentReading, ForecastStep, ProviderError};

#[derive(Clone)]
enum Script {
    Reading { temperature_f: f64, wind_speed_mph: f64 },
    Fail(String),
    Stall(std::time::Duration),
}

/// Scripted provider. Points without a script are unreachable.
#[derive(Default)]
pub struct MockProvider {
    current: Mutex<HashMap<u64, Script>>,
    forecasts: Mutex<HashMap<u64, Vec<(i64, f64, f64)>>>,
    forecast_delay: Mutex<Option<std::time::Duration>>,
    calls: AtomicUsize,
}

fn key(latitude: f64) -> u64 {
    latitude.to_bits()
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&self, latitude: f64, temperature_f: f64, wind_speed_mph: f64) {
        self.current
            .lock()
            .unwrap()
            .insert(key(latitude), Script::Reading { temperature_f, wind_speed_mph });
    }

    pub fn fail(&self, latitude: f64, msg: &str) {
        self.current.lock().unwrap().insert(key(latitude), Script::Fail(msg.to_string()));
    }

    pub fn stall(&self, latitude: f64, delay: std::time::Duration) {
        self.current.lock().unwrap().insert(key(latitude), Script::Stall(delay));
    }

    /// Forecast steps as `(hours_from_now, temperature_f, wind_speed_mph)`.
    pub fn set_forecast(&self, latitude: f64, steps: &[(i64, f64, f64)]) {
        self.forecasts.lock().unwrap().insert(key(latitude), steps.to_vec());
    }

    /// Hold every forecast fetch for `delay` before answering.
    pub fn delay_forecasts(&self, delay: std::time::Duration) {
        *self.forecast_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script(&self, latitude: f64) -> Option<Script> {
        self.current.lock().unwrap().get(&key(latitude)).cloned()
    }
}

#[async_trait]
impl WeatherProvider for MockProvider {
    async fn fetch_current(&self, latitude: f64, _longitude: f64) -> Result<CurrentReading, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script(latitude) {
            Some(Script::Reading { temperature_f, wind_speed_mph }) => Ok(CurrentReading {
                temperature_f,
                wind_speed_mph,
                observed_at: Utc::now(),
            }),
            Some(Script::Fail(msg)) => Err(ProviderError::Status { status: 503, body: msg }),
            Some(Script::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Err(ProviderError::Unreachable("stalled".into()))
            }
            None => Err(ProviderError::Unreachable(format!("no script for {latitude}"))),
        }
    }

    async fn fetch_forecast(&self, latitude: f64, _longitude: f64) -> Result<Vec<ForecastStep>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.forecast_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(Script::Fail(msg)) = self.script(latitude) {
            return Err(ProviderError::Status { status: 503, body: msg });
        }

        let steps = self
            .forecasts
            .lock()
            .unwrap()
            .get(&key(latitude))
            .cloned()
            .ok_or_else(|| ProviderError::Malformed("empty forecast list".into()))?;

        let now = Utc::now();
        Ok(steps
            .into_iter()
            .map(|(hours, temperature_f, wind_speed_mph)| ForecastStep {
                forecast_time: at(now, hours),
                temperature_f,
                wind_speed_mph,
            })
            .collect())
    }
}

fn at(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now + Duration::hours(hours)
}
