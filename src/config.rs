//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the provider API key) are referenced by env-var name in the
//! config and resolved at runtime.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::engine::filters::{parse_offset, parse_window};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// The location registry.
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { name: "weather-query-api".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL, e.g. `sqlite://weatherwatch.db` or `sqlite::memory:`.
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://weatherwatch.db".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub api_key_env: String,
    /// HTTP client timeout.
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: "OPENWEATHER_API_KEY".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum concurrent per-location fetches within one pass.
    pub concurrency: usize,
    /// Upper bound on a single provider fetch.
    pub fetch_timeout_secs: u64,
    pub current_interval_secs: u64,
    /// 0 disables the scheduled forecast pass.
    pub forecast_interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch_timeout_secs: 20,
            current_interval_secs: 300,
            forecast_interval_secs: 10_800,
        }
    }
}

/// Whether a forecast query refreshes forecasts before reading.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForecastRefresh {
    Off,
    Background,
    #[default]
    Blocking,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueryConfig {
    pub default_window: String,
    pub default_offset: String,
    pub forecast_tolerance_mins: i64,
    pub forecast_refresh: ForecastRefresh,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_window: "60m".to_string(),
            default_offset: "6h".to_string(),
            forecast_tolerance_mins: 90,
            forecast_refresh: ForecastRefresh::Blocking,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { enabled: true, port: 3000 }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LocationConfig {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        parse_window(Some(self.query.default_window.as_str()), "60m")
            .context("query.default_window is not a valid duration")?;
        parse_offset(Some(self.query.default_offset.as_str()), "6h")
            .context("query.default_offset is not a valid duration")?;

        if self.query.forecast_tolerance_mins <= 0 {
            bail!("query.forecast_tolerance_mins must be positive");
        }
        if self.ingest.concurrency == 0 {
            bail!("ingest.concurrency must be at least 1");
        }
        if self.ingest.current_interval_secs == 0 {
            bail!("ingest.current_interval_secs must be positive");
        }
        if self.locations.is_empty() {
            bail!("no [[locations]] configured");
        }

        let mut seen = HashSet::new();
        for loc in &self.locations {
            if !seen.insert(loc.name.as_str()) {
                bail!("duplicate location name: {}", loc.name);
            }
            if !(-90.0..=90.0).contains(&loc.latitude) || !(-180.0..=180.0).contains(&loc.longitude) {
                bail!(
                    "coordinates out of range for {}: ({}, {})",
                    loc.name,
                    loc.latitude,
                    loc.longitude
                );
            }
        }
        Ok(())
    }

    /// Resolve the provider API key from the configured environment variable.
    pub fn provider_api_key(&self) -> Result<SecretString> {
        Self::resolve_env(&self.provider.api_key_env).map(SecretString::new)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
