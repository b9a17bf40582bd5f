//! End-to-end flows: registry seeding, ingestion passes and windowed
//! queries against an in-memory store and a scripted provider.

mod mock_provider;

use std::sync::Arc;
use std::time::Duration;

use weatherwatch::config::{AppConfig, ForecastRefresh, QueryConfig};
use weatherwatch::engine::filters::FilterParams;
use weatherwatch::engine::ingest::{IngestionPipeline, OutcomeStatus};
use weatherwatch::engine::query::{CurrentQuery, ForecastQuery, QueryEngine};
use weatherwatch::engine::Core;
use weatherwatch::storage::SnapshotStore;
use weatherwatch::types::{IngestError, QueryError, ValidationError};

use mock_provider::MockProvider;

const CONFIG: &str = r#"
[database]
url = "sqlite::memory:"

[ingest]
concurrency = 3
fetch_timeout_secs = 1

[query]
forecast_refresh = "off"

[[locations]]
name = "Indianapolis"
region = "IN"
latitude = 39.7684
longitude = -86.1581

[[locations]]
name = "Miami"
region = "FL"
latitude = 25.7617
longitude = -80.1918

[[locations]]
name = "Port St. Joe"
region = "FL"
latitude = 29.8116
longitude = -85.3030

[[locations]]
name = "San Francisco"
region = "CA"
latitude = 37.7749
longitude = -122.4194
"#;

const INDY: f64 = 39.7684;
const MIAMI: f64 = 25.7617;
const PSJ: f64 = 29.8116;
const SF: f64 = 37.7749;

async fn setup(provider: Arc<MockProvider>) -> (AppConfig, Core) {
    let cfg = AppConfig::from_toml_str(CONFIG).unwrap();
    let store = SnapshotStore::connect(&cfg.database).await.unwrap();
    store.seed_locations(&cfg.locations).await.unwrap();
    let core = Core::new(&cfg, store, provider);
    (cfg, core)
}

fn temp_below(bound: &str) -> FilterParams {
    FilterParams { temp_lt: Some(bound.into()), ..FilterParams::default() }
}

#[tokio::test]
async fn test_pass_then_cold_cities() {
    let provider = Arc::new(MockProvider::new());
    provider.set_current(INDY, 18.0, 9.0);
    provider.set_current(MIAMI, 79.0, 11.0);
    provider.set_current(PSJ, 64.0, 4.0);
    provider.set_current(SF, 52.0, 17.0);

    let (_, core) = setup(Arc::clone(&provider)).await;
    let report = core.pipeline.refresh_all().await.unwrap();
    assert_eq!(report.succeeded(), 4);

    let rows = core
        .queries
        .query_current(&CurrentQuery { as_of: Some("60m".into()), filters: temp_below("20") })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].location, "Indianapolis");

    let rows = core
        .queries
        .query_current(&CurrentQuery {
            as_of: None,
            filters: FilterParams {
                temp_gt: Some("50".into()),
                wind_lt: Some("15".into()),
                ..FilterParams::default()
            },
        })
        .await
        .unwrap();
    let names: Vec<_> = rows.iter().map(|r| r.location.as_str()).collect();
    assert_eq!(names, vec!["Port St. Joe", "Miami"]);

    core.shutdown().await;
}

#[tokio::test]
async fn test_one_provider_failure_isolated() {
    let provider = Arc::new(MockProvider::new());
    provider.set_current(INDY, 30.0, 5.0);
    provider.set_current(MIAMI, 80.0, 5.0);
    provider.set_current(SF, 55.0, 5.0);
    provider.fail(PSJ, "service unavailable");

    let (_, core) = setup(Arc::clone(&provider)).await;
    let report = core.pipeline.refresh_all().await.unwrap();

    assert_eq!(provider.calls(), 4);
    assert_eq!(report.succeeded(), 3);
    assert!(matches!(report.outcome("Port St. Joe"), Some(OutcomeStatus::Failed { .. })));
    let stored = core
        .store
        .latest_observations(chrono::Utc::now(), chrono::Duration::hours(1), &[])
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|row| row.location != "Port St. Joe"));

    core.shutdown().await;
}

#[tokio::test]
async fn test_stalled_fetch_times_out() {
    let provider = Arc::new(MockProvider::new());
    provider.set_current(INDY, 30.0, 5.0);
    provider.set_current(MIAMI, 80.0, 5.0);
    provider.set_current(PSJ, 70.0, 5.0);
    provider.stall(SF, Duration::from_secs(30));

    let (_, core) = setup(Arc::clone(&provider)).await;
    let report = core.pipeline.refresh_all().await.unwrap();
    assert_eq!(report.succeeded(), 3);
    match report.outcome("San Francisco") {
        Some(OutcomeStatus::Failed { reason }) => assert!(reason.contains("timed out")),
        other => panic!("expected timeout, got {other:?}"),
    }

    let err = core.pipeline.refresh_one("San Francisco").await.unwrap_err();
    assert!(matches!(err, IngestError::Timeout { .. }));

    core.shutdown().await;
}

#[tokio::test]
async fn test_forecast_pass_and_query() {
    let provider = Arc::new(MockProvider::new());
    provider.set_forecast(INDY, &[(3, 35.0, 22.0), (6, 31.0, 25.0), (9, 28.0, 12.0)]);
    provider.set_forecast(MIAMI, &[(3, 82.0, 9.0), (6, 80.0, 21.0), (9, 78.0, 6.0)]);
    provider.set_forecast(PSJ, &[(3, 70.0, 3.0), (6, 68.0, 4.0), (9, 66.0, 5.0)]);
    provider.fail(SF, "rate limited");

    let (_, core) = setup(Arc::clone(&provider)).await;
    let report = core.pipeline.refresh_forecasts_all().await.unwrap();
    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.rows_written(), 9);

    let windy = core
        .queries
        .query_forecast(&ForecastQuery {
            offset: Some("6h".into()),
            filters: FilterParams { wind_gt: Some("20".into()), ..FilterParams::default() },
        })
        .await
        .unwrap();
    let names: Vec<_> = windy.iter().map(|r| r.location.as_str()).collect();
    assert_eq!(names, vec!["Indianapolis", "Miami"]);
    assert!(windy.iter().all(|r| r.wind_speed_mph > 20.0));

    // A bare offset is hours.
    let freezing = core
        .queries
        .query_forecast(&ForecastQuery { offset: Some("9".into()), filters: temp_below("32") })
        .await
        .unwrap();
    assert_eq!(freezing.len(), 1);
    assert_eq!(freezing[0].location, "Indianapolis");
    assert!((freezing[0].temperature_f - 28.0).abs() < 1e-9);

    core.shutdown().await;
}

#[tokio::test]
async fn test_newer_issuance_replaces_older() {
    let provider = Arc::new(MockProvider::new());
    provider.set_forecast(MIAMI, &[(6, 90.0, 5.0)]);

    let (_, core) = setup(Arc::clone(&provider)).await;
    let older = core.pipeline.refresh_forecast_one("Miami").await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    provider.set_forecast(MIAMI, &[(6, 70.0, 5.0)]);
    let newer = core.pipeline.refresh_forecast_one("Miami").await.unwrap();
    assert!(newer.issued_at > older.issued_at);

    let rows = core
        .queries
        .query_forecast(&ForecastQuery { offset: None, filters: temp_below("100") })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].temperature_f - 70.0).abs() < 1e-9);
    // Both issuances are kept; the query picks the newer one.
    for batch in [&older, &newer] {
        let rows = core.store.forecast_batch(batch.location_id, batch.issued_at).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    core.shutdown().await;
}

#[tokio::test]
async fn test_blocking_refresh_before_forecast_read() {
    let provider = Arc::new(MockProvider::new());
    provider.set_forecast(PSJ, &[(6, 29.0, 3.0)]);

    let store = SnapshotStore::in_memory().await.unwrap();
    let cfg = AppConfig::from_toml_str(CONFIG).unwrap();
    store.seed_locations(&cfg.locations).await.unwrap();

    let pipeline = Arc::new(IngestionPipeline::new(provider.clone(), store.clone(), Duration::from_secs(1), 2));
    let engine = QueryEngine::new(
        store.clone(),
        Some(pipeline),
        QueryConfig { forecast_refresh: ForecastRefresh::Blocking, ..QueryConfig::default() },
    );

    let rows = engine
        .query_forecast(&ForecastQuery { offset: Some("6h".into()), filters: temp_below("32") })
        .await
        .unwrap();
    assert_eq!(provider.calls(), 4);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].location, "Port St. Joe");

    store.close().await;
}

#[tokio::test]
async fn test_validation_precedes_io() {
    let provider = Arc::new(MockProvider::new());
    let (_, core) = setup(Arc::clone(&provider)).await;

    let err = core
        .queries
        .query_current(&CurrentQuery { as_of: None, filters: FilterParams::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Validation(ValidationError::MissingFilter)));

    let err = core
        .queries
        .query_current(&CurrentQuery { as_of: None, filters: temp_below("freezing") })
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Validation(ValidationError::NonNumericFilter { .. })));
    assert_eq!(provider.calls(), 0);

    core.shutdown().await;
}

#[tokio::test]
async fn test_reseeding_is_idempotent() {
    let provider = Arc::new(MockProvider::new());
    let (cfg, core) = setup(provider).await;

    let inserted = core.store.seed_locations(&cfg.locations).await.unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(core.store.list_locations().await.unwrap().len(), 4);

    core.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_waits_for_background_forecast_refresh() {
    let provider = Arc::new(MockProvider::new());
    provider.set_forecast(INDY, &[(6, 20.0, 5.0)]);
    provider.delay_forecasts(Duration::from_millis(200));

    // File-backed so the rows can be read back after the pool is closed.
    let path = std::env::temp_dir().join(format!("weatherwatch-{}.db", uuid::Uuid::new_v4()));
    let mut cfg = AppConfig::from_toml_str(CONFIG).unwrap();
    cfg.database.url = format!("sqlite://{}", path.display());
    cfg.query.forecast_refresh = ForecastRefresh::Background;

    let store = SnapshotStore::connect(&cfg.database).await.unwrap();
    store.seed_locations(&cfg.locations).await.unwrap();
    let core = Core::new(&cfg, store, provider.clone());

    let rows = core
        .queries
        .query_forecast(&ForecastQuery { offset: Some("6h".into()), filters: temp_below("32") })
        .await
        .unwrap();
    assert!(rows.is_empty());

    core.shutdown().await;
    assert_eq!(provider.calls(), 4);

    let reopened = SnapshotStore::connect(&cfg.database).await.unwrap();
    let landed = reopened
        .best_forecasts(chrono::Utc::now(), chrono::Duration::hours(6), chrono::Duration::hours(1), &[])
        .await
        .unwrap();
    reopened.close().await;
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }

    assert_eq!(landed.len(), 1);
    assert_eq!(landed[0].location, "Indianapolis");
}
