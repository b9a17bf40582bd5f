//! Persistence layer.
//!
//! `SnapshotStore` owns the SQLite pool and holds the append-only snapshot
//! history. Timestamps are stored as Unix epoch milliseconds so window
//! bounds and time distances are integer arithmetic in SQL.
//!
//! Every method borrows a pooled connection for its own duration only;
//! forecast batches are written inside a single transaction.

pub mod predicate;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::{DatabaseConfig, LocationConfig};
use crate::types::{
    CurrentConditions, CurrentReading, ForecastBatch, ForecastConditions, ForecastSnapshot,
    ForecastStep, Location, ObservationSnapshot, StoreError,
};
use predicate::{push_predicates, Predicate};

pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS locations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT    NOT NULL UNIQUE,
    region      TEXT,
    latitude    REAL    NOT NULL,
    longitude   REAL    NOT NULL
);

CREATE TABLE IF NOT EXISTS observation_snapshots (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    location_id     INTEGER NOT NULL REFERENCES locations(id),
    temperature_f   REAL    NOT NULL,
    wind_speed_mph  REAL    NOT NULL,
    observed_at     INTEGER NOT NULL,
    recorded_at     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_observation_location_recorded
    ON observation_snapshots (location_id, recorded_at);

CREATE TABLE IF NOT EXISTS forecast_snapshots (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    location_id     INTEGER NOT NULL REFERENCES locations(id),
    forecast_time   INTEGER NOT NULL,
    issued_at       INTEGER NOT NULL,
    temperature_f   REAL    NOT NULL,
    wind_speed_mph  REAL    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_forecast_location_time
    ON forecast_snapshots (location_id, forecast_time);
"#;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct LocationRow {
    id: i64,
    name: String,
    region: Option<String>,
    latitude: f64,
    longitude: f64,
}

impl From<LocationRow> for Location {
    fn from(row: LocationRow) -> Self {
        Location {
            id: row.id,
            name: row.name,
            region: row.region,
            latitude: row.latitude,
            longitude: row.longitude,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CurrentRow {
    name: String,
    region: Option<String>,
    temperature_f: f64,
    wind_speed_mph: f64,
    observed_at: i64,
    recorded_at: i64,
}

#[derive(sqlx::FromRow)]
struct ForecastRow {
    name: String,
    region: Option<String>,
    temperature_f: f64,
    wind_speed_mph: f64,
    forecast_time: i64,
    issued_at: i64,
}

#[derive(sqlx::FromRow)]
struct ForecastSnapshotRow {
    id: i64,
    location_id: i64,
    forecast_time: i64,
    issued_at: i64,
    temperature_f: f64,
    wind_speed_mph: f64,
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the snapshot store. Cloning shares the underlying pool.
#[derive(Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    /// Open the pool described by `cfg` and create the schema if needed.
    pub async fn connect(cfg: &DatabaseConfig) -> StoreResult<Self> {
        let in_memory = cfg.url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(&cfg.url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = SqlitePoolOptions::new()
            .acquire_timeout(std::time::Duration::from_secs(cfg.acquire_timeout_secs));
        // An in-memory database lives and dies with its single connection.
        let pool_options = if in_memory {
            pool_options.max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            pool_options.max_connections(cfg.max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;

        info!(url = %cfg.url, "Snapshot store ready");
        Ok(store)
    }

    /// A fresh private in-memory store.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    /// Create tables and indexes (idempotent).
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Reachability check used by `GET /health`.
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Wait for checked-out connections to return, then close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // -- Location registry -------------------------------------------------

    /// Insert registry entries that are not present yet. Existing rows
    /// are left untouched. Returns the number of newly inserted locations.
    pub async fn seed_locations(&self, locations: &[LocationConfig]) -> StoreResult<u64> {
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;
        for loc in locations {
            let result = sqlx::query(
                r#"
                INSERT INTO locations (name, region, latitude, longitude)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(&loc.name)
            .bind(&loc.region)
            .bind(loc.latitude)
            .bind(loc.longitude)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        debug!(configured = locations.len(), inserted, "Location registry seeded");
        Ok(inserted)
    }

    pub async fn list_locations(&self) -> StoreResult<Vec<Location>> {
        let rows: Vec<LocationRow> = sqlx::query_as(
            "SELECT id, name, region, latitude, longitude FROM locations ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Location::from).collect())
    }

    pub async fn find_location(&self, name: &str) -> StoreResult<Option<Location>> {
        let row: Option<LocationRow> = sqlx::query_as(
            "SELECT id, name, region, latitude, longitude FROM locations WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Location::from))
    }

    // -- Writes ------------------------------------------------------------

    /// Append one observation snapshot.
    pub async fn insert_observation(
        &self,
        location_id: i64,
        reading: &CurrentReading,
        recorded_at: DateTime<Utc>,
    ) -> StoreResult<ObservationSnapshot> {
        let observed_ms = to_millis(reading.observed_at);
        let recorded_ms = to_millis(recorded_at);

        let result = sqlx::query(
            r#"
            INSERT INTO observation_snapshots (
                location_id, temperature_f, wind_speed_mph, observed_at, recorded_at
            )
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(location_id)
        .bind(reading.temperature_f)
        .bind(reading.wind_speed_mph)
        .bind(observed_ms)
        .bind(recorded_ms)
        .execute(&self.pool)
        .await?;

        Ok(ObservationSnapshot {
            id: result.last_insert_rowid(),
            location_id,
            temperature_f: reading.temperature_f,
            wind_speed_mph: reading.wind_speed_mph,
            observed_at: from_millis(observed_ms),
            recorded_at: from_millis(recorded_ms),
        })
    }

    /// Append a whole forecast batch under one `issued_at`, atomically.
    pub async fn insert_forecast_batch(
        &self,
        location_id: i64,
        issued_at: DateTime<Utc>,
        steps: &[ForecastStep],
    ) -> StoreResult<ForecastBatch> {
        let issued_ms = to_millis(issued_at);

        let mut tx = self.pool.begin().await?;
        for step in steps {
            sqlx::query(
                r#"
                INSERT INTO forecast_snapshots (
                    location_id, forecast_time, issued_at, temperature_f, wind_speed_mph
                )
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(location_id)
            .bind(to_millis(step.forecast_time))
            .bind(issued_ms)
            .bind(step.temperature_f)
            .bind(step.wind_speed_mph)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(ForecastBatch {
            location_id,
            issued_at: from_millis(issued_ms),
            rows: steps.len(),
        })
    }

    // -- Reads -------------------------------------------------------------

    /// All rows of the forecast batch issued at `issued_at` for a location,
    /// ordered by forecast time.
    pub async fn forecast_batch(
        &self,
        location_id: i64,
        issued_at: DateTime<Utc>,
    ) -> StoreResult<Vec<ForecastSnapshot>> {
        let rows: Vec<ForecastSnapshotRow> = sqlx::query_as(
            r#"
            SELECT id, location_id, forecast_time, issued_at, temperature_f, wind_speed_mph
            FROM forecast_snapshots
            WHERE location_id = ? AND issued_at = ?
            ORDER BY forecast_time, id
            "#,
        )
        .bind(location_id)
        .bind(to_millis(issued_at))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ForecastSnapshot {
                id: r.id,
                location_id: r.location_id,
                forecast_time: from_millis(r.forecast_time),
                issued_at: from_millis(r.issued_at),
                temperature_f: r.temperature_f,
                wind_speed_mph: r.wind_speed_mph,
            })
            .collect())
    }

    /// Latest observation per location with `recorded_at >= now - window`,
    /// kept only when it satisfies every predicate. Ordered by temperature
    /// then location name.
    pub async fn latest_observations(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        predicates: &[Predicate],
    ) -> StoreResult<Vec<CurrentConditions>> {
        let since = to_millis(now) - window.num_milliseconds();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            WITH ranked AS (
                SELECT
                    l.name           AS name,
                    l.region         AS region,
                    o.temperature_f  AS temperature_f,
                    o.wind_speed_mph AS wind_speed_mph,
                    o.observed_at    AS observed_at,
                    o.recorded_at    AS recorded_at,
                    ROW_NUMBER() OVER (
                        PARTITION BY o.location_id
                        ORDER BY o.recorded_at DESC, o.id DESC
                    ) AS rn
                FROM observation_snapshots o
                JOIN locations l ON l.id = o.location_id
                WHERE o.recorded_at >= "#,
        );
        qb.push_bind(since);
        qb.push(
            r#"
            )
            SELECT name, region, temperature_f, wind_speed_mph, observed_at, recorded_at
            FROM ranked
            WHERE rn = 1"#,
        );
        push_predicates(&mut qb, predicates);
        qb.push(" ORDER BY temperature_f ASC, name ASC");

        let rows: Vec<CurrentRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|r| CurrentConditions {
                location: r.name,
                region: r.region,
                temperature_f: r.temperature_f,
                wind_speed_mph: r.wind_speed_mph,
                observed_at: from_millis(r.observed_at),
                recorded_at: from_millis(r.recorded_at),
            })
            .collect())
    }

    /// Best forecast row per location for `target = now + offset`.
    ///
    /// Candidates lie within `target ± tolerance`; among them the latest
    /// `issued_at` wins, then the smallest distance to the target. The
    /// winner is kept only when it satisfies every predicate.
    pub async fn best_forecasts(
        &self,
        now: DateTime<Utc>,
        offset: Duration,
        tolerance: Duration,
        predicates: &[Predicate],
    ) -> StoreResult<Vec<ForecastConditions>> {
        let target = to_millis(now) + offset.num_milliseconds();
        let band = tolerance.num_milliseconds();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            WITH ranked AS (
                SELECT
                    l.name           AS name,
                    l.region         AS region,
                    f.temperature_f  AS temperature_f,
                    f.wind_speed_mph AS wind_speed_mph,
                    f.forecast_time  AS forecast_time,
                    f.issued_at      AS issued_at,
                    ROW_NUMBER() OVER (
                        PARTITION BY f.location_id
                        ORDER BY f.issued_at DESC, ABS(f.forecast_time - "#,
        );
        qb.push_bind(target);
        qb.push(
            r#") ASC, f.id ASC
                    ) AS rn
                FROM forecast_snapshots f
                JOIN locations l ON l.id = f.location_id
                WHERE f.forecast_time BETWEEN "#,
        );
        qb.push_bind(target - band);
        qb.push(" AND ");
        qb.push_bind(target + band);
        qb.push(
            r#"
            )
            SELECT name, region, temperature_f, wind_speed_mph, forecast_time, issued_at
            FROM ranked
            WHERE rn = 1"#,
        );
        push_predicates(&mut qb, predicates);
        qb.push(" ORDER BY temperature_f ASC, name ASC");

        let rows: Vec<ForecastRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|r| ForecastConditions {
                location: r.name,
                region: r.region,
                temperature_f: r.temperature_f,
                wind_speed_mph: r.wind_speed_mph,
                forecast_time: from_millis(r.forecast_time),
                issued_at: from_millis(r.issued_at),
            })
            .collect())
    }
}

#[cfg(test)]
impl SnapshotStore {
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) async fn count_observations(&self) -> StoreResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM observation_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub(crate) async fn count_forecast_rows(&self) -> StoreResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forecast_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
