//! PostgreSQL access for stations and measurements.
//!
//! All SQL lives here. Callers own their connections: the coordinator
//! opens one connection per station task so a failed transaction can
//! never poison another task's work, while the read API keeps a single
//! long-lived client for its stateless queries.

use chrono::NaiveDateTime;
use tokio_postgres::{Client, NoTls, Transaction};
use tracing::error;

use crate::config::DatabaseConfig;
use crate::model::{Measurement, SeriesKind, Station, StationDescriptor};

type Error = tokio_postgres::Error;

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Opens a connection and spawns its driver task. The driver resolves
/// once the returned client is dropped.
pub async fn connect(config: &DatabaseConfig) -> Result<Client, Error> {
    let (client, connection) =
        tokio_postgres::connect(&config.connection_string(), NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(error = %err, "database connection error");
        }
    });
    Ok(client)
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA_DDL: &str = "
CREATE TABLE IF NOT EXISTS stations (
    id            SERIAL PRIMARY KEY,
    code          TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL,
    river         TEXT,
    region        TEXT,
    coordinates   TEXT,
    graph_url     TEXT,
    last_updated  TIMESTAMP,
    time_offset   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS water_levels (
    id            SERIAL PRIMARY KEY,
    station_id    INTEGER NOT NULL REFERENCES stations(id),
    timestamp     TIMESTAMP NOT NULL,
    timestamp_utc TIMESTAMP,
    value         DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS temperatures (
    id            SERIAL PRIMARY KEY,
    station_id    INTEGER NOT NULL REFERENCES stations(id),
    timestamp     TIMESTAMP NOT NULL,
    timestamp_utc TIMESTAMP,
    value         DOUBLE PRECISION
);

CREATE INDEX IF NOT EXISTS idx_water_levels_station_ts
    ON water_levels (station_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_water_levels_station_ts_utc
    ON water_levels (station_id, timestamp_utc);
CREATE INDEX IF NOT EXISTS idx_temperatures_station_ts
    ON temperatures (station_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_temperatures_station_ts_utc
    ON temperatures (station_id, timestamp_utc);
";

/// Creates tables and indexes. Idempotent.
pub async fn init_schema(client: &Client) -> Result<(), Error> {
    client.batch_execute(SCHEMA_DDL).await
}

// ---------------------------------------------------------------------------
// Stations
// ---------------------------------------------------------------------------

const STATION_COLUMNS: &str =
    "id, code, name, river, region, coordinates, graph_url, last_updated, time_offset";

fn station_from_row(row: &tokio_postgres::Row) -> Station {
    Station {
        id: row.get(0),
        code: row.get(1),
        name: row.get(2),
        river: row.get(3),
        region: row.get(4),
        coordinates: row.get(5),
        graph_url: row.get(6),
        last_updated: row.get(7),
        time_offset: row.get(8),
    }
}

/// Outcome of one directory sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub inserted: usize,
    pub updated: usize,
}

/// Upserts station metadata keyed by external code, inside a single
/// transaction. Existing rows get their metadata refreshed in place;
/// `time_offset` and `last_updated` are never touched by a sync.
pub async fn sync_stations(
    client: &mut Client,
    descriptors: &[StationDescriptor],
) -> Result<SyncOutcome, Error> {
    let tx = client.transaction().await?;
    let mut outcome = SyncOutcome::default();

    for descriptor in descriptors {
        let updated = tx
            .execute(
                "UPDATE stations
                 SET name = $2, river = $3, region = $4, coordinates = $5, graph_url = $6
                 WHERE code = $1",
                &[
                    &descriptor.code,
                    &descriptor.name,
                    &descriptor.river,
                    &descriptor.region,
                    &descriptor.coordinates,
                    &descriptor.graph_url,
                ],
            )
            .await?;

        if updated == 0 {
            tx.execute(
                "INSERT INTO stations (code, name, river, region, coordinates, graph_url)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &descriptor.code,
                    &descriptor.name,
                    &descriptor.river,
                    &descriptor.region,
                    &descriptor.coordinates,
                    &descriptor.graph_url,
                ],
            )
            .await?;
            outcome.inserted += 1;
        } else {
            outcome.updated += 1;
        }
    }

    tx.commit().await?;
    Ok(outcome)
}

/// Every known station, in insertion order.
pub async fn all_stations(client: &Client) -> Result<Vec<Station>, Error> {
    let sql = format!("SELECT {} FROM stations ORDER BY id", STATION_COLUMNS);
    let rows = client.query(sql.as_str(), &[]).await?;
    Ok(rows.iter().map(station_from_row).collect())
}

/// A page of stations for the read API.
pub async fn list_stations(
    client: &Client,
    skip: i64,
    limit: i64,
) -> Result<Vec<Station>, Error> {
    let sql = format!(
        "SELECT {} FROM stations ORDER BY id OFFSET $1 LIMIT $2",
        STATION_COLUMNS
    );
    let rows = client.query(sql.as_str(), &[&skip, &limit]).await?;
    Ok(rows.iter().map(station_from_row).collect())
}

pub async fn get_station(client: &Client, id: i32) -> Result<Option<Station>, Error> {
    let sql = format!("SELECT {} FROM stations WHERE id = $1", STATION_COLUMNS);
    let row = client.query_opt(sql.as_str(), &[&id]).await?;
    Ok(row.as_ref().map(station_from_row))
}

// ---------------------------------------------------------------------------
// Measurements
// ---------------------------------------------------------------------------

fn measurements_sql(kind: SeriesKind) -> String {
    format!(
        "SELECT id, station_id, timestamp, timestamp_utc, value FROM {}
         WHERE station_id = $1
           AND ($2::timestamp IS NULL OR timestamp_utc >= $2)
           AND ($3::timestamp IS NULL OR timestamp_utc <= $3)
         ORDER BY timestamp_utc ASC
         OFFSET $4 LIMIT $5",
        kind.table()
    )
}

/// One series for one station, optionally bounded by a UTC range,
/// ordered by UTC timestamp ascending.
pub async fn measurements(
    client: &Client,
    kind: SeriesKind,
    station_id: i32,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    skip: i64,
    limit: i64,
) -> Result<Vec<Measurement>, Error> {
    let rows = client
        .query(
            measurements_sql(kind).as_str(),
            &[&station_id, &start, &end, &skip, &limit],
        )
        .await?;
    Ok(rows
        .iter()
        .map(|row| Measurement {
            id: row.get(0),
            station_id: row.get(1),
            timestamp: row.get(2),
            timestamp_utc: row.get(3),
            value: row.get(4),
        })
        .collect())
}

/// True when a row for (station, local timestamp) already exists in the
/// series table. This check is the whole deduplication mechanism.
pub async fn measurement_exists(
    tx: &Transaction<'_>,
    kind: SeriesKind,
    station_id: i32,
    timestamp: NaiveDateTime,
) -> Result<bool, Error> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE station_id = $1 AND timestamp = $2 LIMIT 1",
        kind.table()
    );
    let row = tx.query_opt(sql.as_str(), &[&station_id, &timestamp]).await?;
    Ok(row.is_some())
}

pub async fn insert_measurement(
    tx: &Transaction<'_>,
    kind: SeriesKind,
    station_id: i32,
    timestamp: NaiveDateTime,
    timestamp_utc: NaiveDateTime,
    value: f64,
) -> Result<(), Error> {
    let sql = format!(
        "INSERT INTO {} (station_id, timestamp, timestamp_utc, value) VALUES ($1, $2, $3, $4)",
        kind.table()
    );
    tx.execute(sql.as_str(), &[&station_id, &timestamp, &timestamp_utc, &value])
        .await?;
    Ok(())
}

/// Marks a station as freshly ingested.
pub async fn touch_last_updated(
    tx: &Transaction<'_>,
    station_id: i32,
    at: NaiveDateTime,
) -> Result<(), Error> {
    tx.execute(
        "UPDATE stations SET last_updated = $2 WHERE id = $1",
        &[&station_id, &at],
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
