//! Ingestion coordinator.
//!
//! One cycle processes every known station concurrently. Station tasks
//! share the HTTP client but each owns its own database connection and
//! transaction, so one station failing mid-commit can neither see nor
//! break another's writes. A cycle finishes when every task has finished,
//! successfully or not.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DatabaseConfig};
use crate::ingest::graph;
use crate::model::{MeasurementPair, SeriesKind, Station, StationData};
use crate::store;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Counters for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub stations: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub inserted: u64,
}

enum StationOutcome {
    Succeeded { inserted: u64 },
    Failed,
}

// ---------------------------------------------------------------------------
// Cycle orchestration
// ---------------------------------------------------------------------------

/// Runs one full ingestion cycle across all known stations.
///
/// Only a failure to list the stations is an error; per-station failures
/// are isolated, logged, and counted in the summary.
pub async fn run_cycle(config: &Config, http: &reqwest::Client) -> Result<CycleSummary, BoxError> {
    let client = store::connect(&config.database).await?;
    let stations = store::all_stations(&client).await?;
    drop(client);

    if stations.is_empty() {
        warn!("no stations in the database; run sync-stations first");
        return Ok(CycleSummary::default());
    }

    info!(stations = stations.len(), "starting ingestion cycle");

    let config = Arc::new(config.clone());
    let mut tasks = JoinSet::new();
    for station in stations {
        let config = Arc::clone(&config);
        let http = http.clone();
        tasks.spawn(async move {
            match process_station(&config, &http, &station).await {
                Ok(inserted) => {
                    info!(station = %station.name, code = %station.code, inserted, "station processed");
                    StationOutcome::Succeeded { inserted }
                }
                Err(err) => {
                    error!(station = %station.name, code = %station.code, error = %err, "error processing station");
                    StationOutcome::Failed
                }
            }
        });
    }

    let mut summary = CycleSummary::default();
    while let Some(joined) = tasks.join_next().await {
        summary.stations += 1;
        match joined {
            Ok(StationOutcome::Succeeded { inserted }) => {
                summary.succeeded += 1;
                summary.inserted += inserted;
            }
            Ok(StationOutcome::Failed) => summary.failed += 1,
            Err(err) => {
                summary.failed += 1;
                error!(error = %err, "station task aborted");
            }
        }
    }

    info!(
        stations = summary.stations,
        succeeded = summary.succeeded,
        failed = summary.failed,
        inserted = summary.inserted,
        "ingestion cycle finished"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Per-station processing
// ---------------------------------------------------------------------------

/// Fetches and ingests one station. A page that yields no samples is a
/// warning, not an error, and leaves the station untouched (including
/// `last_updated`).
pub async fn process_station(
    config: &Config,
    http: &reqwest::Client,
    station: &Station,
) -> Result<u64, BoxError> {
    debug!(station = %station.name, code = %station.code, "fetching station data");
    let data = graph::fetch_station_data(http, &config.scrape, &station.code, &station.name).await;
    if data.is_empty() {
        warn!(station = %station.name, "no data for station");
        return Ok(0);
    }
    ingest_station_data(&config.database, station, &data).await
}

/// Writes one station's samples inside a dedicated transaction on a
/// dedicated connection. Existing (station, local timestamp) rows are
/// skipped per series; the transaction rolls back wholesale on any error
/// via drop.
pub async fn ingest_station_data(
    db: &DatabaseConfig,
    station: &Station,
    data: &StationData,
) -> Result<u64, BoxError> {
    let grouped = group_by_timestamp(data);

    let mut client = store::connect(db).await?;
    let tx = client.transaction().await?;

    let mut inserted = 0u64;
    for (timestamp, pair) in &grouped {
        let timestamp_utc = utc_timestamp(*timestamp, station.time_offset);
        for kind in SeriesKind::ALL {
            let Some(value) = pair.get(kind) else { continue };
            if store::measurement_exists(&tx, kind, station.id, *timestamp).await? {
                // Duplicate local timestamp: already ingested, skip silently.
                continue;
            }
            store::insert_measurement(&tx, kind, station.id, *timestamp, timestamp_utc, value)
                .await?;
            inserted += 1;
        }
    }

    store::touch_last_updated(&tx, station.id, Utc::now().naive_utc()).await?;
    tx.commit().await?;
    Ok(inserted)
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Merges the aligned sample sequences into one entry per local
/// timestamp. The two series may carry different timestamp sets; each
/// fills only its own slot. Timestamps where neither series has a value
/// are dropped.
pub fn group_by_timestamp(data: &StationData) -> BTreeMap<NaiveDateTime, MeasurementPair> {
    let mut grouped: BTreeMap<NaiveDateTime, MeasurementPair> = BTreeMap::new();
    for (index, timestamp) in data.timestamps.iter().enumerate() {
        let entry = grouped.entry(*timestamp).or_default();
        if let Some(value) = data.water_level.get(index).copied().flatten() {
            entry.set(SeriesKind::WaterLevel, value);
        }
        if let Some(value) = data.temperature.get(index).copied().flatten() {
            entry.set(SeriesKind::Temperature, value);
        }
    }
    grouped.retain(|_, pair| pair.water_level.is_some() || pair.temperature.is_some());
    grouped
}

/// UTC timestamp for a local one, using the station's offset as stored
/// right now. Historical rows keep whatever offset was current when they
/// were inserted; they are never recomputed.
pub fn utc_timestamp(local: NaiveDateTime, time_offset_seconds: i32) -> NaiveDateTime {
    local + Duration::seconds(time_offset_seconds as i64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
