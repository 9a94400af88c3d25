//! Read-only query API over the stored data.
//!
//! Stateless request/response layer; ingestion never depends on it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDateTime;
use serde::Deserialize;
use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::model::{Measurement, SeriesKind, Station};
use crate::store;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct ApiState {
    db: Client,
}

/// Binds the listener and serves until the shutdown token fires.
pub async fn serve(config: &Config, bind: SocketAddr, shutdown: CancellationToken) -> Result<(), BoxError> {
    let db = store::connect(&config.database).await?;
    let state = Arc::new(ApiState { db });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %bind, "query API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/stations", get(list_stations))
        .route("/stations/{id}", get(get_station))
        .route("/stations/{id}/water-levels", get(water_levels))
        .route("/stations/{id}/temperatures", get(temperatures))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StationPage {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_station_limit")]
    limit: i64,
}

fn default_station_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
struct MeasurementQuery {
    /// Inclusive lower bound on the UTC timestamp.
    start_date: Option<NaiveDateTime>,
    /// Inclusive upper bound on the UTC timestamp.
    end_date: Option<NaiveDateTime>,
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_measurement_limit")]
    limit: i64,
}

fn default_measurement_limit() -> i64 {
    1000
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_stations(
    State(state): State<Arc<ApiState>>,
    Query(page): Query<StationPage>,
) -> Result<Json<Vec<Station>>, StatusCode> {
    store::list_stations(&state.db, page.skip, page.limit)
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn get_station(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i32>,
) -> Result<Json<Station>, StatusCode> {
    match store::get_station(&state.db, id).await {
        Ok(Some(station)) => Ok(Json(station)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => Err(internal_error(err)),
    }
}

async fn water_levels(
    state: State<Arc<ApiState>>,
    path: Path<i32>,
    query: Query<MeasurementQuery>,
) -> Result<Json<Vec<Measurement>>, StatusCode> {
    series(state, path, SeriesKind::WaterLevel, query).await
}

async fn temperatures(
    state: State<Arc<ApiState>>,
    path: Path<i32>,
    query: Query<MeasurementQuery>,
) -> Result<Json<Vec<Measurement>>, StatusCode> {
    series(state, path, SeriesKind::Temperature, query).await
}

async fn series(
    State(state): State<Arc<ApiState>>,
    Path(station_id): Path<i32>,
    kind: SeriesKind,
    Query(query): Query<MeasurementQuery>,
) -> Result<Json<Vec<Measurement>>, StatusCode> {
    // An unknown station is a 404, not an empty series.
    match store::get_station(&state.db, station_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(err) => return Err(internal_error(err)),
    }

    store::measurements(
        &state.db,
        kind,
        station_id,
        query.start_date,
        query.end_date,
        query.skip,
        query.limit,
    )
    .await
    .map(Json)
    .map_err(internal_error)
}

fn internal_error(err: tokio_postgres::Error) -> StatusCode {
    error!(error = %err, "database query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
