//! Core data types for the hydrological monitoring service.
//!
//! This module defines the shared domain model imported by everything
//! else. Aside from the chrono timestamps there is no logic here, only
//! types.

use chrono::NaiveDateTime;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default lookback window requested from the graph page, in days.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 14;

// ---------------------------------------------------------------------------
// Measurement series
// ---------------------------------------------------------------------------

/// The two measurement series reported by every station.
///
/// Each series is persisted in its own table with identical shape, and
/// deduplicated independently on (station id, local timestamp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    WaterLevel,
    Temperature,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 2] = [SeriesKind::WaterLevel, SeriesKind::Temperature];

    /// Name of the table backing this series.
    pub fn table(&self) -> &'static str {
        match self {
            SeriesKind::WaterLevel => "water_levels",
            SeriesKind::Temperature => "temperatures",
        }
    }
}

impl std::fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesKind::WaterLevel => write!(f, "water level"),
            SeriesKind::Temperature => write!(f, "temperature"),
        }
    }
}

// ---------------------------------------------------------------------------
// Station types
// ---------------------------------------------------------------------------

/// A station entry decoded from the directory page.
///
/// Field values come from the fixed-position arrays inside the `staniceH`
/// script variable; the graph URL is synthesized from code and name.
#[derive(Debug, Clone, PartialEq)]
pub struct StationDescriptor {
    /// External station code, the upsert key. Stable across directory syncs.
    pub code: String,
    /// Display name as published on the directory page.
    pub name: String,
    pub river: Option<String>,
    pub region: Option<String>,
    /// "latitude,longitude" when both coordinates are present.
    pub coordinates: Option<String>,
    pub graph_url: String,
}

/// A station row as stored in the database.
#[derive(Debug, Clone, Serialize)]
pub struct Station {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub river: Option<String>,
    pub region: Option<String>,
    pub coordinates: Option<String>,
    pub graph_url: Option<String>,
    /// Timestamp of the most recent successful ingestion for this station.
    pub last_updated: Option<NaiveDateTime>,
    /// Local-to-UTC correction in seconds, applied at ingestion time.
    pub time_offset: i32,
}

// ---------------------------------------------------------------------------
// Extracted sample types
// ---------------------------------------------------------------------------

/// Time-series samples extracted from one station's graph page.
///
/// The three sequences are index-aligned over the union of both series'
/// timestamps: `water_level[i]` and `temperature[i]` hold the values
/// reported at `timestamps[i]`, or `None` when that series has no point
/// there. Points whose value was `null` on the page are never represented.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationData {
    pub timestamps: Vec<NaiveDateTime>,
    pub water_level: Vec<Option<f64>>,
    pub temperature: Vec<Option<f64>>,
}

impl StationData {
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }
}

/// Values grouped under one local timestamp, one slot per series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeasurementPair {
    pub water_level: Option<f64>,
    pub temperature: Option<f64>,
}

impl MeasurementPair {
    pub fn get(&self, kind: SeriesKind) -> Option<f64> {
        match kind {
            SeriesKind::WaterLevel => self.water_level,
            SeriesKind::Temperature => self.temperature,
        }
    }

    pub fn set(&mut self, kind: SeriesKind, value: f64) {
        match kind {
            SeriesKind::WaterLevel => self.water_level = Some(value),
            SeriesKind::Temperature => self.temperature = Some(value),
        }
    }
}

/// A measurement row as stored in either series table.
#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub id: i32,
    pub station_id: i32,
    /// Local timestamp as reported by the source page, no timezone.
    pub timestamp: NaiveDateTime,
    /// Local timestamp plus the station's offset at time of insert.
    pub timestamp_utc: Option<NaiveDateTime>,
    pub value: Option<f64>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching or decoding the source pages.
#[derive(Debug)]
pub enum ScrapeError {
    /// Non-2xx HTTP response from the source site.
    HttpStatus(u16),
    /// Network-level failure (connect, timeout, read).
    Network(String),
    /// The expected script variable was not found in the page body.
    VariableNotFound(String),
    /// The repaired object literal still failed strict decoding.
    Decode { variable: String, message: String },
}

impl std::fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeError::HttpStatus(code) => write!(f, "HTTP error: {}", code),
            ScrapeError::Network(msg) => write!(f, "Network error: {}", msg),
            ScrapeError::VariableNotFound(name) => {
                write!(f, "Script variable not found: {}", name)
            }
            ScrapeError::Decode { variable, message } => {
                write!(f, "Decode error in {}: {}", variable, message)
            }
        }
    }
}

impl std::error::Error for ScrapeError {}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ScrapeError::HttpStatus(status.as_u16()),
            None => ScrapeError::Network(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
