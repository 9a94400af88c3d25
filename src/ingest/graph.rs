//! Per-station time-series extractor.
//!
//! Each station has a graph page embedding two series blocks:
//! `Data_m` with minute-resolution points and `Data_h` with
//! hour-resolution points. Both decode to a record keyed by the series
//! group `G1` with two sub-arrays, `Tv` (temperature) and `V` (water
//! level), whose points are `[epoch_millis, value_or_null]` pairs.
//!
//! Minute data wins outright: when the minute block yields any usable
//! point, the hour block is ignored. Hourly points are used only when the
//! minute block is absent, undecodable, or empty. The two resolutions are
//! never mixed within one run.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;
use tracing::error;

use crate::config::ScrapeConfig;
use crate::model::{MeasurementPair, ScrapeError, SeriesKind, StationData};
use crate::repair;

/// Minute-resolution series variable.
pub const MINUTE_VAR: &str = "Data_m";
/// Hour-resolution series variable.
pub const HOUR_VAR: &str = "Data_h";

const SERIES_GROUP: &str = "G1";
const TEMPERATURE_KEY: &str = "Tv";
const WATER_LEVEL_KEY: &str = "V";

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Builds a graph-page URL for one station. The display name is
/// percent-encoded; codes are plain ASCII as published.
pub fn build_graph_url(base: &str, code: &str, name: &str, days: u32) -> String {
    let encoded_name = utf8_percent_encode(name, NON_ALPHANUMERIC);
    format!("{}?s={}&d={}d&name={}", base, code, days, encoded_name)
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// Fetches and decodes one station's samples over the configured lookback
/// window. Network or decode failures are logged and yield empty data;
/// nothing here is fatal to a cycle.
pub async fn fetch_station_data(
    http: &reqwest::Client,
    scrape: &ScrapeConfig,
    code: &str,
    name: &str,
) -> StationData {
    let url = build_graph_url(&scrape.graph_url, code, name, scrape.lookback_days);
    let body = match crate::ingest::fetch_page(http, &url).await {
        Ok(body) => body,
        Err(err) => {
            error!(station = name, code, error = %err, "failed to fetch graph page");
            return StationData::default();
        }
    };
    parse_graph_page(&body, code)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Extracts aligned samples from a graph page body, applying the
/// minute-over-hour preference.
pub fn parse_graph_page(body: &str, code: &str) -> StationData {
    if let Some(data) = decode_block(body, MINUTE_VAR, code) {
        if !data.is_empty() {
            return data;
        }
    }
    if let Some(data) = decode_block(body, HOUR_VAR, code) {
        if !data.is_empty() {
            return data;
        }
    }
    StationData::default()
}

/// Locates and decodes one series block. `None` when the variable is
/// absent or its literal cannot be decoded even after repair.
fn decode_block(body: &str, variable: &str, code: &str) -> Option<StationData> {
    let raw = crate::ingest::find_var_object(body, variable)?;
    match decode_series_block(variable, raw) {
        Ok(data) => Some(data),
        Err(err) => {
            error!(
                station = code,
                error = %err,
                fragment = repair::fragment_preview(raw),
                "failed to decode series block"
            );
            None
        }
    }
}

/// Decodes a raw series-block literal into aligned samples.
///
/// A block missing the `G1` group or either sub-array is treated as
/// empty rather than malformed; the page emits such stubs for stations
/// with no recent readings.
pub fn decode_series_block(variable: &str, raw: &str) -> Result<StationData, ScrapeError> {
    let value = repair::decode_object_literal(variable, raw)?;

    let Some(group) = value.get(SERIES_GROUP) else {
        return Ok(StationData::default());
    };
    let temperature = group.get(TEMPERATURE_KEY).and_then(Value::as_array);
    let water_level = group.get(WATER_LEVEL_KEY).and_then(Value::as_array);
    let (Some(temperature), Some(water_level)) = (temperature, water_level) else {
        return Ok(StationData::default());
    };

    let mut samples: BTreeMap<NaiveDateTime, MeasurementPair> = BTreeMap::new();
    collect_points(temperature, SeriesKind::Temperature, &mut samples);
    collect_points(water_level, SeriesKind::WaterLevel, &mut samples);
    Ok(align(samples))
}

/// Folds `[epoch_millis, value]` points into the per-timestamp map.
/// Null values are dropped entirely, as are points too short or with a
/// non-numeric timestamp or value.
fn collect_points(
    points: &[Value],
    kind: SeriesKind,
    samples: &mut BTreeMap<NaiveDateTime, MeasurementPair>,
) {
    for point in points {
        let Some(pair) = point.as_array() else { continue };
        if pair.len() < 2 {
            continue;
        }
        let Some(timestamp) = pair[0].as_f64().and_then(|ms| point_timestamp(ms as i64)) else {
            continue;
        };
        let Some(value) = pair[1].as_f64() else { continue };
        samples.entry(timestamp).or_default().set(kind, value);
    }
}

/// Local naive timestamp from the page's epoch-milliseconds value; no
/// timezone conversion is applied here; the station's time offset is the
/// only correction, and it happens at ingestion.
fn point_timestamp(epoch_millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(epoch_millis).map(|dt| dt.naive_utc())
}

/// Flattens the per-timestamp map into the three index-aligned sequences,
/// ordered by timestamp.
fn align(samples: BTreeMap<NaiveDateTime, MeasurementPair>) -> StationData {
    let mut data = StationData::default();
    for (timestamp, pair) in samples {
        data.timestamps.push(timestamp);
        data.water_level.push(pair.water_level);
        data.temperature.push(pair.temperature);
    }
    data
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const BASE: &str = "https://example.invalid/aws-graph-h.php";

    fn ts(hms: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hms.0, hms.1, hms.2)
            .unwrap()
    }

    /// Epoch millis for 2024-01-01 at the given time of day.
    fn millis(hms: (u32, u32, u32)) -> i64 {
        ts(hms).and_utc().timestamp_millis()
    }

    fn page(minute_block: Option<&str>, hour_block: Option<&str>) -> String {
        let mut body = String::from("<html><script>\n");
        if let Some(block) = minute_block {
            body.push_str(&format!("var Data_m = {};\n", block));
        }
        if let Some(block) = hour_block {
            body.push_str(&format!("var Data_h = {};\n", block));
        }
        body.push_str("</script></html>");
        body
    }

    #[test]
    fn test_build_graph_url_escapes_the_station_name() {
        let url = build_graph_url(BASE, "MORACA1", "Podgorica Morača", 14);
        assert_eq!(
            url,
            format!("{}?s=MORACA1&d=14d&name=Podgorica%20Mora%C4%8Da", BASE)
        );
    }

    #[test]
    fn test_minute_points_win_over_hour_points() {
        let minute = format!("{{G1: {{Tv: [[{}, 4.5]], V: [[{}, 120.0]]}}}}", millis((0, 0, 0)), millis((0, 0, 0)));
        let hour = format!("{{G1: {{Tv: [[{}, 9.9]], V: [[{}, 999.0]]}}}}", millis((1, 0, 0)), millis((1, 0, 0)));
        let data = parse_graph_page(&page(Some(&minute), Some(&hour)), "MORACA1");

        assert_eq!(data.timestamps, vec![ts((0, 0, 0))]);
        assert_eq!(data.water_level, vec![Some(120.0)]);
        assert_eq!(data.temperature, vec![Some(4.5)]);
    }

    #[test]
    fn test_hour_points_used_when_minute_block_is_absent() {
        let hour = format!("{{G1: {{Tv: [[{}, 9.9]], V: [[{}, 999.0]]}}}}", millis((1, 0, 0)), millis((1, 0, 0)));
        let data = parse_graph_page(&page(None, Some(&hour)), "MORACA1");

        assert_eq!(data.timestamps, vec![ts((1, 0, 0))]);
        assert_eq!(data.water_level, vec![Some(999.0)]);
    }

    #[test]
    fn test_hour_points_used_when_minute_block_is_empty() {
        let minute = "{G1: {Tv: [], V: []}}".to_string();
        let hour = format!("{{G1: {{Tv: [[{}, 7.0]], V: []}}}}", millis((2, 0, 0)));
        let data = parse_graph_page(&page(Some(&minute), Some(&hour)), "MORACA1");

        assert_eq!(data.temperature, vec![Some(7.0)]);
    }

    #[test]
    fn test_hour_points_used_when_minute_block_is_undecodable() {
        // Unbalanced brace survives repair and defeats the decoder.
        let hour = format!("{{G1: {{Tv: [[{}, 7.0]], V: []}}}}", millis((2, 0, 0)));
        let body = format!(
            "var Data_m = {{G1: {{Tv: [[broken}};\nvar Data_h = {};",
            hour
        );
        let data = parse_graph_page(&body, "MORACA1");

        assert_eq!(data.temperature, vec![Some(7.0)]);
    }

    #[test]
    fn test_null_points_are_dropped() {
        let minute = format!(
            "{{G1: {{Tv: [[{}, null], [{}, 5.5]], V: [[{}, null]]}}}}",
            millis((0, 0, 0)),
            millis((0, 10, 0)),
            millis((0, 0, 0)),
        );
        let data = parse_graph_page(&page(Some(&minute), None), "MORACA1");

        // The all-null timestamps contribute nothing at all.
        assert_eq!(data.timestamps, vec![ts((0, 10, 0))]);
        assert_eq!(data.temperature, vec![Some(5.5)]);
        assert_eq!(data.water_level, vec![None]);
    }

    #[test]
    fn test_series_with_different_timestamps_align_over_the_union() {
        let minute = format!(
            "{{G1: {{Tv: [[{}, 4.0]], V: [[{}, 100.0]]}}}}",
            millis((0, 0, 0)),
            millis((0, 5, 0)),
        );
        let data = parse_graph_page(&page(Some(&minute), None), "MORACA1");

        assert_eq!(data.timestamps, vec![ts((0, 0, 0)), ts((0, 5, 0))]);
        assert_eq!(data.temperature, vec![Some(4.0), None]);
        assert_eq!(data.water_level, vec![None, Some(100.0)]);
    }

    #[test]
    fn test_epoch_millis_decode_to_naive_timestamps() {
        // 2024-01-01T00:00:00 UTC == 1704067200000 ms.
        assert_eq!(point_timestamp(1_704_067_200_000), Some(ts((0, 0, 0))));
    }

    #[test]
    fn test_block_without_group_or_arrays_is_empty_not_an_error() {
        let data = decode_series_block(MINUTE_VAR, "{}").expect("empty record decodes");
        assert!(data.is_empty());

        let data = decode_series_block(MINUTE_VAR, "{G1: {Tv: []}}").expect("partial record decodes");
        assert!(data.is_empty(), "missing V sub-array must yield no data");
    }

    #[test]
    fn test_short_and_malformed_points_are_skipped() {
        let minute = format!(
            "{{G1: {{Tv: [[{}], ['bad', 1.0], [{}, 3.0]], V: []}}}}",
            millis((0, 0, 0)),
            millis((0, 1, 0)),
        );
        let data = parse_graph_page(&page(Some(&minute), None), "MORACA1");

        assert_eq!(data.timestamps, vec![ts((0, 1, 0))]);
        assert_eq!(data.temperature, vec![Some(3.0)]);
    }

    #[test]
    fn test_page_with_no_blocks_yields_no_data() {
        assert!(parse_graph_page("<html></html>", "MORACA1").is_empty());
    }
}
