//! Station directory fetcher.
//!
//! The directory page lists every monitoring station inside an inline
//! script variable `staniceH` holding two category arrays: `jadranski`
//! (Adriatic basin) and `crnomorski` (Black Sea basin). Each entry is a
//! fixed-position array:
//!
//! ```text
//! [code, placeholder, latitude, longitude, elevation, name,
//!  region/type, river, flag, ...]
//! ```
//!
//! The field order is an undocumented contract with the source, so every
//! position is decoded defensively: a missing or mistyped optional field
//! becomes `None`, and an entry without a usable code and name is skipped
//! (the graph URL cannot be built without them and a station with no code
//! is never persisted).

use serde_json::Value;
use tracing::{error, warn};

use crate::config::ScrapeConfig;
use crate::ingest::graph;
use crate::model::{StationDescriptor, DEFAULT_LOOKBACK_DAYS};
use crate::repair;

/// Script variable on the directory page that holds the station listing.
pub const DIRECTORY_VAR: &str = "staniceH";

/// Category arrays inside the listing, in publication order.
const CATEGORIES: [&str; 2] = ["jadranski", "crnomorski"];

// Fixed entry positions.
const IDX_CODE: usize = 0;
const IDX_LATITUDE: usize = 2;
const IDX_LONGITUDE: usize = 3;
const IDX_NAME: usize = 5;
const IDX_REGION: usize = 6;
const IDX_RIVER: usize = 7;

/// Fetches the directory page and decodes the station listing.
///
/// Never fails: network errors, a missing listing variable, or an
/// undecodable listing are logged and yield an empty list.
pub async fn fetch_directory(
    http: &reqwest::Client,
    scrape: &ScrapeConfig,
) -> Vec<StationDescriptor> {
    let body = match crate::ingest::fetch_page(http, &scrape.directory_url).await {
        Ok(body) => body,
        Err(err) => {
            error!(url = %scrape.directory_url, error = %err, "failed to fetch station directory");
            return Vec::new();
        }
    };
    parse_directory(&body, &scrape.graph_url)
}

/// Decodes station descriptors out of a directory page body, preserving
/// source order (all `jadranski` entries, then all `crnomorski` ones).
pub fn parse_directory(body: &str, graph_url_base: &str) -> Vec<StationDescriptor> {
    let Some(raw) = crate::ingest::find_var_object(body, DIRECTORY_VAR) else {
        warn!(variable = DIRECTORY_VAR, "directory page did not contain the station listing");
        return Vec::new();
    };

    let listing = match repair::decode_object_literal(DIRECTORY_VAR, raw) {
        Ok(value) => value,
        Err(err) => {
            error!(
                error = %err,
                fragment = repair::fragment_preview(raw),
                "failed to decode station listing"
            );
            return Vec::new();
        }
    };

    let mut stations = Vec::new();
    for category in CATEGORIES {
        let Some(entries) = listing.get(category).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            match decode_entry(entry, graph_url_base) {
                Some(descriptor) => stations.push(descriptor),
                None => warn!(category, entry = %entry, "skipping directory entry without code and name"),
            }
        }
    }
    stations
}

/// Decodes one fixed-position entry. Returns `None` when the code or name
/// is missing, since neither the station row nor its graph URL can exist
/// without them.
fn decode_entry(entry: &Value, graph_url_base: &str) -> Option<StationDescriptor> {
    let fields = entry.as_array()?;

    let code = fields.get(IDX_CODE).and_then(scalar_string)?;
    let name = fields.get(IDX_NAME).and_then(scalar_string)?;

    let latitude = fields.get(IDX_LATITUDE).and_then(Value::as_f64);
    let longitude = fields.get(IDX_LONGITUDE).and_then(Value::as_f64);
    let coordinates = match (latitude, longitude) {
        (Some(lat), Some(lon)) => Some(format!("{},{}", lat, lon)),
        _ => None,
    };

    let region = fields.get(IDX_REGION).and_then(scalar_string);
    let river = fields.get(IDX_RIVER).and_then(scalar_string);

    let graph_url = graph::build_graph_url(graph_url_base, &code, &name, DEFAULT_LOOKBACK_DAYS);

    Some(StationDescriptor {
        code,
        name,
        river,
        region,
        coordinates,
        graph_url,
    })
}

/// A field value usable as text: a non-empty string, or a number
/// (some station codes are published unquoted).
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPH_URL: &str = "https://example.invalid/aws-graph-h.php";

    fn directory_page() -> String {
        // Mirrors the real page's shape: single quotes, bare keys,
        // trailing commas, and a comment inside the listing.
        concat!(
            "<html><head><script>\n",
            "var staniceH = {\n",
            "  // hydro stations\n",
            "  jadranski: [\n",
            "    ['MORACA1', '-', 42.44, 19.26, 48, 'Podgorica', 'AWS', 'Morača', 1],\n",
            "    ['BOJANA2', '-', null, 19.34, 2, 'Fraskanjel', 'AWS', 'Bojana', 1,],\n",
            "    ['NONAME', '-', 42.0, 19.0, 10],\n",
            "  ],\n",
            "  crnomorski: [\n",
            "    [77123, '-', 43.15, 19.1, 810, 'Plav', 'AWS', 'Lim', 1],\n",
            "  ],\n",
            "};\n",
            "</script></head></html>"
        )
        .to_string()
    }

    #[test]
    fn test_parse_directory_concatenates_categories_in_order() {
        let stations = parse_directory(&directory_page(), GRAPH_URL);
        let codes: Vec<&str> = stations.iter().map(|s| s.code.as_str()).collect();
        // NONAME is dropped (no name field); categories keep source order.
        assert_eq!(codes, vec!["MORACA1", "BOJANA2", "77123"]);
    }

    #[test]
    fn test_parse_directory_decodes_metadata_fields() {
        let stations = parse_directory(&directory_page(), GRAPH_URL);
        let moraca = &stations[0];
        assert_eq!(moraca.name, "Podgorica");
        assert_eq!(moraca.river.as_deref(), Some("Morača"));
        assert_eq!(moraca.region.as_deref(), Some("AWS"));
        assert_eq!(moraca.coordinates.as_deref(), Some("42.44,19.26"));
    }

    #[test]
    fn test_missing_coordinate_yields_no_coordinates() {
        let stations = parse_directory(&directory_page(), GRAPH_URL);
        let bojana = &stations[1];
        assert_eq!(bojana.coordinates, None, "null latitude must not produce a pair");
    }

    #[test]
    fn test_numeric_station_code_is_accepted() {
        let stations = parse_directory(&directory_page(), GRAPH_URL);
        assert_eq!(stations[2].code, "77123");
        assert_eq!(stations[2].name, "Plav");
    }

    #[test]
    fn test_graph_url_is_synthesized_per_station() {
        let stations = parse_directory(&directory_page(), GRAPH_URL);
        let url = &stations[0].graph_url;
        assert!(url.starts_with(GRAPH_URL), "{}", url);
        assert!(url.contains("s=MORACA1"), "{}", url);
        assert!(url.contains("d=14d"), "{}", url);
    }

    #[test]
    fn test_missing_listing_variable_yields_empty() {
        let body = "<html><script>var other = {};</script></html>";
        assert!(parse_directory(body, GRAPH_URL).is_empty());
    }

    #[test]
    fn test_undecodable_listing_yields_empty() {
        // An apostrophe inside a name defeats the quote rewrite.
        let body = "var staniceH = {jadranski: [['C1', '-', 1, 1, 1, 'L'Aquila', 't', 'r', 1]]};";
        assert!(parse_directory(body, GRAPH_URL).is_empty());
    }

    #[test]
    fn test_short_entry_is_skipped_not_fatal() {
        let body = "var staniceH = {jadranski: [['ONLYCODE'], ['C2', '-', 1.0, 2.0, 3, 'Full', 't', 'r', 1]]};";
        let stations = parse_directory(body, GRAPH_URL);
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].code, "C2");
    }
}
