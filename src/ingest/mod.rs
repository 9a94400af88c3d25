//! Clients for the external source pages.
//!
//! Both pages ship their payload inside inline `<script>` blocks as
//! `var <name> = {...};` assignments; the helpers here locate those
//! blocks and do the plain HTTP fetching. Decoding lives with each
//! page's module.

pub mod directory;
pub mod graph;

use std::time::Duration;

use regex::Regex;

use crate::model::ScrapeError;

/// Builds the HTTP client shared by all scrape fetches.
///
/// The source site serves an invalid TLS certificate; verification is
/// disabled on purpose. Requests are unauthenticated.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(30))
        .build()
}

/// Fetches a page body, mapping non-2xx responses to an error.
pub(crate) async fn fetch_page(
    http: &reqwest::Client,
    url: &str,
) -> Result<String, ScrapeError> {
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ScrapeError::HttpStatus(response.status().as_u16()));
    }
    Ok(response.text().await?)
}

/// Locates `var <name> = {...};` in a page body and returns the raw
/// object literal, braces included. The match is non-greedy and ends at
/// the first `};`, which holds for the blocks this service reads.
pub fn find_var_object<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!(r"(?s)var\s+{}\s*=\s*(\{{.*?\}});", name);
    let re = Regex::new(&pattern).ok()?;
    Some(re.captures(body)?.get(1)?.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_var_object_extracts_the_literal() {
        let body = "<script>\nvar Data_m = {G1: {V: []}};\n</script>";
        assert_eq!(find_var_object(body, "Data_m"), Some("{G1: {V: []}}"));
    }

    #[test]
    fn test_find_var_object_spans_lines() {
        let body = "var staniceH = {\n  jadranski: [\n  ]\n};";
        let literal = find_var_object(body, "staniceH").expect("variable present");
        assert!(literal.starts_with('{') && literal.ends_with('}'));
        assert!(literal.contains("jadranski"));
    }

    #[test]
    fn test_find_var_object_returns_none_when_absent() {
        assert_eq!(find_var_object("var other = {};", "Data_m"), None);
    }

    #[test]
    fn test_find_var_object_ignores_similarly_named_variables() {
        let body = "var Data_m2 = {a: 1}; var Data_m = {b: 2};";
        assert_eq!(find_var_object(body, "Data_m"), Some("{b: 2}"));
    }
}
