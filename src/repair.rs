//! Object-literal repair.
//!
//! The source pages embed their data as JavaScript object literals rather
//! than JSON: bare identifier keys, single-quoted strings, trailing commas
//! before a closing brace or bracket, the occasional `//` comment. This
//! module rewrites such a literal into strict JSON and decodes it into a
//! `serde_json::Value` tree.
//!
//! Each rewrite step is idempotent and leaves numeric and string content
//! untouched. Known limitation: a single quote *inside* a string value
//! (an apostrophe in a station name) becomes a string delimiter and the
//! fragment fails strict decoding; callers treat that as "no data" for
//! the affected block.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::ScrapeError;

// ---------------------------------------------------------------------------
// Rewrite steps
// ---------------------------------------------------------------------------

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"//[^\n]*").expect("line comment pattern"));

// A bare key is an identifier run directly between `{`/`,` and `:`.
static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([{,])\s*([A-Za-z0-9_]+)\s*:").expect("bare key pattern"));

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("trailing comma pattern"));

/// Strip `//`-style comments to end of line.
pub fn strip_line_comments(input: &str) -> String {
    LINE_COMMENT.replace_all(input, "").into_owned()
}

/// Double-quote unquoted object keys (`{G1:` becomes `{"G1":`).
pub fn quote_bare_keys(input: &str) -> String {
    BARE_KEY.replace_all(input, "${1}\"${2}\":").into_owned()
}

/// Convert single-quote string delimiters to double quotes.
pub fn normalize_quotes(input: &str) -> String {
    input.replace('\'', "\"")
}

/// Remove a trailing comma immediately preceding `}` or `]`.
pub fn strip_trailing_commas(input: &str) -> String {
    TRAILING_COMMA.replace_all(input, "${1}").into_owned()
}

/// Apply all rewrite steps in order, yielding a string a strict JSON
/// decoder should accept.
pub fn repair_object_literal(input: &str) -> String {
    let repaired = strip_line_comments(input);
    let repaired = quote_bare_keys(&repaired);
    let repaired = normalize_quotes(&repaired);
    strip_trailing_commas(&repaired)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Repair `raw` and decode it strictly. `variable` names the script
/// variable the fragment came from, for error context.
pub fn decode_object_literal(variable: &str, raw: &str) -> Result<serde_json::Value, ScrapeError> {
    let repaired = repair_object_literal(raw);
    serde_json::from_str(&repaired).map_err(|err| ScrapeError::Decode {
        variable: variable.to_string(),
        message: err.to_string(),
    })
}

/// Short prefix of a failing fragment, suitable for a log field. The
/// graph blocks can run to hundreds of kilobytes; logging them whole
/// drowns everything else.
pub fn fragment_preview(fragment: &str) -> &str {
    const PREVIEW_LEN: usize = 240;
    if fragment.len() <= PREVIEW_LEN {
        return fragment;
    }
    let mut end = PREVIEW_LEN;
    while !fragment.is_char_boundary(end) {
        end -= 1;
    }
    &fragment[..end]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
