//! Defensive parsing of model output.
//!
//! Models wrap JSON in prose or markdown fences despite being told not to, so
//! parsing runs in two independently testable stages:
//!
//! 1. [`extract_structure_payload`] — cut the JSON payload out of arbitrary text
//! 2. [`parse_structure`] — strict `serde_json` parse, then structural
//!    normalisation via [`crate::pipeline::normalize`]
//!
//! Refusal detection ([`is_refusal`]) runs on the raw text before either stage,
//! since a refusal contains no JSON to find.

use crate::error::ParseError;
use crate::pipeline::normalize::normalize_structure;
use crate::schema::RawStructure;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

static RE_REFUSAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)i['’]m sorry|i cannot|i can['’]t").unwrap());

/// Whether the model declined the task rather than answering it.
pub fn is_refusal(raw_text: &str) -> bool {
    RE_REFUSAL.is_match(raw_text)
}

/// Pull the JSON payload out of a model response.
///
/// In order: the inside of the first fenced code block; else the span from
/// the first `{` to the last `}`; else the text unchanged.
pub fn extract_structure_payload(raw_text: &str) -> &str {
    if let Some(inner) = RE_FENCED_BLOCK
        .captures(raw_text)
        .and_then(|caps| caps.get(1))
    {
        return inner.as_str().trim();
    }
    if let (Some(start), Some(end)) = (raw_text.find('{'), raw_text.rfind('}')) {
        if start < end {
            return &raw_text[start..=end];
        }
    }
    raw_text
}

/// Strictly parse `json_text` and normalise it into a [`RawStructure`].
///
/// Only invalid JSON syntax fails; a syntactically valid value of the wrong
/// shape degrades to defaulted content.
pub fn parse_structure(json_text: &str) -> Result<RawStructure, ParseError> {
    let value: serde_json::Value =
        serde_json::from_str(json_text).map_err(|e| ParseError {
            raw_text: json_text.to_string(),
            detail: e.to_string(),
        })?;
    Ok(normalize_structure(&value))
}

/// Extract and parse in one step; a failure carries the full `raw_text`.
pub fn parse_response(raw_text: &str) -> Result<RawStructure, ParseError> {
    parse_structure(extract_structure_payload(raw_text)).map_err(|e| ParseError {
        raw_text: raw_text.to_string(),
        ..e
    })
}
