//! Error summary sanitization
//!
//! Terminal job failures are recorded on the call record as a short,
//! single-line, human-readable string: stack frames are stripped, an
//! embedded machine-readable `"message"` field wins when present, and the
//! result is capped at 200 characters.

use once_cell::sync::Lazy;
use regex::Regex;

static MESSAGE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""message"\s*:\s*"([^"]+)""#).expect("valid regex"));
static ERROR_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(Uncaught\s+\w*Error:\s*|Error:\s*)").expect("valid regex"));

const MAX_SUMMARY_CHARS: usize = 200;

/// Reduce a raw error payload to a bounded single-line summary
pub fn sanitize_error(raw: &str) -> String {
    let meaningful: Vec<&str> = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("at "))
        .collect();
    let joined = meaningful.join("\n");

    if let Some(captures) = MESSAGE_FIELD.captures(&joined) {
        return captures[1].chars().take(MAX_SUMMARY_CHARS).collect();
    }

    let first = meaningful
        .iter()
        .find(|line| !line.trim().is_empty())
        .copied()
        .unwrap_or(raw);

    ERROR_PREFIX
        .replace(first, "")
        .trim()
        .chars()
        .take(MAX_SUMMARY_CHARS)
        .collect()
}
