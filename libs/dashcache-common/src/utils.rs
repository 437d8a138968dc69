//! Utility functions shared by the dashcache crates

use crate::constants::DATE_FORMAT;
use chrono::NaiveDate;

/// Format a date the way query keys and config files spell it
#[must_use]
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a date string in YYYY-MM-DD format
///
/// # Errors
/// Returns `chrono::ParseError` if the date string is not in the expected format
pub fn parse_date(date_str: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(date_str, DATE_FORMAT)
}

/// Parse a boolean flag from an environment-style string
#[must_use]
pub fn parse_bool(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    matches!(lower.as_str(), "true" | "1" | "yes" | "on")
}

/// Truncate a string to a maximum length, counting characters
#[must_use]
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
