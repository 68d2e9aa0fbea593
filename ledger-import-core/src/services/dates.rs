//! Date parsing against chrono `strftime` patterns

use chrono::{NaiveDate, NaiveDateTime};

/// Patterns tried during inference, in preference order
///
/// US month-first patterns come before day-first ones so that a column where
/// both fit equally (every day <= 12) resolves to month-first.
pub const DATE_PATTERNS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m/%d/%y",
    "%d/%m/%y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%b %d, %Y",
    "%d %b %Y",
    "%d-%b-%Y",
    "%Y%m%d",
];

/// Parse `raw` with `pattern`
///
/// A trailing time component (`2024-01-15 10:30:00`, `2024-01-15T10:30:00Z`)
/// is accepted and dropped. Patterns that include a time are parsed as a
/// datetime.
pub fn parse_date(raw: &str, pattern: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, pattern) {
        return Some(date);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(s, pattern) {
        return Some(datetime.date());
    }

    match NaiveDate::parse_and_remainder(s, pattern) {
        Ok((date, rest)) if rest.starts_with([' ', 'T']) => Some(date),
        _ => None,
    }
}

/// The first pattern in [`DATE_PATTERNS`] that parses `raw`
pub fn detect_pattern(raw: &str) -> Option<&'static str> {
    DATE_PATTERNS
        .iter()
        .copied()
        .find(|pattern| parse_date(raw, pattern).is_some())
}

/// Whether any known pattern parses `raw`
pub fn looks_like_date(raw: &str) -> bool {
    detect_pattern(raw).is_some()
}
