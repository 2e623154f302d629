use chrono::{DateTime, Local, NaiveDateTime};

/// ISO-8601 timestamp (local time with offset) used for stored records.
pub fn iso_timestamp() -> String {
    Local::now().to_rfc3339()
}

/// Render a stored timestamp as `mm/dd/yy`.
///
/// Accepts RFC 3339 as well as offset-less ISO-8601 (`2024-05-01T12:00:00.123456`),
/// which older documents contain. Unparseable input is returned unchanged.
pub fn short_date(ts: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return dt.format("%m/%d/%y").to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.format("%m/%d/%y").to_string();
    }
    ts.to_string()
}

/// Truncate to `max_chars` characters, appending `...` when something was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
