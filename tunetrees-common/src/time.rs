//! Timestamp utilities
//!
//! Practice data stores timestamps as text. Several layouts appear in the
//! wild (RFC 3339, SQLite `datetime()` output, bare dates), so parsing is
//! centralized here and always yields a naive UTC timestamp.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::{debug, warn};

/// Environment variable that pins the sitdown date (test override)
pub const SITDOWN_OVERRIDE_ENV: &str = "TUNETREES_SITDOWN_DATE";

/// Textual layout used when timestamps are written back to storage
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Parse a stored timestamp into a naive UTC value.
///
/// Accepted layouts:
/// - RFC 3339 (`2024-06-10T08:30:00Z`, `2024-06-10T08:30:00+02:00`)
/// - `2024-06-10 08:30:00` and `2024-06-10T08:30:00` (optional fractional seconds)
/// - `2024-06-10` (midnight)
///
/// Returns `None` for blank or unparseable input.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }

    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Format a timestamp the way it is persisted
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(STORAGE_FORMAT).to_string()
}

/// Resolve the sitdown date for a practice session.
///
/// Priority order:
/// 1. `override_value` (the `TUNETREES_SITDOWN_DATE` test override)
/// 2. `stored_value` (the user's persisted sitdown date)
/// 3. `fallback` (normally the current time)
///
/// Unparseable candidates are skipped with a warning rather than treated as
/// "today".
pub fn resolve_sitdown_date(
    override_value: Option<&str>,
    stored_value: Option<&str>,
    fallback: NaiveDateTime,
) -> NaiveDateTime {
    if let Some(raw) = override_value {
        match parse_timestamp(raw) {
            Some(ts) => {
                debug!(sitdown = %ts, "Using sitdown date override");
                return ts;
            }
            None => warn!(value = raw, "Ignoring unparseable sitdown date override"),
        }
    }

    if let Some(raw) = stored_value {
        match parse_timestamp(raw) {
            Some(ts) => return ts,
            None => warn!(value = raw, "Ignoring unparseable stored sitdown date"),
        }
    }

    fallback
}

/// Read the sitdown override from the process environment
pub fn sitdown_override_from_env() -> Option<String> {
    std::env::var(SITDOWN_OVERRIDE_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
}
