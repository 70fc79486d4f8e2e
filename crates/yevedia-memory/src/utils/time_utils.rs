//! Timestamp helpers.
//!
//! Stored timestamps are RFC 3339 UTC with fixed microsecond precision, so
//! string comparison in SQL orders them chronologically.

use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};

pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, also accepting SQLite's `CURRENT_TIMESTAMP` layout
pub fn parse_timestamp(datetime_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    None
}

/// Oldest creation time still considered fresh for a given age limit.
///
/// A row is served while `created_at > cutoff` and purged once
/// `created_at <= cutoff`; both sides use this one function. Ages reaching
/// past the earliest representable time clamp to it, so everything is fresh.
pub fn expiry_cutoff(now: DateTime<Utc>, max_age_hours: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::hours(i64::from(max_age_hours)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
