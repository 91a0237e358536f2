//! Column encoding helpers.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings with microsecond
//! precision and a `Z` suffix, so lexical order in SQL equals time order.

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at storage precision.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Next timestamp in a conversation: never earlier than the previous one
/// plus one microsecond.
pub(crate) fn next_after(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last {
        Some(last) if last >= now => last + Duration::microseconds(1),
        _ => now,
    }
}

pub(crate) fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

pub(crate) fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_uuid(idx: usize, s: Option<String>) -> rusqlite::Result<Option<Uuid>> {
    s.map(|s| parse_uuid(idx, &s)).transpose()
}
