//! Small row-mapping helpers shared by the CRUD modules.

use chrono::{DateTime, Utc};

/// Parse an RFC-3339 TEXT column into a `DateTime<Utc>`.
pub(crate) fn ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parse a nullable RFC-3339 TEXT column.
pub(crate) fn opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|v| ts(idx, &v)).transpose()
}

/// Decode an enum-ish TEXT column via a `parse` function.
pub(crate) fn enum_col<T>(
    idx: usize,
    s: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unrecognized value: {s}").into(),
        )
    })
}
