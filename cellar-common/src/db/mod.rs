//! Database initialization and shared helpers

pub mod init;

pub use init::*;

use chrono::{DateTime, SecondsFormat, Utc};

/// Canonical timestamp text stored in every `*_at` column
///
/// Fixed-width UTC RFC 3339 so values compare correctly as strings.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in canonical timestamp form
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse a stored timestamp back into UTC
pub fn parse_timestamp(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}
