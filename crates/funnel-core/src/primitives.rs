//! # Primitives
//!
//! Fixed constants and timestamp conventions shared by the core and the app.
//!
//! Everything tunable at runtime (thresholds, page size, stage labels) has its
//! default here and is overridden through the app's configuration.

use crate::FunnelError;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Owner name substituted when a deal carries none.
pub const DEFAULT_OWNER_NAME: &str = "Unknown";

/// Default page size for CRM list requests.
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Default staleness threshold: one hour.
pub const DEFAULT_STALENESS_SECS: u64 = 60 * 60;

/// Default dashboard window in days (last week up to today).
pub const DEFAULT_REPORT_WINDOW_DAYS: i64 = 7;

/// Timestamp layout used by the CRM and by the CSV table (`2024-01-01 13:45:00`, UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// CSV LAYOUT
// =============================================================================

/// Column headers of the persisted funnel table, in order.
pub const CSV_HEADERS: [&str; 9] = [
    "Deal ID",
    "Stage ID",
    "Start Date",
    "End Date",
    "Value",
    "Status",
    "Owner Name",
    "pipeline_id",
    "lost_reason",
];

// =============================================================================
// TIMESTAMPS
// =============================================================================

/// Parse a UTC timestamp.
///
/// Accepts the CRM layout (`YYYY-MM-DD HH:MM:SS`, implicitly UTC), the same
/// layout with a numeric offset, and RFC 3339.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, FunnelError> {
    let trimmed = raw.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| FunnelError::InvalidTimestamp(raw.to_string()))
}

/// Format a timestamp in the CRM/CSV layout.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_crm_layout_as_utc() {
        let ts = parse_timestamp("2024-01-01 13:45:00").expect("parse");
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 13, 45, 0).unwrap());
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = parse_timestamp("2024-01-01T10:00:00-03:00").expect("parse");
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn parses_layout_with_offset() {
        let ts = parse_timestamp("2024-01-01 00:00:00+00:00").expect("parse");
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(FunnelError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn format_round_trips_through_parse() {
        let ts = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).expect("parse"), ts);
    }
}
