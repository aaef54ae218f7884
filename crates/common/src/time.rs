//! Epoch-millis and ISO-8601 helpers shared across the broker.
//!
//! Internals carry timestamps as epoch milliseconds (`i64`); the wire format
//! uses ISO-8601 strings.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render epoch milliseconds as an ISO-8601 timestamp with millisecond
/// precision (`2026-08-01T12:34:56.789Z`).
#[must_use]
pub fn to_iso8601(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO-8601 timestamp into epoch milliseconds.
pub fn from_iso8601(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_round_trip() {
        let ms = 1_754_000_000_123;
        let rendered = to_iso8601(ms);
        assert!(rendered.ends_with('Z'));
        assert_eq!(from_iso8601(&rendered), Some(ms));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(from_iso8601("not a timestamp"), None);
    }
}
