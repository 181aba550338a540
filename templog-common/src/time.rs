//! Timestamp utilities and hour buckets

use chrono::{DateTime, Duration, Utc};

/// Fixed-width storage format; lexical order equals chronological order.
const STORAGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for persistence (microsecond precision, always `Z`)
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(STORAGE_FORMAT).to_string()
}

/// Parse a timestamp written by [`format_timestamp`] (any RFC 3339 value is accepted)
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Calendar hour window `[top-of-hour, top-of-hour + 1h)` in UTC.
///
/// Used to keep at most one weather-feed record per hour per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourBucket {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl HourBucket {
    /// Bucket containing `instant`
    pub fn containing(instant: DateTime<Utc>) -> Self {
        let secs = instant.timestamp();
        let start_secs = secs - secs.rem_euclid(3600);
        let start = DateTime::<Utc>::from_timestamp(start_secs, 0).unwrap_or(instant);
        Self {
            start,
            end: start + Duration::hours(1),
        }
    }

    /// Bucket containing the current wall-clock time
    pub fn current() -> Self {
        Self::containing(now())
    }

    /// Inclusive lower bound
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive upper bound
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Half-open membership test
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}
