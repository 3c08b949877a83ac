//! Timestamp parsing and bucket arithmetic.

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, Time};

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("invalid time: {0}")]
    InvalidTime(String),
}

/// Parse RFC3339 timestamp.
pub fn parse_time_rfc3339(s: &str) -> Result<OffsetDateTime, NormalizeError> {
    OffsetDateTime::parse(s.trim(), &Rfc3339).map_err(|e| NormalizeError::InvalidTime(e.to_string()))
}

/// Accept either a unix timestamp in seconds or an RFC3339 string.
pub fn parse_time_bound(s: &str) -> Result<OffsetDateTime, NormalizeError> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<i64>() {
        return OffsetDateTime::from_unix_timestamp(secs)
            .map_err(|_| NormalizeError::InvalidTimestamp(s.to_string()));
    }
    parse_time_rfc3339(s)
}

/// Start of the whole minute preceding the minute that contains `now`.
pub fn minute_bucket_before(now: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    let ts = now.unix_timestamp();
    let start = ts - ts.rem_euclid(60) - 60;
    let start = OffsetDateTime::from_unix_timestamp(start).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    (start, start + Duration::minutes(1))
}

pub fn start_of_day(t: OffsetDateTime) -> OffsetDateTime {
    t.to_offset(time::UtcOffset::UTC).replace_time(Time::MIDNIGHT)
}

/// `[start of yesterday, start of today)` in UTC.
pub fn yesterday_window(now: OffsetDateTime) -> (OffsetDateTime, OffsetDateTime) {
    let today = start_of_day(now);
    (today - Duration::days(1), today)
}

/// `YYYY-MM-DD`.
pub fn day_key(date: Date) -> String {
    let fmt = format_description!("[year]-[month]-[day]");
    date.format(&fmt).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn bound_from_unix() {
        let t = parse_time_bound("86400").unwrap();
        assert_eq!(t, datetime!(1970-01-02 0:00 UTC));
    }

    #[test]
    fn bound_from_rfc3339() {
        let t = parse_time_bound("2020-06-01T12:30:00Z").unwrap();
        assert_eq!(t, datetime!(2020-06-01 12:30 UTC));
    }

    #[test]
    fn bound_invalid() {
        assert!(parse_time_bound("yesterday").is_err());
    }

    #[test]
    fn minute_bucket_is_previous_whole_minute() {
        let (start, end) = minute_bucket_before(datetime!(2020-06-01 12:30:45 UTC));
        assert_eq!(start, datetime!(2020-06-01 12:29 UTC));
        assert_eq!(end, datetime!(2020-06-01 12:30 UTC));
    }

    #[test]
    fn yesterday_window_spans_one_day() {
        let (from, to) = yesterday_window(datetime!(2020-06-02 08:00 UTC));
        assert_eq!(from, datetime!(2020-06-01 0:00 UTC));
        assert_eq!(to, datetime!(2020-06-02 0:00 UTC));
    }

    #[test]
    fn day_key_format() {
        assert_eq!(day_key(datetime!(2020-06-02 08:00 UTC).date()), "2020-06-02");
    }
}
