use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RELATIVE: Regex = Regex::new(r"^(now)?(-(\d+)([dhm]))?$").unwrap();
}

/// A `[start, end]` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

/// Parse a time parameter relative to `now`.
///
/// Tried in order: the relative grammar (`now`, `-30m`, `now-1h`, `-2d`),
/// integer seconds since the epoch, RFC3339.
pub fn parse_time(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(captures) = RELATIVE.captures(value) {
        let Some(amount) = captures.get(3) else {
            return Some(now);
        };
        let amount: i64 = amount.as_str().parse().ok()?;
        let offset = match captures.get(4).map(|m| m.as_str()) {
            Some("d") => Duration::try_days(amount)?,
            Some("h") => Duration::try_hours(amount)?,
            Some("m") => Duration::try_minutes(amount)?,
            _ => return None,
        };
        return now.checked_sub_signed(offset);
    }

    if let Ok(secs) = value.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }

    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_relative() {
        assert_eq!(parse_time("now", t0()), Some(t0()));
        assert_eq!(parse_time("-5m", t0()), Some(t0() - Duration::minutes(5)));
        assert_eq!(parse_time("now-1h", t0()), Some(t0() - Duration::hours(1)));
        assert_eq!(parse_time("now-2d", t0()), Some(t0() - Duration::days(2)));
        assert_eq!(parse_time("-90m", t0()), Some(t0() - Duration::minutes(90)));
    }

    #[test]
    fn test_absolute() {
        assert_eq!(
            parse_time("1600000000", t0()),
            Some(Utc.timestamp_opt(1600000000, 0).unwrap())
        );
        assert_eq!(
            parse_time("2025-04-01T00:00:00Z", t0()),
            Some(Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_time("2025-04-01T02:00:00+02:00", t0()),
            Some(Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_rejects() {
        assert_eq!(parse_time("", t0()), None);
        assert_eq!(parse_time("now+1h", t0()), None);
        assert_eq!(parse_time("-5s", t0()), None);
        assert_eq!(parse_time("yesterday", t0()), None);
    }
}
