use crate::error::{CoreError, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};

/// Source of "now" for a single invocation.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, truncated to whole seconds so stored timestamps stay short.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}

/// A clock pinned to one instant (the `--time` override, and tests).
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

impl FixedClock {
    pub fn parse(s: &str) -> Result<Self> {
        parse_timestamp(s)
            .map(FixedClock)
            .ok_or_else(|| CoreError::Usage(format!("invalid --time '{s}': expected ISO-8601")))
    }
}

/// Build the clock for an invocation: the override when given, else the
/// wall clock.
pub fn from_override(time: Option<&str>) -> Result<Box<dyn Clock>> {
    match time {
        Some(s) => Ok(Box::new(FixedClock::parse(s)?)),
        None => Ok(Box::new(SystemClock)),
    }
}

/// Accepts RFC 3339 (any offset, normalised to UTC) or a naive
/// `YYYY-MM-DDTHH:MM:SS` which is taken to be UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_literal_roundtrips() {
        let clock = FixedClock::parse("2025-08-16T15:30:00Z").unwrap();
        assert_eq!(format_timestamp(&clock.now()), "2025-08-16T15:30:00Z");
    }

    #[test]
    fn offsets_normalise_to_utc() {
        let ts = parse_timestamp("2025-08-16T17:30:00+02:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2025-08-16T15:30:00Z");
    }

    #[test]
    fn naive_is_utc() {
        let ts = parse_timestamp("2025-08-16T15:30:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2025-08-16T15:30:00Z");
    }

    #[test]
    fn garbage_is_usage_error() {
        assert!(matches!(
            FixedClock::parse("yesterday"),
            Err(CoreError::Usage(_))
        ));
    }

    #[test]
    fn system_clock_has_no_subseconds() {
        let now = SystemClock.now();
        assert_eq!(now.timestamp_subsec_nanos(), 0);
    }
}
