//! Due-time expressions accepted by push and resolve calls.
//!
//! A [`Schedule`] is resolved against "now" at the moment the queue applies
//! it, so relative schedules are always relative to the operation, not to
//! when the value was built.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::DocketError;

/// When a document becomes eligible for picking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Schedule {
    /// Due immediately.
    #[default]
    Now,
    /// Due at an absolute instant (past instants are due immediately).
    At(DateTime<Utc>),
    /// Due after a relative delay; negative delays land in the past.
    After(Duration),
}

impl Schedule {
    /// Schedule relative to the moment of resolution.
    pub fn after(delay: Duration) -> Self {
        Self::After(delay)
    }

    /// Schedule at an absolute instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self::At(instant)
    }

    /// Parse an expression such as `"now"`, `"1s"`, `"-2h"`, `"1y"`,
    /// `"2018-05-29"` or an RFC 3339 timestamp.
    pub fn parse(expr: &str) -> Result<Self, DocketError> {
        expr.parse()
    }

    /// Turn the schedule into an absolute instant.
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Now => now,
            Self::At(instant) => *instant,
            Self::After(delay) => now
                .checked_add_signed(*delay)
                .unwrap_or(if *delay < Duration::zero() {
                    DateTime::<Utc>::MIN_UTC
                } else {
                    DateTime::<Utc>::MAX_UTC
                }),
        }
    }
}

impl From<DateTime<Utc>> for Schedule {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::At(instant)
    }
}

impl From<Duration> for Schedule {
    fn from(delay: Duration) -> Self {
        Self::After(delay)
    }
}

impl FromStr for Schedule {
    type Err = DocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if matches!(
            trimmed.to_ascii_lowercase().as_str(),
            "" | "now" | "now()"
        ) {
            return Ok(Self::Now);
        }

        if let Ok(delay) = parse_duration(trimmed) {
            return Ok(Self::After(delay));
        }

        if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::At(instant.with_timezone(&Utc)));
        }

        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(Self::At(midnight.and_utc()));
            }
        }

        Err(DocketError::InvalidSchedule(s.to_string()))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Now => write!(f, "now"),
            Self::At(instant) => write!(f, "{}", instant.to_rfc3339()),
            Self::After(delay) => write!(f, "{}ms", delay.num_milliseconds()),
        }
    }
}

const SECOND_MS: f64 = 1_000.0;
const MINUTE_MS: f64 = 60.0 * SECOND_MS;
const HOUR_MS: f64 = 60.0 * MINUTE_MS;
const DAY_MS: f64 = 24.0 * HOUR_MS;
const WEEK_MS: f64 = 7.0 * DAY_MS;
const YEAR_MS: f64 = 365.25 * DAY_MS;

/// Parse a relative duration such as `"250ms"`, `"1.5h"`, `"2 days"` or
/// `"-1s"`. A bare number is read as milliseconds.
pub fn parse_duration(expr: &str) -> Result<Duration, DocketError> {
    let invalid = || DocketError::InvalidSchedule(expr.to_string());
    let trimmed = expr.trim();

    let split = trimmed
        .char_indices()
        .find(|(idx, c)| !(c.is_ascii_digit() || *c == '.' || (*idx == 0 && *c == '-')))
        .map(|(idx, _)| idx)
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number.parse().map_err(|_| invalid())?;

    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND_MS,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE_MS,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR_MS,
        "d" | "day" | "days" => DAY_MS,
        "w" | "week" | "weeks" => WEEK_MS,
        "y" | "yr" | "yrs" | "year" | "years" => YEAR_MS,
        _ => return Err(invalid()),
    };

    let millis = (value * factor).round();
    if !millis.is_finite() {
        return Err(invalid());
    }
    Duration::try_milliseconds(millis as i64).ok_or_else(invalid)
}
