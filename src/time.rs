//! Time constants, UTC formatting and the injectable clock
//!
//! All timestamps in the updater are milliseconds since the Unix epoch.
//! Externally visible timestamps use a fixed `YYYY-MM-DD HH:MM:SS` UTC
//! format; parsing never fails loudly and yields [`NO_TIME_AVAILABLE`]
//! instead.

use chrono::{DateTime, NaiveDateTime};

pub const ONE_SECOND: i64 = 1000;
pub const ONE_MINUTE: i64 = 60 * ONE_SECOND;
pub const FIFTEEN_MINUTES: i64 = 15 * ONE_MINUTE;
pub const ONE_HOUR: i64 = 60 * ONE_MINUTE;
pub const FOUR_HOURS: i64 = 4 * ONE_HOUR;
pub const TWELVE_HOURS: i64 = 12 * ONE_HOUR;
pub const ONE_DAY: i64 = 24 * ONE_HOUR;
pub const TWO_DAYS: i64 = 2 * ONE_DAY;
pub const THREE_DAYS: i64 = 3 * ONE_DAY;
pub const ONE_WEEK: i64 = 7 * ONE_DAY;
pub const TEN_DAYS: i64 = 10 * ONE_DAY;
pub const ROUGHLY_ONE_MONTH: i64 = 31 * ONE_DAY;
pub const ROUGHLY_THREE_MONTHS: i64 = 92 * ONE_DAY;
pub const ROUGHLY_ONE_YEAR: i64 = 366 * ONE_DAY;
pub const ROUGHLY_FIVE_YEARS: i64 = 5 * ROUGHLY_ONE_YEAR;

/// Sentinel returned by [`parse_millis`] for unparseable input
pub const NO_TIME_AVAILABLE: i64 = -1;

/// Last millisecond of 9999-12-31, the largest time the text format can carry
pub const LATEST_SUPPORTED_MILLIS: i64 = 253_402_300_799_999;

/// Format used for every externally visible timestamp
pub const ISO_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format epoch millis as a UTC second-resolution string.
///
/// Out-of-range values render as the empty string.
pub fn format_millis(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format(ISO_DATETIME_FORMAT).to_string())
        .unwrap_or_default()
}

/// Parse a `YYYY-MM-DD HH:MM:SS` UTC string, or return [`NO_TIME_AVAILABLE`].
pub fn parse_millis(value: &str) -> i64 {
    match NaiveDateTime::parse_from_str(value.trim(), ISO_DATETIME_FORMAT) {
        Ok(dt) => dt.and_utc().timestamp_millis(),
        Err(_) => NO_TIME_AVAILABLE,
    }
}

/// Round a timestamp down to the start of its interval.
#[inline]
pub fn floor_to(millis: i64, interval: i64) -> i64 {
    millis.div_euclid(interval) * interval
}

/// Source of "now" for retention and compaction decisions.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock frozen at a given instant, for tests and replays
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}
