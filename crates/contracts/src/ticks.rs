//! Tick-based time representation.
//!
//! One tick is 100 nanoseconds. Tick values count from the Unix epoch so they
//! convert losslessly to and from `chrono::DateTime<Utc>` at 100ns precision.

use chrono::{DateTime, TimeZone, Utc};

/// Timestamp or duration expressed in 100-nanosecond ticks.
pub type Ticks = i64;

/// Ticks in one second.
pub const TICKS_PER_SECOND: Ticks = 10_000_000;

/// Ticks in one millisecond.
pub const TICKS_PER_MILLISECOND: Ticks = 10_000;

/// Ticks in one microsecond.
pub const TICKS_PER_MICROSECOND: Ticks = 10;

/// Convert seconds to ticks (rounded to the nearest tick).
#[inline]
pub fn ticks_from_seconds(seconds: f64) -> Ticks {
    (seconds * TICKS_PER_SECOND as f64).round() as Ticks
}

/// Convert ticks to fractional seconds.
#[inline]
pub fn ticks_to_seconds(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// Convert ticks to fractional milliseconds.
#[inline]
pub fn ticks_to_milliseconds(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_MILLISECOND as f64
}

/// Convert a UTC date-time to ticks since the Unix epoch.
pub fn ticks_from_datetime(value: DateTime<Utc>) -> Ticks {
    value.timestamp() * TICKS_PER_SECOND + i64::from(value.timestamp_subsec_nanos() / 100)
}

/// Current UTC time in ticks.
#[inline]
pub fn now_ticks() -> Ticks {
    ticks_from_datetime(Utc::now())
}

/// Convert ticks since the Unix epoch to a UTC date-time.
///
/// Returns `None` when the value is outside chrono's representable range.
pub fn ticks_to_datetime(ticks: Ticks) -> Option<DateTime<Utc>> {
    let seconds = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    Utc.timestamp_opt(seconds, nanos).single()
}

/// Start of the second containing `ticks`.
#[inline]
pub fn base_second(ticks: Ticks) -> Ticks {
    ticks - ticks.rem_euclid(TICKS_PER_SECOND)
}

/// Human readable `dd-Mon-yyyy HH:MM:SS.fff` rendering used in status reports.
pub fn format_ticks(ticks: Ticks) -> String {
    match ticks_to_datetime(ticks) {
        Some(dt) => dt.format("%d-%b-%Y %H:%M:%S%.3f").to_string(),
        None => format!("{ticks} ticks"),
    }
}
