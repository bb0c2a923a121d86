//! Measurement - one timestamped scalar sample.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::{MeasurementKey, Ticks};

/// Quality flags attached to a measurement.
///
/// Bit layout follows the state flags used by phasor data concentrators.
/// Flags in [`MeasurementStateFlags::ERROR_MASK`] mark a value as bad, flags
/// in [`MeasurementStateFlags::WARNING_MASK`] mark it as suspect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementStateFlags(u32);

impl MeasurementStateFlags {
    pub const NORMAL: Self = Self(0);
    pub const BAD_DATA: Self = Self(1 << 0);
    pub const SUSPECT_DATA: Self = Self(1 << 1);
    pub const OVER_RANGE_ERROR: Self = Self(1 << 2);
    pub const UNDER_RANGE_ERROR: Self = Self(1 << 3);
    pub const ALARM_HIGH: Self = Self(1 << 4);
    pub const ALARM_LOW: Self = Self(1 << 5);
    pub const WARNING_HIGH: Self = Self(1 << 6);
    pub const WARNING_LOW: Self = Self(1 << 7);
    pub const FLATLINE_ALARM: Self = Self(1 << 8);
    pub const COMPARISON_ALARM: Self = Self(1 << 9);
    pub const ROC_ALARM: Self = Self(1 << 10);
    pub const RECEIVED_AS_BAD: Self = Self(1 << 11);
    pub const CALCULATED_VALUE: Self = Self(1 << 12);
    pub const CALCULATION_ERROR: Self = Self(1 << 13);
    pub const CALCULATION_WARNING: Self = Self(1 << 14);
    pub const BAD_TIME: Self = Self(1 << 16);
    pub const SUSPECT_TIME: Self = Self(1 << 17);
    pub const LATE_TIME_ALARM: Self = Self(1 << 18);
    pub const FUTURE_TIME_ALARM: Self = Self(1 << 19);
    pub const UP_SAMPLED: Self = Self(1 << 20);
    pub const DOWN_SAMPLED: Self = Self(1 << 21);
    pub const DISCARDED_VALUE: Self = Self(1 << 22);

    /// Flags that mark a value or its time as bad.
    pub const ERROR_MASK: Self = Self(
        Self::BAD_DATA.0
            | Self::OVER_RANGE_ERROR.0
            | Self::UNDER_RANGE_ERROR.0
            | Self::ALARM_HIGH.0
            | Self::ALARM_LOW.0
            | Self::FLATLINE_ALARM.0
            | Self::COMPARISON_ALARM.0
            | Self::ROC_ALARM.0
            | Self::RECEIVED_AS_BAD.0
            | Self::CALCULATION_ERROR.0
            | Self::BAD_TIME.0
            | Self::LATE_TIME_ALARM.0
            | Self::FUTURE_TIME_ALARM.0,
    );

    /// Flags that mark a value or its time as suspect.
    pub const WARNING_MASK: Self = Self(
        Self::SUSPECT_DATA.0
            | Self::WARNING_HIGH.0
            | Self::WARNING_LOW.0
            | Self::CALCULATION_WARNING.0
            | Self::SUSPECT_TIME.0,
    );

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set.
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Number of error bits set.
    #[inline]
    pub const fn error_count(self) -> u32 {
        (self.0 & Self::ERROR_MASK.0).count_ones()
    }

    /// Number of warning bits set.
    #[inline]
    pub const fn warning_count(self) -> u32 {
        (self.0 & Self::WARNING_MASK.0).count_ones()
    }

    /// Timestamp is usable (bad-time bit clear).
    #[inline]
    pub const fn timestamp_is_good(self) -> bool {
        !self.intersects(Self::BAD_TIME)
    }
}

impl BitOr for MeasurementStateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MeasurementStateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for MeasurementStateFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for MeasurementStateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// A single timestamped sample.
///
/// The concentrator never changes `key`; it only copies measurements into
/// frames and, when tracking is enabled, stamps `published_timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Signal identity
    pub key: MeasurementKey,

    /// Sample value
    pub value: f64,

    /// Source timestamp (ticks)
    pub timestamp: Ticks,

    /// Quality flags
    #[serde(default)]
    pub state_flags: MeasurementStateFlags,

    /// Local clock time the measurement was received (ticks, 0 = unknown)
    #[serde(default)]
    pub received_timestamp: Ticks,

    /// Local clock time the containing frame was published (ticks, 0 = not published)
    #[serde(default)]
    pub published_timestamp: Ticks,
}

impl Measurement {
    /// Create a measurement with normal quality and no receive/publish stamps.
    pub fn new(key: MeasurementKey, value: f64, timestamp: Ticks) -> Self {
        Self {
            key,
            value,
            timestamp,
            state_flags: MeasurementStateFlags::NORMAL,
            received_timestamp: 0,
            published_timestamp: 0,
        }
    }

    /// Builder-style state flag assignment.
    pub fn with_flags(mut self, flags: MeasurementStateFlags) -> Self {
        self.state_flags = flags;
        self
    }

    /// Builder-style receive stamp.
    pub fn with_received_timestamp(mut self, received: Ticks) -> Self {
        self.received_timestamp = received;
        self
    }

    /// Device did not report the timestamp as bad.
    #[inline]
    pub fn timestamp_is_good(&self) -> bool {
        self.state_flags.timestamp_is_good()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_counts() {
        let flags = MeasurementStateFlags::BAD_DATA
            | MeasurementStateFlags::ALARM_HIGH
            | MeasurementStateFlags::SUSPECT_DATA;
        assert_eq!(flags.error_count(), 2);
        assert_eq!(flags.warning_count(), 1);
        assert!(flags.contains(MeasurementStateFlags::BAD_DATA));
        assert!(!flags.contains(MeasurementStateFlags::BAD_TIME));
    }

    #[test]
    fn test_timestamp_quality() {
        let mut m = Measurement::new("DEV:1".parse().unwrap(), 1.0, 0);
        assert!(m.timestamp_is_good());

        m.state_flags.insert(MeasurementStateFlags::BAD_TIME);
        assert!(!m.timestamp_is_good());

        m.state_flags.remove(MeasurementStateFlags::BAD_TIME);
        assert!(m.timestamp_is_good());
    }

    #[test]
    fn test_flags_serialize_as_bits() {
        let flags = MeasurementStateFlags::BAD_TIME;
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, (1u32 << 16).to_string());
    }
}
