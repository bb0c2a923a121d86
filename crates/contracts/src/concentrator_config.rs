//! Concentrator configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::{ContractError, Ticks, TICKS_PER_SECOND};

/// Concentrator configuration
///
/// `frames_per_second`, `lag_time` and `lead_time` are required; every other
/// setting has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ConcentratorConfig {
    /// Output frame rate
    #[validate(range(min = 1, message = "frames_per_second must be > 0"))]
    pub frames_per_second: u32,

    /// Seconds to wait for late measurements before a frame is published
    #[validate(range(exclusive_min = 0.0, message = "lag_time must be > 0"))]
    pub lag_time: f64,

    /// Seconds a measurement timestamp may run ahead of real time
    #[validate(range(exclusive_min = 0.0, message = "lead_time must be > 0"))]
    pub lead_time: f64,

    /// Bucket granularity in ticks (0 = full tick resolution, clamped to one second)
    #[serde(default)]
    pub time_resolution: Ticks,

    /// Round timestamps to the nearest frame instead of flooring
    #[serde(default)]
    pub round_to_nearest_timestamp: bool,

    /// Policy for multiple values of one key inside one frame
    #[serde(default)]
    pub downsampling_method: DownsamplingMethod,

    /// Publication cadence: < 0 frame rate, 0 as fast as data arrives, > 0 fixed milliseconds
    #[serde(default = "default_processing_interval")]
    pub processing_interval: i32,

    /// Drive the default cadence from the frame rate timer
    #[serde(default = "default_true")]
    pub use_precision_timer: bool,

    /// Publish a frame as soon as it holds `expected_measurements`
    #[serde(default = "default_true")]
    pub allow_preemptive_publishing: bool,

    /// Re-stamp unusable timestamps with arrival time instead of discarding
    #[serde(default = "default_true")]
    pub allow_sorts_by_arrival: bool,

    /// Accept measurements without bad-time or tolerance checks
    #[serde(default)]
    pub ignore_bad_timestamps: bool,

    /// Publish frames by local receipt time instead of their timestamps
    #[serde(default)]
    pub process_by_received_timestamp: bool,

    /// Use the local clock as real time
    #[serde(default)]
    pub use_local_clock_as_real_time: bool,

    /// Maintain a latest-value-per-key table
    #[serde(default)]
    pub track_latest_measurements: bool,

    /// Stamp publication time onto frames and measurements
    #[serde(default)]
    pub track_published_timestamp: bool,

    /// Reject timestamps further than `lead_time` ahead of real time
    #[serde(default = "default_true")]
    pub perform_timestamp_reasonability_check: bool,

    /// Measurements per complete frame (0 = unknown)
    #[serde(default)]
    pub expected_measurements: u32,

    /// Scheduler wait timeout in milliseconds (-1 = infinite, unset = derived from frame rate)
    #[serde(default)]
    #[validate(range(min = -1, message = "maximum_publication_timeout must be >= -1"))]
    pub maximum_publication_timeout: Option<i64>,

    /// External event wait timeout in milliseconds (-1 = infinite, unset = publication timeout)
    #[serde(default)]
    #[validate(range(min = -1, message = "external_event_timeout must be >= -1"))]
    pub external_event_timeout: Option<i64>,
}

fn default_true() -> bool {
    true
}

fn default_processing_interval() -> i32 {
    -1
}

impl ConcentratorConfig {
    /// Create a configuration with the required settings and defaults elsewhere.
    pub fn new(frames_per_second: u32, lag_time: f64, lead_time: f64) -> Self {
        Self {
            frames_per_second,
            lag_time,
            lead_time,
            time_resolution: 0,
            round_to_nearest_timestamp: false,
            downsampling_method: DownsamplingMethod::default(),
            processing_interval: default_processing_interval(),
            use_precision_timer: true,
            allow_preemptive_publishing: true,
            allow_sorts_by_arrival: true,
            ignore_bad_timestamps: false,
            process_by_received_timestamp: false,
            use_local_clock_as_real_time: false,
            track_latest_measurements: false,
            track_published_timestamp: false,
            perform_timestamp_reasonability_check: true,
            expected_measurements: 0,
            maximum_publication_timeout: None,
            external_event_timeout: None,
        }
    }

    /// Processing interval with values below -1 normalised to -1.
    pub fn effective_processing_interval(&self) -> i32 {
        self.processing_interval.max(-1)
    }

    /// Frames are published by receipt time: explicitly requested or implied
    /// by a non-negative processing interval.
    pub fn effective_process_by_received_timestamp(&self) -> bool {
        self.process_by_received_timestamp || self.effective_processing_interval() > -1
    }

    /// Local clock is real time, forced on when processing by receipt time.
    pub fn effective_use_local_clock(&self) -> bool {
        self.use_local_clock_as_real_time || self.effective_process_by_received_timestamp()
    }

    /// Sorts by arrival, forced off when processing by receipt time.
    pub fn effective_allow_sorts_by_arrival(&self) -> bool {
        self.allow_sorts_by_arrival && !self.effective_process_by_received_timestamp()
    }

    /// Precision timer use implied by the processing interval.
    pub fn effective_use_precision_timer(&self) -> bool {
        match self.effective_processing_interval() {
            -1 => self.use_precision_timer,
            0 => false,
            _ => true,
        }
    }

    /// Time resolution clamped to `[0, TICKS_PER_SECOND]`.
    pub fn effective_time_resolution(&self) -> Ticks {
        self.time_resolution.clamp(0, TICKS_PER_SECOND)
    }
}

/// Strategy for multiple values of one key landing in one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownsamplingMethod {
    /// Newest arrival replaces the stored value
    #[default]
    LastReceived,
    /// Value with timestamp nearest the frame timestamp wins
    Closest,
    /// Value with fewest error/warning flags wins, ties broken by `Closest`
    BestQuality,
    /// Caller-supplied filter over all candidates decides
    Filtered,
}

impl DownsamplingMethod {
    pub const ALL: [DownsamplingMethod; 4] = [
        Self::LastReceived,
        Self::Closest,
        Self::BestQuality,
        Self::Filtered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastReceived => "LastReceived",
            Self::Closest => "Closest",
            Self::BestQuality => "BestQuality",
            Self::Filtered => "Filtered",
        }
    }
}

impl fmt::Display for DownsamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownsamplingMethod {
    type Err = ContractError;

    /// Case-insensitive; accepts `LastReceived` and `last_received` forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        Self::ALL
            .into_iter()
            .find(|method| method.as_str().to_lowercase() == normalized)
            .ok_or_else(|| {
                ContractError::config_validation(
                    "downsampling_method",
                    format!("unknown downsampling method '{s}'"),
                )
            })
    }
}
