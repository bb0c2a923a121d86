//! Notifications and per-measurement outcomes.

use std::fmt;

use contracts::Measurement;

/// Why a measurement did not make it into a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    /// Device flagged the timestamp bad and sorts by arrival are off
    BadTimestamp,
    /// Timestamp outside the lag/lead window and sorts by arrival are off
    OutsideTolerance,
    /// Destination frame was already published
    FramePublished,
    /// Downsampling filter returned no value
    FilterRejected,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadTimestamp => "bad_timestamp",
            Self::OutsideTolerance => "outside_tolerance",
            Self::FramePublished => "frame_published",
            Self::FilterRejected => "filter_rejected",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one sorted measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOutcome {
    /// Placed by its own timestamp
    Sorted,
    /// Placed by arrival time
    SortedByArrival,
    Discarded(DiscardReason),
    /// Concentrator disabled; not counted
    Ignored,
}

impl SortOutcome {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Sorted | Self::SortedByArrival)
    }
}

/// Broadcast to subscribers of a running concentrator
#[derive(Debug, Clone)]
pub enum ConcentratorEvent {
    /// Publish hook failed or panicked
    ProcessException { message: String },
    /// Measurements dropped by one sort call
    DiscardingMeasurements {
        count: usize,
        last: Option<Measurement>,
    },
    /// Whole seconds of data waiting beyond the one being published
    UnpublishedSamples { seconds: u64 },
}

impl fmt::Display for ConcentratorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessException { message } => write!(f, "process exception: {message}"),
            Self::DiscardingMeasurements { count, .. } => {
                write!(f, "discarding {count} measurement(s)")
            }
            Self::UnpublishedSamples { seconds } => {
                write!(f, "{seconds} second(s) of unpublished samples")
            }
        }
    }
}
