//! PublishedFrame - Concentrator output
//!
//! Owned, serializable snapshot of a frame handed to downstream sinks.

use serde::{Deserialize, Serialize};

use crate::{Measurement, Ticks};

/// Time-aligned frame as delivered to sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedFrame {
    /// Bucket timestamp (ticks)
    pub timestamp: Ticks,

    /// Frame index within its second (0 ..< frames_per_second)
    pub index: usize,

    /// Publication sequence number (monotonically increasing)
    pub sequence: u64,

    /// Measurements in the frame, ordered by key
    pub measurements: Vec<Measurement>,

    /// Publication metadata
    pub meta: PublicationMeta,
}

/// Per-frame publication metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicationMeta {
    /// Measurements sorted into the frame
    pub sorted_measurements: u64,

    /// Same-key arrivals folded by the downsampling policy
    pub downsampled_measurements: u64,

    /// Measurements a complete frame should hold (0 = unknown)
    pub expected_measurements: u32,

    /// Local clock time the frame was created (ticks)
    pub received_timestamp: Ticks,

    /// Local clock time the frame was published (ticks)
    pub published_timestamp: Ticks,
}

impl PublishedFrame {
    /// Expected measurements that never arrived (0 when unknown).
    pub fn missing_measurements(&self) -> u64 {
        u64::from(self.meta.expected_measurements).saturating_sub(self.measurements.len() as u64)
    }

    /// Seconds between bucket time and publication.
    pub fn publication_latency(&self) -> f64 {
        crate::ticks_to_seconds(self.meta.published_timestamp - self.timestamp)
    }
}
