//! Per-sink counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    queue_len: AtomicUsize,
    write_count: AtomicU64,
    measurement_count: AtomicU64,
    failure_count: AtomicU64,
    dropped_count: AtomicU64,
    last_sequence: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames waiting in the sink queue
    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Frames written successfully
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Record a successful write of `sequence` holding `measurements` values
    pub fn record_write(&self, sequence: u64, measurements: usize) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.measurement_count
            .fetch_add(measurements as u64, Ordering::Relaxed);
        self.last_sequence.fetch_max(sequence, Ordering::Relaxed);
    }

    /// Measurements contained in written frames
    pub fn measurement_count(&self) -> u64 {
        self.measurement_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames dropped because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Highest publication sequence written
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            write_count: self.write_count(),
            measurement_count: self.measurement_count(),
            failure_count: self.failure_count(),
            dropped_count: self.dropped_count(),
            last_sequence: self.last_sequence(),
        }
    }
}

/// Point-in-time copy of [`SinkMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub write_count: u64,
    pub measurement_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
    pub last_sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_write_keeps_highest_sequence() {
        let metrics = SinkMetrics::new();
        metrics.record_write(7, 4);
        metrics.record_write(3, 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.write_count, 2);
        assert_eq!(snapshot.measurement_count, 6);
        assert_eq!(snapshot.last_sequence, 7);
    }
}
