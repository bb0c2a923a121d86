//! Backpressure configuration and metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// What to discard when the batch channel is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DropPolicy {
    /// Discard the batch being sent
    #[default]
    DropNewest,
    /// Discard the oldest queued batch to make room
    DropOldest,
}

/// Backpressure configuration
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Channel capacity in batches
    pub channel_capacity: usize,

    /// Drop policy when full
    pub drop_policy: DropPolicy,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

impl BackpressureConfig {
    pub fn new(channel_capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            channel_capacity,
            drop_policy,
        }
    }
}

/// Ingestion metrics shared by all sources of a pipeline
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Batches handed to the channel
    pub batches_sent: AtomicU64,

    /// Batches lost to backpressure
    pub batches_dropped: AtomicU64,

    /// Measurements generated
    pub measurements_generated: AtomicU64,

    /// Samples deliberately delivered late
    pub late_injected: AtomicU64,

    /// Samples flagged with a bad timestamp
    pub bad_time_injected: AtomicU64,

    /// Current queue length
    pub queue_len: AtomicUsize,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, measurements: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.measurements_generated
            .fetch_add(measurements as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late(&self) {
        self.late_injected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bad_time(&self) {
        self.bad_time_injected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            measurements_generated: self.measurements_generated.load(Ordering::Relaxed),
            late_injected: self.late_injected.load(Ordering::Relaxed),
            bad_time_injected: self.bad_time_injected.load(Ordering::Relaxed),
            queue_len: self.queue_len.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_sent: u64,
    pub batches_dropped: u64,
    pub measurements_generated: u64,
    pub late_injected: u64,
    pub bad_time_injected: u64,
    pub queue_len: usize,
}
