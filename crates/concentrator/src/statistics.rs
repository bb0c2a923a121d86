//! Lock-free engine counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use contracts::{ticks_to_milliseconds, Ticks};
use serde::Serialize;

/// Running counters updated by producers and the scheduler
#[derive(Debug, Default)]
pub struct ConcentratorStatistics {
    received_measurements: AtomicU64,
    processed_measurements: AtomicU64,
    discarded_measurements: AtomicU64,
    downsampled_measurements: AtomicU64,
    measurements_sorted_by_arrival: AtomicU64,
    missed_sorts_by_timeout: AtomicU64,
    frames_ahead_of_schedule: AtomicU64,
    published_frames: AtomicU64,
    published_measurements: AtomicU64,
    wait_handle_expirations: AtomicU64,
    total_publication_time: AtomicI64,
}

macro_rules! counter_accessors {
    ($($field:ident => $inc:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.load(Ordering::Relaxed)
            }

            #[inline]
            pub(crate) fn $inc(&self, count: u64) {
                self.$field.fetch_add(count, Ordering::Relaxed);
            }
        )*
    };
}

impl ConcentratorStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    counter_accessors! {
        received_measurements => add_received,
        processed_measurements => add_processed,
        discarded_measurements => add_discarded,
        downsampled_measurements => add_downsampled,
        measurements_sorted_by_arrival => add_sorted_by_arrival,
        missed_sorts_by_timeout => add_missed_sorts_by_timeout,
        frames_ahead_of_schedule => add_frames_ahead_of_schedule,
        published_frames => add_published_frames,
        published_measurements => add_published_measurements,
        wait_handle_expirations => add_wait_handle_expirations,
    }

    /// Total time spent in the publish hook (ticks)
    pub fn total_publication_time(&self) -> Ticks {
        self.total_publication_time.load(Ordering::Relaxed)
    }

    pub(crate) fn add_publication_time(&self, ticks: Ticks) {
        self.total_publication_time.fetch_add(ticks.max(0), Ordering::Relaxed);
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.received_measurements,
            &self.processed_measurements,
            &self.discarded_measurements,
            &self.downsampled_measurements,
            &self.measurements_sorted_by_arrival,
            &self.missed_sorts_by_timeout,
            &self.frames_ahead_of_schedule,
            &self.published_frames,
            &self.published_measurements,
            &self.wait_handle_expirations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.total_publication_time.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            received_measurements: self.received_measurements(),
            processed_measurements: self.processed_measurements(),
            discarded_measurements: self.discarded_measurements(),
            downsampled_measurements: self.downsampled_measurements(),
            measurements_sorted_by_arrival: self.measurements_sorted_by_arrival(),
            missed_sorts_by_timeout: self.missed_sorts_by_timeout(),
            frames_ahead_of_schedule: self.frames_ahead_of_schedule(),
            published_frames: self.published_frames(),
            published_measurements: self.published_measurements(),
            wait_handle_expirations: self.wait_handle_expirations(),
            total_publication_time: self.total_publication_time(),
        }
    }
}

/// Point-in-time copy of [`ConcentratorStatistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub received_measurements: u64,
    pub processed_measurements: u64,
    pub discarded_measurements: u64,
    pub downsampled_measurements: u64,
    pub measurements_sorted_by_arrival: u64,
    pub missed_sorts_by_timeout: u64,
    pub frames_ahead_of_schedule: u64,
    pub published_frames: u64,
    pub published_measurements: u64,
    pub wait_handle_expirations: u64,
    pub total_publication_time: Ticks,
}

impl StatisticsSnapshot {
    /// Mean time in the publish hook per frame, in milliseconds.
    pub fn average_publication_time_per_frame(&self) -> f64 {
        if self.published_frames == 0 {
            0.0
        } else {
            ticks_to_milliseconds(self.total_publication_time) / self.published_frames as f64
        }
    }

    /// Mean measurements per published frame.
    pub fn average_measurements_per_frame(&self) -> f64 {
        if self.published_frames == 0 {
            0.0
        } else {
            self.published_measurements as f64 / self.published_frames as f64
        }
    }
}
