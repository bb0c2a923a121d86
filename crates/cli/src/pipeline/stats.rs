//! Pipeline statistics and metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use concentrator::{ConcentratorEvent, StatisticsSnapshot};
use dispatcher::MetricsSnapshot;
use observability::MetricsSummary;
use serde::Serialize;

/// Counts of concentrator notifications seen during a run
#[derive(Debug, Default)]
pub struct EventCounters {
    process_exceptions: AtomicU64,
    discard_reports: AtomicU64,
    unpublished_warnings: AtomicU64,
}

impl EventCounters {
    pub fn record(&self, event: &ConcentratorEvent) {
        let counter = match event {
            ConcentratorEvent::ProcessException { .. } => &self.process_exceptions,
            ConcentratorEvent::DiscardingMeasurements { .. } => &self.discard_reports,
            ConcentratorEvent::UnpublishedSamples { .. } => &self.unpublished_warnings,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EventTotals {
        EventTotals {
            process_exceptions: self.process_exceptions.load(Ordering::Relaxed),
            discard_reports: self.discard_reports.load(Ordering::Relaxed),
            unpublished_warnings: self.unpublished_warnings.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EventTotals {
    pub process_exceptions: u64,
    pub discard_reports: u64,
    pub unpublished_warnings: u64,
}

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Batches received from sources
    pub batches_received: u64,

    /// Measurements received from sources
    pub measurements_received: u64,

    /// Frames that reached the dispatcher
    pub frames_published: u64,

    /// Frames lost between the concentrator and the dispatcher
    pub frames_dropped: u64,

    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,

    pub active_sources: usize,
    pub active_sinks: usize,

    pub events: EventTotals,

    /// Engine counters at shutdown
    pub engine: StatisticsSnapshot,

    /// Aggregated view of the published frames
    pub publication: MetricsSummary,

    pub sinks: Vec<(String, MetricsSnapshot)>,

    /// Engine status report captured before shutdown
    #[serde(skip)]
    pub status: String,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl PipelineStats {
    /// Frames published per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames_published as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of received measurements the engine discarded, in percent
    pub fn discard_rate(&self) -> f64 {
        if self.engine.received_measurements > 0 {
            self.engine.discarded_measurements as f64 / self.engine.received_measurements as f64
                * 100.0
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Batches received: {}", self.batches_received);
        println!("   ├─ Measurements received: {}", self.measurements_received);
        println!("   ├─ Frames published: {}", self.frames_published);
        println!("   ├─ Frames dropped before dispatch: {}", self.frames_dropped);
        println!("   ├─ FPS: {:.2}", self.fps());
        println!("   ├─ Active sources: {}", self.active_sources);
        println!("   └─ Active sinks: {}", self.active_sinks);

        let engine = &self.engine;
        println!("\n📈 Concentrator");
        println!("   ├─ Sorted: {}", engine.processed_measurements);
        println!(
            "   ├─ Discarded: {} ({:.2}%)",
            engine.discarded_measurements,
            self.discard_rate()
        );
        println!("   ├─ Sorted by arrival: {}", engine.measurements_sorted_by_arrival);
        println!("   ├─ Downsampled: {}", engine.downsampled_measurements);
        println!("   ├─ Missed sorts by timeout: {}", engine.missed_sorts_by_timeout);
        println!("   ├─ Frames ahead of schedule: {}", engine.frames_ahead_of_schedule);
        println!(
            "   ├─ Avg publication time: {:.4} ms",
            engine.average_publication_time_per_frame()
        );
        println!(
            "   └─ Avg measurements per frame: {:.2}",
            engine.average_measurements_per_frame()
        );

        println!("\n🔔 Events");
        println!("   ├─ Discard reports: {}", self.events.discard_reports);
        println!("   ├─ Unpublished sample warnings: {}", self.events.unpublished_warnings);
        println!("   └─ Process exceptions: {}", self.events.process_exceptions);

        if !self.sinks.is_empty() {
            println!("\n📤 Sinks");
            for (i, (name, m)) in self.sinks.iter().enumerate() {
                let prefix = if i == self.sinks.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {} {}: written={}, failed={}, dropped={}",
                    prefix, name, m.write_count, m.failure_count, m.dropped_count
                );
            }
        }

        println!("\n{}", self.publication);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates() {
        let stats = PipelineStats {
            frames_published: 60,
            duration: Duration::from_secs(2),
            engine: StatisticsSnapshot {
                received_measurements: 200,
                discarded_measurements: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!((stats.fps() - 30.0).abs() < 1e-9);
        assert!((stats.discard_rate() - 5.0).abs() < 1e-9);
        assert_eq!(PipelineStats::default().fps(), 0.0);
    }

    #[test]
    fn test_event_counters() {
        let counters = EventCounters::default();
        counters.record(&ConcentratorEvent::UnpublishedSamples { seconds: 2 });
        counters.record(&ConcentratorEvent::DiscardingMeasurements { count: 3, last: None });
        counters.record(&ConcentratorEvent::DiscardingMeasurements { count: 1, last: None });

        let totals = counters.snapshot();
        assert_eq!(totals.discard_reports, 2);
        assert_eq!(totals.unpublished_warnings, 1);
        assert_eq!(totals.process_exceptions, 0);
    }
}
