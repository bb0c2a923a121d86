//! Publication metrics
//!
//! Records metrics for frames leaving the concentrator. The engine itself
//! reports sorting and queue metrics; these helpers cover the pipeline
//! around it.

use std::collections::HashMap;

use contracts::PublishedFrame;
use metrics::{counter, gauge, histogram};
use serde::Serialize;

/// Record metrics for one published frame.
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_publication_metrics;
///
/// while let Some(frame) = rx.recv().await {
///     record_publication_metrics(&frame);
/// }
/// ```
pub fn record_publication_metrics(frame: &PublishedFrame) {
    counter!("concentrator_output_frames_total").increment(1);
    gauge!("concentrator_output_last_sequence").set(frame.sequence as f64);

    histogram!("concentrator_publication_latency_ms").record(frame.publication_latency() * 1000.0);
    histogram!("concentrator_frame_measurements").record(frame.measurements.len() as f64);

    let missing = frame.missing_measurements();
    gauge!("concentrator_frame_missing_measurements").set(missing as f64);
    if missing > 0 {
        counter!("concentrator_incomplete_frames_total").increment(1);
        counter!("concentrator_missing_measurements_total").increment(missing);
    }

    if frame.meta.downsampled_measurements > 0 {
        counter!("concentrator_output_downsampled_total")
            .increment(frame.meta.downsampled_measurements);
    }
}

/// Record a batch arriving from a measurement source
pub fn record_batch_received(source: &str, measurements: usize) {
    counter!("ingestion_batches_received_total", "source" => source.to_string()).increment(1);
    counter!(
        "ingestion_measurements_received_total",
        "source" => source.to_string()
    )
    .increment(measurements as u64);
}

/// Record a frame handed to a sink
pub fn record_frame_dispatched(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "dispatcher_frames_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a sink queue depth
pub fn record_sink_queue_depth(sink_name: &str, depth: usize) {
    gauge!("dispatcher_sink_queue_depth", "sink" => sink_name.to_string()).set(depth as f64);
}

/// Aggregates publication metrics in memory for an end-of-run summary.
#[derive(Debug, Clone, Default)]
pub struct PublicationMetricsAggregator {
    pub total_frames: u64,
    pub total_measurements: u64,
    pub total_missing: u64,
    pub total_downsampled: u64,
    pub incomplete_frames: u64,
    /// Frames skipped between consecutive sequence numbers
    pub sequence_gaps: u64,
    pub latency_stats: RunningStats,
    pub size_stats: RunningStats,
    pub source_counts: HashMap<String, u64>,
    last_sequence: Option<u64>,
}

impl PublicationMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, frame: &PublishedFrame) {
        self.total_frames += 1;
        self.total_measurements += frame.measurements.len() as u64;
        self.total_downsampled += frame.meta.downsampled_measurements;

        let missing = frame.missing_measurements();
        if missing > 0 {
            self.incomplete_frames += 1;
            self.total_missing += missing;
        }

        if let Some(last) = self.last_sequence {
            self.sequence_gaps += frame.sequence.saturating_sub(last + 1);
        }
        self.last_sequence = Some(frame.sequence);

        self.latency_stats.push(frame.publication_latency() * 1000.0);
        self.size_stats.push(frame.measurements.len() as f64);

        for measurement in &frame.measurements {
            *self
                .source_counts
                .entry(measurement.key.source().to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let rate = |count: u64| {
            if self.total_frames > 0 {
                count as f64 / self.total_frames as f64 * 100.0
            } else {
                0.0
            }
        };

        MetricsSummary {
            total_frames: self.total_frames,
            total_measurements: self.total_measurements,
            total_missing: self.total_missing,
            total_downsampled: self.total_downsampled,
            incomplete_frames: self.incomplete_frames,
            incomplete_rate: rate(self.incomplete_frames),
            sequence_gaps: self.sequence_gaps,
            latency_ms: StatsSummary::from(&self.latency_stats),
            frame_size: StatsSummary::from(&self.size_stats),
            source_counts: self.source_counts.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// End-of-run publication summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub total_measurements: u64,
    pub total_missing: u64,
    pub total_downsampled: u64,
    pub incomplete_frames: u64,
    pub incomplete_rate: f64,
    pub sequence_gaps: u64,
    pub latency_ms: StatsSummary,
    pub frame_size: StatsSummary,
    pub source_counts: HashMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Publication Summary ===")?;
        writeln!(f, "Total frames: {}", self.total_frames)?;
        writeln!(f, "Total measurements: {}", self.total_measurements)?;
        writeln!(
            f,
            "Incomplete frames: {} ({:.2}%), {} measurements missing",
            self.incomplete_frames, self.incomplete_rate, self.total_missing
        )?;
        writeln!(f, "Downsampled measurements: {}", self.total_downsampled)?;
        writeln!(f, "Sequence gaps: {}", self.sequence_gaps)?;
        writeln!(f, "Publication latency (ms): {}", self.latency_ms)?;
        writeln!(f, "Frame size: {}", self.frame_size)?;

        if !self.source_counts.is_empty() {
            let mut sources: Vec<_> = self.source_counts.iter().collect();
            sources.sort();
            writeln!(f, "Measurements per source:")?;
            for (source, count) in sources {
                writeln!(f, "  {}: {}", source, count)?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Measurement, MeasurementKey, PublicationMeta, TICKS_PER_MILLISECOND, TICKS_PER_SECOND};

    const EPOCH: i64 = 1_700_000_000 * TICKS_PER_SECOND;

    fn frame(sequence: u64, sources: &[(&str, u32)], expected: u32, latency_ms: i64) -> PublishedFrame {
        PublishedFrame {
            timestamp: EPOCH,
            index: 0,
            sequence,
            measurements: sources
                .iter()
                .map(|(source, id)| Measurement::new(MeasurementKey::generate(source, *id), 0.0, EPOCH))
                .collect(),
            meta: PublicationMeta {
                expected_measurements: expected,
                downsampled_measurements: 1,
                published_timestamp: EPOCH + latency_ms * TICKS_PER_MILLISECOND,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = PublicationMetricsAggregator::new();

        aggregator.update(&frame(1, &[("PMU1", 1), ("PMU2", 1)], 3, 40));
        aggregator.update(&frame(4, &[("PMU1", 1), ("PMU1", 2), ("PMU2", 1)], 3, 60));

        assert_eq!(aggregator.total_frames, 2);
        assert_eq!(aggregator.total_measurements, 5);
        assert_eq!(aggregator.incomplete_frames, 1);
        assert_eq!(aggregator.total_missing, 1);
        assert_eq!(aggregator.total_downsampled, 2);
        assert_eq!(aggregator.sequence_gaps, 2);
        assert_eq!(aggregator.source_counts.get("PMU1"), Some(&3));
        assert!((aggregator.latency_stats.mean() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = PublicationMetricsAggregator::new();
        for sequence in 1..=4 {
            let expected = if sequence == 1 { 2 } else { 1 };
            aggregator.update(&frame(sequence, &[("PMU1", 1)], expected, 10));
        }

        let summary = aggregator.summary();
        let output = format!("{}", summary);
        assert!(output.contains("Total frames: 4"));
        assert!(output.contains("25.00%"));
        assert!(output.contains("PMU1: 4"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["incomplete_frames"], 1);
    }
}
