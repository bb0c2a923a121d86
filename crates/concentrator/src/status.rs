//! Status report rendering.

use std::fmt;

use contracts::{format_ticks, ConcentratorConfig, Measurement, Ticks};
use serde::Serialize;

use crate::StatisticsSnapshot;

/// Point-in-time view of a concentrator's settings, clocks and counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub enabled: bool,
    pub running: bool,
    pub disposed: bool,
    pub run_time: f64,
    pub real_time: Ticks,
    pub local_clock: Ticks,
    pub process_by_received_timestamp: bool,
    pub use_local_clock_as_real_time: bool,
    pub allow_sorts_by_arrival: bool,
    pub publication_timeout_ms: Option<u64>,
    pub external_event_timeout_ms: Option<u64>,
    pub external_events: usize,
    pub config: ConcentratorConfig,
    pub statistics: StatisticsSnapshot,
    pub queue_depth: usize,
    pub last_published_frame: Option<Ticks>,
    /// Last discarded measurement and its latency in seconds
    pub last_discarded: Option<(Measurement, f64)>,
    pub timer_missed_ticks: Option<u64>,
}

fn timeout(ms: Option<u64>) -> String {
    ms.map_or_else(|| "infinite".to_string(), |ms| format!("{ms} ms"))
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = &self.config;
        let stats = &self.statistics;

        writeln!(f, "                 Enabled: {}", yes_no(self.enabled))?;
        writeln!(f, "                 Running: {}", yes_no(self.running))?;
        writeln!(f, "                Run time: {:.3} s", self.run_time)?;
        writeln!(f, "       Frames per second: {}", config.frames_per_second)?;
        writeln!(f, "                Lag time: {} s", config.lag_time)?;
        writeln!(f, "               Lead time: {} s", config.lead_time)?;
        writeln!(f, "         Time resolution: {} ticks", config.effective_time_resolution())?;
        writeln!(f, "     Round to nearest ts: {}", yes_no(config.round_to_nearest_timestamp))?;
        writeln!(f, "     Downsampling method: {}", config.downsampling_method)?;
        writeln!(f, "     Processing interval: {}", config.effective_processing_interval())?;
        writeln!(f, "     Process by received: {}", yes_no(self.process_by_received_timestamp))?;
        writeln!(f, "   Local clock real time: {}", yes_no(self.use_local_clock_as_real_time))?;
        writeln!(f, "        Sorts by arrival: {}", yes_no(self.allow_sorts_by_arrival))?;
        writeln!(f, "   Preemptive publishing: {}", yes_no(config.allow_preemptive_publishing))?;
        writeln!(f, "   Ignore bad timestamps: {}", yes_no(config.ignore_bad_timestamps))?;
        writeln!(f, "     Reasonability check: {}", yes_no(config.perform_timestamp_reasonability_check))?;
        writeln!(f, "   Expected measurements: {}", config.expected_measurements)?;
        writeln!(f, "     Publication timeout: {}", timeout(self.publication_timeout_ms))?;
        writeln!(f, "  External event timeout: {}", timeout(self.external_event_timeout_ms))?;
        writeln!(f, "         External events: {}", self.external_events)?;
        writeln!(f, "               Real time: {}", format_ticks(self.real_time))?;
        writeln!(f, "             Local clock: {}", format_ticks(self.local_clock))?;
        writeln!(f, "           Queued frames: {}", self.queue_depth)?;
        if let Some(last) = self.last_published_frame {
            writeln!(f, "    Last published frame: {}", format_ticks(last))?;
        }
        writeln!(f, "   Received measurements: {}", stats.received_measurements)?;
        writeln!(f, "  Processed measurements: {}", stats.processed_measurements)?;
        writeln!(f, "  Discarded measurements: {}", stats.discarded_measurements)?;
        writeln!(f, "Downsampled measurements: {}", stats.downsampled_measurements)?;
        writeln!(f, "       Sorted by arrival: {}", stats.measurements_sorted_by_arrival)?;
        writeln!(f, " Missed sorts by timeout: {}", stats.missed_sorts_by_timeout)?;
        writeln!(f, "Frames ahead of schedule: {}", stats.frames_ahead_of_schedule)?;
        writeln!(f, "        Published frames: {}", stats.published_frames)?;
        writeln!(f, "  Published measurements: {}", stats.published_measurements)?;
        writeln!(
            f,
            "  Avg measurements/frame: {:.2}",
            stats.average_measurements_per_frame()
        )?;
        writeln!(
            f,
            "    Avg publication time: {:.4} ms",
            stats.average_publication_time_per_frame()
        )?;
        writeln!(f, " Wait handle expirations: {}", stats.wait_handle_expirations)?;
        if let Some(missed) = self.timer_missed_ticks {
            writeln!(f, "      Timer missed ticks: {missed}")?;
        }
        if let Some((measurement, latency)) = &self.last_discarded {
            writeln!(
                f,
                "          Last discarded: {} at {} ({latency:.3} s latency)",
                measurement,
                format_ticks(measurement.timestamp)
            )?;
        }
        Ok(())
    }
}
