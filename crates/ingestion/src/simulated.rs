//! Simulated measurement source
//!
//! Emits one batch per sample interval with a value per signal. Delivery
//! jitter, late samples and bad-time flags are injected at configured rates so
//! the concentrator's tolerance handling can be exercised without devices.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    now_ticks, ticks_from_seconds, ticks_to_seconds, Measurement, MeasurementKey,
    MeasurementStateFlags, SourceConfig, Ticks, TICKS_PER_SECOND,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::adapter::MeasurementSource;
use crate::backpressure::{BatchSender, MeasurementBatch};
use crate::config::IngestionMetrics;
use crate::error::{IngestionError, Result};

/// Default age of samples injected as late
const DEFAULT_LATE_DELAY: Duration = Duration::from_secs(10);

/// One generated sample and how long to hold it before delivery
#[derive(Debug, Clone)]
pub struct GeneratedBatch {
    pub batch: MeasurementBatch,
    pub delay: Duration,
    pub late: bool,
    pub bad_time: bool,
}

/// Deterministic core of a simulated source.
pub struct SampleGenerator {
    source: Arc<str>,
    keys: Arc<[MeasurementKey]>,
    interval: Ticks,
    clock_offset: Ticks,
    late_delay: Ticks,
    jitter_ms: f64,
    late_probability: f64,
    bad_time_probability: f64,
    rng: StdRng,
}

impl SampleGenerator {
    fn new(
        config: &SourceConfig,
        keys: Arc<[MeasurementKey]>,
        late_delay: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            source: config.name.as_str().into(),
            keys,
            interval: ((TICKS_PER_SECOND as f64 / config.rate_hz).round() as Ticks).max(1),
            clock_offset: ticks_from_seconds(config.clock_offset_ms / 1000.0),
            late_delay: ticks_from_seconds(late_delay.as_secs_f64()),
            jitter_ms: config.jitter_ms,
            late_probability: config.late_probability,
            bad_time_probability: config.bad_time_probability,
            rng,
        }
    }

    /// Device timestamp for a sample taken at `now`, aligned to the sample interval.
    pub fn sample_timestamp(&self, now: Ticks) -> Ticks {
        let device = now + self.clock_offset;
        let base = device - device.rem_euclid(TICKS_PER_SECOND);
        let offset = device - base;
        base + offset - offset % self.interval
    }

    /// Produce the batch for the sample instant containing `now`.
    pub fn next_batch(&mut self, now: Ticks) -> GeneratedBatch {
        let mut timestamp = self.sample_timestamp(now);

        let late = self.late_probability > 0.0 && self.rng.random_bool(self.late_probability);
        if late {
            timestamp -= self.late_delay;
        }

        let bad_time =
            self.bad_time_probability > 0.0 && self.rng.random_bool(self.bad_time_probability);
        let flags = if bad_time {
            MeasurementStateFlags::BAD_TIME
        } else {
            MeasurementStateFlags::NORMAL
        };

        let seconds = ticks_to_seconds(timestamp);
        let measurements = self
            .keys
            .iter()
            .enumerate()
            .map(|(i, key)| {
                let phase = i as f64 * TAU / self.keys.len() as f64;
                let value = 100.0 * (i as f64 + 1.0) + (TAU * 0.5 * seconds + phase).sin();
                Measurement::new(key.clone(), value, timestamp)
                    .with_flags(flags)
                    .with_received_timestamp(now)
            })
            .collect();

        let delay = if self.jitter_ms > 0.0 {
            Duration::from_secs_f64(self.rng.random_range(0.0..self.jitter_ms) / 1000.0)
        } else {
            Duration::ZERO
        };

        GeneratedBatch {
            batch: MeasurementBatch {
                source: Arc::clone(&self.source),
                measurements,
            },
            delay,
            late,
            bad_time,
        }
    }
}

/// Source producing synthetic measurements at `rate_hz`.
pub struct SimulatedSource {
    config: SourceConfig,
    keys: Arc<[MeasurementKey]>,
    late_delay: Duration,
    seed: Option<u64>,
    running: Arc<AtomicBool>,
}

impl SimulatedSource {
    /// Create a source; every signal gets a freshly generated key.
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.rate_hz <= 0.0 || !config.rate_hz.is_finite() {
            return Err(IngestionError::InvalidSource {
                source_name: config.name.clone(),
                message: format!("rate_hz must be > 0, got {}", config.rate_hz),
            });
        }
        if config.signal_count == 0 {
            return Err(IngestionError::InvalidSource {
                source_name: config.name.clone(),
                message: "signal_count must be > 0".into(),
            });
        }
        for p in [config.late_probability, config.bad_time_probability] {
            if !(0.0..=1.0).contains(&p) {
                return Err(IngestionError::InvalidSource {
                    source_name: config.name.clone(),
                    message: format!("probability {p} outside [0, 1]"),
                });
            }
        }

        let keys: Arc<[MeasurementKey]> = (1..=config.signal_count)
            .map(|id| MeasurementKey::generate(&config.name, id))
            .collect();

        Ok(Self {
            config,
            keys,
            late_delay: DEFAULT_LATE_DELAY,
            seed: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// How far in the past late samples are stamped.
    pub fn with_late_delay(mut self, delay: Duration) -> Self {
        self.late_delay = delay;
        self
    }

    /// Fix the random sequence.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn keys(&self) -> &[MeasurementKey] {
        &self.keys
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Generator with this source's settings, usable without a runtime.
    pub fn generator(&self) -> SampleGenerator {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        SampleGenerator::new(&self.config, Arc::clone(&self.keys), self.late_delay, rng)
    }
}

impl MeasurementSource for SimulatedSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn signal_count(&self) -> usize {
        self.keys.len()
    }

    fn start(&self, tx: BatchSender, metrics: Arc<IngestionMetrics>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut generator = self.generator();
        let running = Arc::clone(&self.running);
        let name = self.config.name.clone();
        let period = Duration::from_secs_f64(1.0 / self.config.rate_hz);

        tokio::spawn(async move {
            debug!(source = %name, period_ms = period.as_secs_f64() * 1000.0, "simulated source started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                if !running.load(Ordering::Relaxed) {
                    break;
                }

                let generated = generator.next_batch(now_ticks());
                if generated.late {
                    metrics.record_late();
                }
                if generated.bad_time {
                    metrics.record_bad_time();
                }

                if generated.delay.is_zero() {
                    if let Err(e) = tx.send(generated.batch, &metrics) {
                        debug!(source = %name, error = %e, "simulated source channel closed");
                        break;
                    }
                } else {
                    let tx = tx.clone();
                    let metrics = Arc::clone(&metrics);
                    tokio::spawn(async move {
                        tokio::time::sleep(generated.delay).await;
                        let _ = tx.send(generated.batch, &metrics);
                    });
                }
                trace!(source = %name, "sample generated");
            }

            running.store(false, Ordering::SeqCst);
            debug!(source = %name, "simulated source stopped");
        });
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::batch_channel;
    use crate::config::DropPolicy;

    const EPOCH: Ticks = 1_700_000_000 * TICKS_PER_SECOND;

    fn source_config(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            signal_count: 3,
            rate_hz: 30.0,
            jitter_ms: 0.0,
            late_probability: 0.0,
            bad_time_probability: 0.0,
            clock_offset_ms: 0.0,
        }
    }

    #[test]
    fn test_invalid_source() {
        let mut config = source_config("PMU1");
        config.rate_hz = 0.0;
        assert!(SimulatedSource::new(config).is_err());

        let mut config = source_config("PMU1");
        config.signal_count = 0;
        assert!(SimulatedSource::new(config).is_err());
    }

    #[test]
    fn test_keys_per_signal() {
        let source = SimulatedSource::new(source_config("PMU1")).unwrap();
        assert_eq!(source.keys().len(), 3);
        assert!(source.keys().iter().all(|k| k.source() == "PMU1"));
        assert_eq!(source.keys()[2].id(), 3);
    }

    #[test]
    fn test_timestamps_aligned_to_sample_interval() {
        let source = SimulatedSource::new(source_config("PMU1")).unwrap();
        let generator = source.generator();
        let interval = (TICKS_PER_SECOND as f64 / 30.0).round() as Ticks;

        assert_eq!(generator.sample_timestamp(EPOCH + 5), EPOCH);
        assert_eq!(generator.sample_timestamp(EPOCH + interval + 5), EPOCH + interval);
    }

    #[test]
    fn test_clock_offset_applied() {
        let mut config = source_config("PMU1");
        config.clock_offset_ms = 1000.0;
        let source = SimulatedSource::new(config).unwrap();
        assert_eq!(source.generator().sample_timestamp(EPOCH), EPOCH + TICKS_PER_SECOND);
    }

    #[test]
    fn test_batch_contents() {
        let source = SimulatedSource::new(source_config("PMU1")).unwrap().with_seed(7);
        let generated = source.generator().next_batch(EPOCH + 10);

        assert_eq!(generated.batch.measurements.len(), 3);
        assert!(!generated.late);
        assert_eq!(generated.delay, Duration::ZERO);
        for m in &generated.batch.measurements {
            assert_eq!(m.timestamp, EPOCH);
            assert_eq!(m.received_timestamp, EPOCH + 10);
            assert!(m.timestamp_is_good());
        }
    }

    #[test]
    fn test_fault_injection() {
        let mut config = source_config("PMU1");
        config.late_probability = 1.0;
        config.bad_time_probability = 1.0;
        config.jitter_ms = 20.0;
        let source = SimulatedSource::new(config)
            .unwrap()
            .with_seed(42)
            .with_late_delay(Duration::from_secs(5));

        let generated = source.generator().next_batch(EPOCH);
        assert!(generated.late);
        assert!(generated.bad_time);
        assert!(generated.delay < Duration::from_millis(20));
        let m = &generated.batch.measurements[0];
        assert_eq!(m.timestamp, EPOCH - 5 * TICKS_PER_SECOND);
        assert!(!m.timestamp_is_good());
    }

    #[tokio::test]
    async fn test_source_emits_batches() {
        let source = SimulatedSource::new(source_config("PMU1")).unwrap();
        let metrics = Arc::new(IngestionMetrics::new());
        let (tx, rx) = batch_channel(16, DropPolicy::DropNewest);

        source.start(tx, Arc::clone(&metrics));
        assert!(source.is_running());

        for _ in 0..3 {
            let batch = rx.recv().await.unwrap();
            assert_eq!(&*batch.source, "PMU1");
            assert_eq!(batch.measurements.len(), 3);
        }

        source.stop();
        assert!(!source.is_running());
        assert!(metrics.snapshot().batches_sent >= 3);
    }
}
