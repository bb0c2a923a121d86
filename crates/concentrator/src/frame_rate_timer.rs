//! Frame rate timer.
//!
//! A second does not divide evenly into most frame rates at millisecond
//! precision, so each frame gets its own whole-millisecond period and the
//! leftover milliseconds are spread evenly across the second.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, instrument};

/// Periods in milliseconds for each frame of one second at `frames_per_second`.
pub fn frame_periods(frames_per_second: u32) -> Vec<u64> {
    let fps = i64::from(frames_per_second.clamp(1, 1000));
    let frame_rate = (1000.0 / fps as f64).round() as i64;
    let deficit = 1000 - frame_rate * fps;
    let step = deficit.signum();
    let interval = if deficit == 0 { 0 } else { fps / deficit.abs() };

    let distance = |i: i64| {
        let position = (i + 1) % interval;
        (interval - position).min(position)
    };

    (0..fps)
        .map(|i| {
            let adjustment = if interval == 0 || i == 0 {
                0
            } else if i == fps - 1 {
                step
            } else {
                let current = distance(i);
                if current <= distance(i - 1) && current < distance(i + 1) {
                    step
                } else {
                    0
                }
            };
            (frame_rate + adjustment).max(1) as u64
        })
        .collect()
}

/// Periodic signal source driving the publication scheduler.
#[derive(Debug)]
pub struct FrameRateTimer {
    periods: Vec<u64>,
    ticks: AtomicU64,
    missed: AtomicU64,
}

impl FrameRateTimer {
    /// Timer firing once per frame.
    pub fn new(frames_per_second: u32) -> Self {
        Self::with_periods(frame_periods(frames_per_second))
    }

    /// Timer firing every `interval_ms` milliseconds.
    pub fn fixed(interval_ms: u64) -> Self {
        Self::with_periods(vec![interval_ms.max(1)])
    }

    fn with_periods(periods: Vec<u64>) -> Self {
        Self {
            periods,
            ticks: AtomicU64::new(0),
            missed: AtomicU64::new(0),
        }
    }

    pub fn periods(&self) -> &[u64] {
        &self.periods
    }

    /// Signals delivered
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Periods skipped because the runtime fell behind
    pub fn missed_ticks(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    /// Run until `shutdown` flips to true, notifying `signal` every period.
    pub fn spawn(
        self: &Arc<Self>,
        signal: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let timer = Arc::clone(self);
        tokio::spawn(async move { timer.run(signal, shutdown).await })
    }

    #[instrument(name = "frame_rate_timer", skip_all, fields(periods = self.periods.len()))]
    async fn run(&self, signal: Arc<Notify>, mut shutdown: watch::Receiver<bool>) {
        debug!("frame rate timer started");
        let mut next = Instant::now();
        let mut index = 0;

        loop {
            let period = Duration::from_millis(self.periods[index]);
            index = (index + 1) % self.periods.len();
            next += period;

            tokio::select! {
                _ = sleep_until(next) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let now = Instant::now();
            let behind = now.saturating_duration_since(next);
            if behind > period {
                let skipped = (behind.as_millis() / period.as_millis().max(1)) as u64;
                self.missed.fetch_add(skipped, Ordering::Relaxed);
                next = now;
            }

            self.ticks.fetch_add(1, Ordering::Relaxed);
            signal.notify_one();
        }

        debug!(ticks = self.tick_count(), missed = self.missed_ticks(), "frame rate timer stopped");
    }
}
