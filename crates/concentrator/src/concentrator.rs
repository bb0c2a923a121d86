//! Concentrator - sorts measurements into frames and publishes them on schedule.
//!
//! Producers call [`Concentrator::sort_measurements`] from any thread. One
//! scheduler task publishes ready frames in ascending timestamp order through
//! the [`FramePublisher`] hook.

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    ticks_from_seconds, ticks_to_seconds, ConcentratorConfig, DownsamplingMethod, Measurement,
    MeasurementKey, Ticks, TICKS_PER_MILLISECOND, TICKS_PER_SECOND,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};
use validator::Validate;

use crate::clock::{Clock, SystemClock};
use crate::downsampling::MeasurementFilter;
use crate::events::{ConcentratorEvent, DiscardReason, SortOutcome};
use crate::frame_queue::{FrameQueue, NoFrame, QueueSettings};
use crate::frame_rate_timer::FrameRateTimer;
use crate::publisher::FramePublisher;
use crate::statistics::{ConcentratorStatistics, StatisticsSnapshot};
use crate::status::StatusReport;
use crate::tracking_frame::MergeOutcome;
use crate::ConcentratorError;

const EVENT_CAPACITY: usize = 256;
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// What wakes the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    /// Once per frame, from the frame rate timer
    FrameRate,
    /// Fixed interval in milliseconds
    Fixed(u64),
    /// Every successful sort
    OnSort,
}

/// Configuration with every derived value resolved once
#[derive(Debug, Clone)]
struct RuntimeSettings {
    config: ConcentratorConfig,
    lag_ticks: Ticks,
    lead_ticks: Ticks,
    process_by_received: bool,
    use_local_clock: bool,
    allow_sorts_by_arrival: bool,
    cadence: Cadence,
    /// `None` waits forever
    publication_timeout: Option<Duration>,
    external_event_timeout: Option<Duration>,
}

impl RuntimeSettings {
    fn resolve(config: ConcentratorConfig) -> Self {
        let ticks_per_frame = TICKS_PER_SECOND / i64::from(config.frames_per_second.max(1));
        let derived_timeout_ms =
            ((ticks_per_frame as f64 * 1.2) / TICKS_PER_MILLISECOND as f64).round() as i64;

        let publication_timeout = timeout_from_ms(
            config
                .maximum_publication_timeout
                .unwrap_or(derived_timeout_ms.max(1)),
        );
        let external_event_timeout = match config.external_event_timeout {
            Some(ms) => timeout_from_ms(ms),
            None => publication_timeout,
        };

        let cadence = match config.effective_processing_interval() {
            interval if interval > 0 => Cadence::Fixed(interval as u64),
            -1 if config.use_precision_timer => Cadence::FrameRate,
            _ => Cadence::OnSort,
        };

        Self {
            lag_ticks: ticks_from_seconds(config.lag_time),
            lead_ticks: ticks_from_seconds(config.lead_time),
            process_by_received: config.effective_process_by_received_timestamp(),
            use_local_clock: config.effective_use_local_clock(),
            allow_sorts_by_arrival: config.effective_allow_sorts_by_arrival(),
            cadence,
            publication_timeout,
            external_event_timeout,
            config,
        }
    }

    fn queue_settings(&self, filter: Option<MeasurementFilter>) -> QueueSettings {
        let mut settings =
            QueueSettings::new(self.config.frames_per_second, self.config.effective_time_resolution());
        settings.round_to_nearest_timestamp = self.config.round_to_nearest_timestamp;
        settings.downsampling_method = self.config.downsampling_method;
        settings.filter = filter;
        settings.expected_measurements = self.config.expected_measurements as usize;
        settings
    }
}

fn timeout_from_ms(ms: i64) -> Option<Duration> {
    (ms >= 0).then(|| Duration::from_millis(ms.max(1) as u64))
}

fn validate_config(config: &ConcentratorConfig) -> Result<(), ConcentratorError> {
    config.validate()?;
    if !config.lag_time.is_finite() {
        return Err(ConcentratorError::invalid_setting("lag_time", "lag_time must be finite"));
    }
    if !config.lead_time.is_finite() {
        return Err(ConcentratorError::invalid_setting("lead_time", "lead_time must be finite"));
    }
    Ok(())
}

/// Background tasks of a started concentrator
struct SchedulerTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    timer: Option<Arc<FrameRateTimer>>,
}

impl SchedulerTasks {
    /// Signal every task to stop; in-flight publication completes on its own.
    fn halt(self) {
        let _ = self.shutdown.send(true);
        debug!(tasks = self.handles.len(), "scheduler tasks signalled to stop");
    }
}

/// State shared between the handle, producers, and background tasks
struct Shared {
    settings: RwLock<RuntimeSettings>,
    filter: RwLock<Option<MeasurementFilter>>,
    queue: FrameQueue,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn FramePublisher>,
    statistics: ConcentratorStatistics,
    events: broadcast::Sender<ConcentratorEvent>,
    real_time: AtomicI64,
    enabled: AtomicBool,
    disposed: AtomicBool,
    latest: DashMap<MeasurementKey, Measurement>,
    last_discarded: Mutex<Option<(Measurement, Ticks)>>,
    start_time: AtomicI64,
    stop_time: AtomicI64,
    publication_signal: Arc<Notify>,
    external_events: RwLock<Vec<Arc<Notify>>>,
    /// Held for the duration of a publication pass
    publishing: Mutex<()>,
}

/// Time-alignment and publication engine.
///
/// Lifecycle: created → started ⇄ stopped → disposed. Sorting is accepted
/// only while enabled; [`start`](Self::start) enables it and spawns the
/// scheduler onto the current tokio runtime.
pub struct Concentrator {
    shared: Arc<Shared>,
    tasks: Mutex<Option<SchedulerTasks>>,
}

impl Concentrator {
    /// Create a concentrator using the system clock.
    ///
    /// # Errors
    /// Returns [`ConcentratorError::InvalidSetting`] for a non-positive frame
    /// rate, lag time or lead time.
    pub fn new<P: FramePublisher>(
        config: ConcentratorConfig,
        publisher: P,
    ) -> Result<Self, ConcentratorError> {
        Self::with_clock(config, Arc::new(publisher), Arc::new(SystemClock))
    }

    /// Create a concentrator with an explicit publisher and time source.
    pub fn with_clock(
        config: ConcentratorConfig,
        publisher: Arc<dyn FramePublisher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConcentratorError> {
        validate_config(&config)?;

        let settings = RuntimeSettings::resolve(config);
        let queue = FrameQueue::new(settings.queue_settings(None));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let now = clock.now();

        debug!(
            frames_per_second = settings.config.frames_per_second,
            lag_time = settings.config.lag_time,
            lead_time = settings.config.lead_time,
            cadence = ?settings.cadence,
            "concentrator created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                settings: RwLock::new(settings),
                filter: RwLock::new(None),
                queue,
                clock,
                publisher,
                statistics: ConcentratorStatistics::new(),
                events,
                real_time: AtomicI64::new(now),
                enabled: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                latest: DashMap::new(),
                last_discarded: Mutex::new(None),
                start_time: AtomicI64::new(0),
                stop_time: AtomicI64::new(0),
                publication_signal: Arc::new(Notify::new()),
                external_events: RwLock::new(Vec::new()),
                publishing: Mutex::new(()),
            }),
            tasks: Mutex::new(None),
        })
    }

    // ===== Lifecycle =====

    /// Reset statistics, clear the queue, enable sorting and spawn the
    /// scheduler. Calling it while running is a no-op.
    ///
    /// # Errors
    /// Fails when disposed or when called outside a tokio runtime.
    #[instrument(name = "concentrator_start", skip(self))]
    pub fn start(&self) -> Result<(), ConcentratorError> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(ConcentratorError::Disposed);
        }
        tokio::runtime::Handle::try_current()
            .map_err(|e| ConcentratorError::RuntimeUnavailable(e.to_string()))?;

        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            self.shared.enabled.store(true, Ordering::Release);
            return Ok(());
        }

        let now = self.shared.clock.now();
        self.shared.statistics.reset();
        self.shared.queue.clear();
        self.shared.real_time.store(now, Ordering::Release);
        self.shared.start_time.store(now, Ordering::Release);
        self.shared.stop_time.store(0, Ordering::Release);
        self.shared.enabled.store(true, Ordering::Release);

        *tasks = Some(self.spawn_tasks());
        info!("concentrator started");
        Ok(())
    }

    /// Disable sorting, halt the scheduler and drop queued frames.
    ///
    /// Queued frames are not drained. Safe to call repeatedly.
    #[instrument(name = "concentrator_stop", skip(self))]
    pub fn stop(&self) {
        self.shared.enabled.store(false, Ordering::Release);

        let Some(tasks) = self.tasks.lock().take() else {
            return;
        };
        tasks.halt();
        self.shared.queue.clear();
        self.shared
            .stop_time
            .store(self.shared.clock.now(), Ordering::Release);
        info!(
            published_frames = self.shared.statistics.published_frames(),
            "concentrator stopped"
        );
    }

    /// Stop permanently and release queued frames. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop();
        self.shared.queue.clear();
        self.shared.latest.clear();
        debug!("concentrator disposed");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    pub fn enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Suppress or resume sorting (and publication) without touching the
    /// scheduler tasks.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
    }

    fn spawn_tasks(&self) -> SchedulerTasks {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let settings = self.shared.settings.read().clone();

        let timer = match settings.cadence {
            Cadence::FrameRate => Some(Arc::new(FrameRateTimer::new(
                settings.config.frames_per_second,
            ))),
            Cadence::Fixed(interval) => Some(Arc::new(FrameRateTimer::fixed(interval))),
            Cadence::OnSort => None,
        };

        let mut handles = Vec::with_capacity(3);
        if let Some(timer) = &timer {
            handles.push(timer.spawn(
                Arc::clone(&self.shared.publication_signal),
                shutdown_rx.clone(),
            ));
        }
        handles.push(tokio::spawn(run_scheduler(
            Arc::clone(&self.shared),
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(run_monitor(Arc::clone(&self.shared), shutdown_rx)));

        SchedulerTasks {
            shutdown,
            handles,
            timer,
        }
    }

    /// Replace the scheduler tasks after a cadence-affecting change.
    fn respawn_if_running(&self) {
        let mut tasks = self.tasks.lock();
        if let Some(old) = tasks.take() {
            old.halt();
            *tasks = Some(self.spawn_tasks());
        }
    }

    // ===== Sorting =====

    /// Sort one measurement.
    pub fn sort_measurement(&self, measurement: Measurement) -> SortOutcome {
        let settings = self.shared.settings.read().clone();
        let outcome = self.shared.sort_one(&settings, measurement);

        match outcome {
            SortOutcome::Discarded(_) => self.shared.report_discards(1),
            SortOutcome::Sorted | SortOutcome::SortedByArrival => {
                if settings.cadence == Cadence::OnSort {
                    self.shared.publication_signal.notify_one();
                }
            }
            SortOutcome::Ignored => {}
        }
        outcome
    }

    /// Sort a batch; returns the number of measurements placed into frames.
    #[instrument(name = "concentrator_sort", level = "trace", skip_all)]
    pub fn sort_measurements<I>(&self, measurements: I) -> usize
    where
        I: IntoIterator<Item = Measurement>,
    {
        if !self.enabled() {
            return 0;
        }

        let settings = self.shared.settings.read().clone();
        let mut accepted = 0;
        let mut discarded = 0;

        for measurement in measurements {
            match self.shared.sort_one(&settings, measurement) {
                SortOutcome::Sorted | SortOutcome::SortedByArrival => accepted += 1,
                SortOutcome::Discarded(_) => discarded += 1,
                SortOutcome::Ignored => {}
            }
        }

        if discarded > 0 {
            self.shared.report_discards(discarded);
        }
        if accepted > 0 && settings.cadence == Cadence::OnSort {
            self.shared.publication_signal.notify_one();
        }
        accepted
    }

    /// Run one publication pass now. The scheduler calls this on every tick.
    ///
    /// Returns the number of frames published.
    pub fn publish_ready_frames(&self) -> usize {
        self.shared.publish_ready_frames()
    }

    // ===== Real time =====

    /// Best current estimate of "now" (ticks).
    pub fn real_time(&self) -> Ticks {
        let settings = self.shared.settings.read();
        self.shared.real_time_with(&settings)
    }

    /// Seconds between real time and `ticks` (positive when `ticks` is in the past).
    pub fn seconds_from_real_time(&self, ticks: Ticks) -> f64 {
        ticks_to_seconds(self.real_time().saturating_sub(ticks))
    }

    // ===== Settings =====

    pub fn config(&self) -> ConcentratorConfig {
        self.shared.settings.read().config.clone()
    }

    pub fn frames_per_second(&self) -> u32 {
        self.shared.settings.read().config.frames_per_second
    }

    /// # Errors
    /// Rejects zero.
    pub fn set_frames_per_second(&self, frames_per_second: u32) -> Result<(), ConcentratorError> {
        self.update_settings(|config| config.frames_per_second = frames_per_second)?;
        self.shared.queue.set_frames_per_second(frames_per_second);
        self.respawn_if_running();
        Ok(())
    }

    pub fn lag_time(&self) -> f64 {
        self.shared.settings.read().config.lag_time
    }

    /// # Errors
    /// Rejects values that are not positive and finite.
    pub fn set_lag_time(&self, seconds: f64) -> Result<(), ConcentratorError> {
        self.update_settings(|config| config.lag_time = seconds)
    }

    pub fn lead_time(&self) -> f64 {
        self.shared.settings.read().config.lead_time
    }

    /// # Errors
    /// Rejects values that are not positive and finite.
    pub fn set_lead_time(&self, seconds: f64) -> Result<(), ConcentratorError> {
        self.update_settings(|config| config.lead_time = seconds)
    }

    /// Clamped to `[0, TICKS_PER_SECOND]`; applies to frames created afterwards.
    pub fn set_time_resolution(&self, ticks: Ticks) {
        let clamped = ticks.clamp(0, TICKS_PER_SECOND);
        self.shared.settings.write().config.time_resolution = clamped;
        self.shared.queue.set_time_resolution(clamped);
    }

    pub fn set_expected_measurements(&self, expected: u32) {
        let mut settings = self.shared.settings.write();
        settings.config.expected_measurements = expected;
    }

    /// Change the downsampling policy for frames created afterwards.
    pub fn set_downsampling_method(&self, method: DownsamplingMethod) {
        self.shared.settings.write().config.downsampling_method = method;
        let filter = self.shared.filter.read().clone();
        self.shared.queue.set_downsampling(method, filter);
    }

    /// Filter used by [`DownsamplingMethod::Filtered`].
    pub fn set_measurement_filter(&self, filter: Option<MeasurementFilter>) {
        *self.shared.filter.write() = filter.clone();
        let method = self.shared.settings.read().config.downsampling_method;
        self.shared.queue.set_downsampling(method, filter);
    }

    /// Wait on `handle` before every publication pass.
    pub fn add_external_event(&self, handle: Arc<Notify>) {
        self.shared.external_events.write().push(handle);
    }

    pub fn clear_external_events(&self) {
        self.shared.external_events.write().clear();
    }

    fn update_settings<F>(&self, apply: F) -> Result<(), ConcentratorError>
    where
        F: FnOnce(&mut ConcentratorConfig),
    {
        let mut settings = self.shared.settings.write();
        let mut config = settings.config.clone();
        apply(&mut config);
        validate_config(&config)?;
        *settings = RuntimeSettings::resolve(config);
        Ok(())
    }

    // ===== Statistics & diagnostics =====

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.shared.statistics.snapshot()
    }

    /// Zero all counters.
    pub fn reset_statistics(&self) {
        self.shared.statistics.reset();
        debug!("concentrator statistics reset");
    }

    /// Receive engine notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConcentratorEvent> {
        self.shared.events.subscribe()
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.shared.queue
    }

    pub fn latest_measurement(&self, key: &MeasurementKey) -> Option<Measurement> {
        self.shared.latest.get(key).map(|entry| entry.value().clone())
    }

    /// Latest value per key; empty unless `track_latest_measurements` is on.
    pub fn latest_measurements(&self) -> Vec<Measurement> {
        self.shared
            .latest
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn last_discarded_measurement(&self) -> Option<Measurement> {
        self.shared
            .last_discarded
            .lock()
            .as_ref()
            .map(|(measurement, _)| measurement.clone())
    }

    /// Real time minus the last discarded measurement's timestamp, in seconds.
    pub fn last_discarded_measurement_latency(&self) -> Option<f64> {
        self.shared
            .last_discarded
            .lock()
            .as_ref()
            .map(|(_, latency)| ticks_to_seconds(*latency))
    }

    pub fn start_time(&self) -> Option<Ticks> {
        match self.shared.start_time.load(Ordering::Acquire) {
            0 => None,
            ticks => Some(ticks),
        }
    }

    pub fn stop_time(&self) -> Option<Ticks> {
        match self.shared.stop_time.load(Ordering::Acquire) {
            0 => None,
            ticks => Some(ticks),
        }
    }

    /// Seconds between start and stop, or start and now while running.
    pub fn run_time(&self) -> f64 {
        let Some(start) = self.start_time() else {
            return 0.0;
        };
        let end = match self.stop_time() {
            Some(stop) if stop >= start => stop,
            _ => self.shared.clock.now(),
        };
        ticks_to_seconds(end - start)
    }

    /// Structured status, see [`status`](Self::status) for the text form.
    pub fn status_report(&self) -> StatusReport {
        let settings = self.shared.settings.read().clone();
        let last_discarded = self
            .shared
            .last_discarded
            .lock()
            .as_ref()
            .map(|(measurement, latency)| (measurement.clone(), ticks_to_seconds(*latency)));
        let timer_missed_ticks = self
            .tasks
            .lock()
            .as_ref()
            .and_then(|tasks| tasks.timer.as_ref().map(|timer| timer.missed_ticks()));

        StatusReport {
            enabled: self.enabled(),
            running: self.is_running(),
            disposed: self.is_disposed(),
            run_time: self.run_time(),
            real_time: self.shared.real_time_with(&settings),
            local_clock: self.shared.clock.now(),
            process_by_received_timestamp: settings.process_by_received,
            use_local_clock_as_real_time: settings.use_local_clock,
            allow_sorts_by_arrival: settings.allow_sorts_by_arrival,
            publication_timeout_ms: settings.publication_timeout.map(|d| d.as_millis() as u64),
            external_event_timeout_ms: settings
                .external_event_timeout
                .map(|d| d.as_millis() as u64),
            external_events: self.shared.external_events.read().len(),
            config: settings.config,
            statistics: self.statistics(),
            queue_depth: self.shared.queue.count(),
            last_published_frame: self.shared.queue.last_popped_timestamp(),
            last_discarded,
            timer_missed_ticks,
        }
    }

    /// Multi-line human readable status.
    pub fn status(&self) -> String {
        self.status_report().to_string()
    }
}

impl Drop for Concentrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Shared {
    fn real_time_with(&self, settings: &RuntimeSettings) -> Ticks {
        let now = self.clock.now();
        if settings.use_local_clock {
            return now;
        }

        let current = self.real_time.load(Ordering::Acquire);
        if settings.config.perform_timestamp_reasonability_check
            && now.abs_diff(current) > settings.lead_ticks.unsigned_abs()
        {
            self.real_time.store(now, Ordering::Release);
            return now;
        }
        current
    }

    /// Move real time forward from an accepted measurement timestamp.
    fn advance_real_time(&self, settings: &RuntimeSettings, timestamp: Ticks) {
        let current = self.real_time.load(Ordering::Acquire);
        if timestamp <= current {
            return;
        }

        if !settings.config.perform_timestamp_reasonability_check {
            self.real_time.fetch_max(timestamp, Ordering::AcqRel);
            return;
        }

        let now = self.clock.now();
        let lead = settings.lead_ticks.unsigned_abs();
        if timestamp.abs_diff(now) <= lead {
            self.real_time.fetch_max(timestamp, Ordering::AcqRel);
        } else if now.abs_diff(current) > lead {
            self.real_time.store(now, Ordering::Release);
        }
    }

    fn sort_one(&self, settings: &RuntimeSettings, measurement: Measurement) -> SortOutcome {
        if !self.enabled.load(Ordering::Acquire) {
            return SortOutcome::Ignored;
        }

        self.statistics.add_received(1);
        metrics::counter!("concentrator_measurements_received_total").increment(1);

        let config = &settings.config;
        let real_time = self.real_time_with(settings);
        let mut timestamp = measurement.timestamp;

        let rejection = if config.ignore_bad_timestamps {
            None
        } else if !measurement.timestamp_is_good() {
            Some(DiscardReason::BadTimestamp)
        } else if settings.process_by_received {
            None
        } else {
            let late = real_time.saturating_sub(timestamp) > settings.lag_ticks;
            let early = config.perform_timestamp_reasonability_check
                && timestamp.saturating_sub(real_time) > settings.lead_ticks;
            (late || early).then_some(DiscardReason::OutsideTolerance)
        };

        let by_arrival = match rejection {
            None => false,
            Some(_) if settings.allow_sorts_by_arrival => {
                timestamp = real_time;
                self.statistics.add_sorted_by_arrival(1);
                true
            }
            Some(reason) => return self.discard(measurement, reason, real_time),
        };

        let frame = match self.queue.get_frame(timestamp, self.clock.now()) {
            Ok(frame) => frame,
            Err(NoFrame::Closed) => {
                self.statistics.add_missed_sorts_by_timeout(1);
                return self.discard(measurement, DiscardReason::FramePublished, real_time);
            }
            Err(NoFrame::OutOfRange) => {
                return self.discard(measurement, DiscardReason::OutsideTolerance, real_time);
            }
        };

        match frame.sort(&measurement) {
            MergeOutcome::Inserted | MergeOutcome::Downsampled => {}
            MergeOutcome::Published => {
                self.statistics.add_missed_sorts_by_timeout(1);
                return self.discard(measurement, DiscardReason::FramePublished, real_time);
            }
            MergeOutcome::Rejected => {
                return self.discard(measurement, DiscardReason::FilterRejected, real_time);
            }
        }

        self.statistics.add_processed(1);
        let mode = if by_arrival { "arrival" } else { "timestamp" };
        metrics::counter!("concentrator_measurements_sorted_total", "mode" => mode).increment(1);
        trace!(
            key = %measurement.key,
            timestamp = measurement.timestamp,
            frame = frame.timestamp(),
            mode,
            "measurement sorted"
        );

        if config.track_latest_measurements {
            self.latest.insert(measurement.key.clone(), measurement);
        }
        if !settings.use_local_clock {
            self.advance_real_time(settings, timestamp);
        }

        if by_arrival {
            SortOutcome::SortedByArrival
        } else {
            SortOutcome::Sorted
        }
    }

    fn discard(
        &self,
        measurement: Measurement,
        reason: DiscardReason,
        real_time: Ticks,
    ) -> SortOutcome {
        let latency = real_time.saturating_sub(measurement.timestamp);
        trace!(key = %measurement.key, timestamp = measurement.timestamp, %reason, "measurement discarded");

        *self.last_discarded.lock() = Some((measurement, latency));
        self.statistics.add_discarded(1);
        metrics::counter!("concentrator_measurements_discarded_total", "reason" => reason.as_str())
            .increment(1);

        SortOutcome::Discarded(reason)
    }

    fn report_discards(&self, count: usize) {
        let last = self
            .last_discarded
            .lock()
            .as_ref()
            .map(|(measurement, _)| measurement.clone());
        warn!(
            count,
            last = last.as_ref().map(|m| m.key.to_string()),
            "discarding measurements"
        );
        self.emit(ConcentratorEvent::DiscardingMeasurements { count, last });
    }

    fn emit(&self, event: ConcentratorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    #[instrument(name = "concentrator_publish", level = "trace", skip(self), fields(depth = self.queue.count()))]
    fn publish_ready_frames(&self) -> usize {
        // Another pass is draining the queue; it covers this one
        let Some(_pass) = self.publishing.try_lock() else {
            trace!("publication pass already running");
            return 0;
        };

        let settings = self.settings.read().clone();
        let config = &settings.config;
        let mut published = 0;

        while self.enabled.load(Ordering::Acquire) {
            let Some(frame) = self.queue.head() else {
                break;
            };

            let real_time = self.real_time_with(&settings);
            let timestamp = frame.timestamp();
            let mut ahead_of_schedule = false;

            if settings.process_by_received {
                if real_time.saturating_sub(frame.created_timestamp()) < settings.lag_ticks {
                    break;
                }
            } else if real_time.saturating_sub(timestamp) < settings.lag_ticks {
                let expected = u64::from(config.expected_measurements);
                if expected == 0
                    || !config.allow_preemptive_publishing
                    || frame.sorted_measurements() < expected
                {
                    break;
                }
                ahead_of_schedule = true;
            }

            if !self.queue.seal_head(&frame) {
                // An earlier bucket appeared; evaluate it first
                continue;
            }

            if ahead_of_schedule {
                self.statistics.add_frames_ahead_of_schedule(1);
                metrics::counter!("concentrator_frames_ahead_of_schedule_total").increment(1);
            }

            let Some(snapshot) =
                frame.mark_published(config.track_published_timestamp, self.clock.now())
            else {
                warn!(timestamp, "head frame already published, removing it");
                self.queue.pop_if_head(&frame);
                continue;
            };

            let started = Instant::now();
            let index = self.queue.frame_index(timestamp);

            let result = catch_unwind(AssertUnwindSafe(|| {
                self.publisher.publish_frame(&snapshot, index)
            }));

            // A concurrent stop may have cleared the queue
            self.queue.pop_if_head(&frame);
            let elapsed = started.elapsed();
            self.statistics.add_published_frames(1);
            self.statistics
                .add_published_measurements(snapshot.sorted_measurements());
            self.statistics
                .add_downsampled(snapshot.downsampled_measurements());
            self.statistics
                .add_publication_time((elapsed.as_nanos() / 100) as Ticks);

            metrics::counter!("concentrator_frames_published_total").increment(1);
            metrics::histogram!("concentrator_publish_duration_ms")
                .record(elapsed.as_secs_f64() * 1000.0);
            published += 1;

            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    warn!(timestamp, error = %e, "frame publication failed");
                    Some(format!("{e:#}"))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(timestamp, panic = %message, "frame publisher panicked");
                    Some(format!("publisher panicked: {message}"))
                }
            };

            if let Some(message) = failure {
                self.emit(ConcentratorEvent::ProcessException { message });
                break;
            }
        }

        metrics::gauge!("concentrator_queue_depth").set(self.queue.count() as f64);
        published
    }

    fn record_expiration(&self) {
        self.statistics.add_wait_handle_expirations(1);
        metrics::counter!("concentrator_wait_handle_expirations_total").increment(1);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Wait for `future`, bounded by `limit` when set. Returns false on timeout.
async fn wait_bounded<F: Future>(limit: Option<Duration>, future: F) -> bool {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await.is_ok(),
        None => {
            future.await;
            true
        }
    }
}

fn stop_requested(changed: Result<(), watch::error::RecvError>, shutdown: &watch::Receiver<bool>) -> bool {
    changed.is_err() || *shutdown.borrow()
}

#[instrument(name = "concentrator_scheduler", skip_all)]
async fn run_scheduler(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    debug!("scheduler started");

    loop {
        let (cadence, publication_timeout, external_timeout) = {
            let settings = shared.settings.read();
            (
                settings.cadence,
                settings.publication_timeout,
                settings.external_event_timeout,
            )
        };

        let signal = Arc::clone(&shared.publication_signal);
        tokio::select! {
            signalled = wait_bounded(publication_timeout, signal.notified()) => {
                if !signalled && cadence != Cadence::OnSort {
                    shared.record_expiration();
                }
            }
            changed = shutdown.changed() => {
                if stop_requested(changed, &shutdown) {
                    break;
                }
            }
        }

        let handles = shared.external_events.read().clone();
        for handle in handles {
            tokio::select! {
                signalled = wait_bounded(external_timeout, handle.notified()) => {
                    if !signalled {
                        shared.record_expiration();
                    }
                }
                changed = shutdown.changed() => {
                    if stop_requested(changed, &shutdown) {
                        debug!("scheduler stopped");
                        return;
                    }
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }
        shared.publish_ready_frames();
    }

    debug!("scheduler stopped");
}

#[instrument(name = "concentrator_monitor", skip_all)]
async fn run_monitor(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut interval =
        tokio::time::interval_at(tokio::time::Instant::now() + MONITOR_INTERVAL, MONITOR_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let frames_per_second = shared.queue.frames_per_second() as usize;
                let seconds = (shared.queue.count() / frames_per_second.max(1)).saturating_sub(1) as u64;
                if seconds > 0 {
                    warn!(seconds, "unpublished samples queued");
                    shared.emit(ConcentratorEvent::UnpublishedSamples { seconds });
                }
            }
            changed = shutdown.changed() => {
                if stop_requested(changed, &shutdown) {
                    break;
                }
            }
        }
    }
}
