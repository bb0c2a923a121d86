//! Pipeline orchestrator - coordinates all components.
//!
//! sources -> ingestion channel -> concentrator -> ChannelPublisher -> tap
//! (metrics, frame limit) -> dispatcher -> sinks

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use concentrator::{Concentrator, ConcentratorEvent, SystemClock};
use contracts::{PublishedFrame, ServiceConfig};
use dispatcher::ChannelPublisher;
use ingestion::{BackpressureConfig, IngestionPipeline};
use observability::{record_batch_received, record_publication_metrics, PublicationMetricsAggregator};
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{EventCounters, PipelineStats};
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub service: ServiceConfig,

    /// Stop after this many published frames (None = unlimited)
    pub max_frames: Option<u64>,

    /// Stop after this long (None = until shutdown signal)
    pub duration: Option<Duration>,

    /// Channel buffer size
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Age of samples injected as late
    pub late_delay: Duration,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

/// Output side of the concentrator
struct Tap {
    handle: JoinHandle<PublicationMetricsAggregator>,
    drain: oneshot::Sender<()>,
    frames: Arc<AtomicU64>,
    limit_reached: Arc<Notify>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves, the duration elapses or the frame limit
    /// is reached.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let service = &self.config.service;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Ingestion
        info!("Setting up ingestion pipeline...");
        let mut ingestion = IngestionPipeline::from_sources(
            &service.sources,
            BackpressureConfig {
                channel_capacity: self.config.buffer_size,
                ..Default::default()
            },
            self.config.late_delay,
        )
        .map_err(|e| CliError::pipeline_startup(e.to_string()))?;
        let batch_rx = ingestion
            .take_receiver()
            .context("Failed to get ingestion receiver")?;

        info!(
            sources = ingestion.source_count(),
            signals = ingestion.signal_count(),
            "Ingestion pipeline configured"
        );

        // Dispatcher
        info!("Setting up dispatcher...");
        if service.sinks.is_empty() {
            warn!("No sinks configured - published frames will only be counted");
        }
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<PublishedFrame>(self.config.buffer_size);
        let dispatcher = dispatcher::create_dispatcher(service.sinks.clone(), dispatch_rx)
            .await
            .context("Failed to create dispatcher")?;
        let sink_metrics = dispatcher.metric_handles();
        let active_sinks = dispatcher.sink_count();
        let dispatcher_handle = dispatcher.spawn();

        // Concentrator
        let mut concentrator_config = service.concentrator.clone();
        if concentrator_config.expected_measurements == 0 {
            concentrator_config.expected_measurements = service.total_signals();
            debug!(
                expected = concentrator_config.expected_measurements,
                "expected measurements derived from sources"
            );
        }

        let (frame_tx, frame_rx) = mpsc::channel::<PublishedFrame>(self.config.buffer_size);
        let publisher = Arc::new(
            ChannelPublisher::new(frame_tx)
                .with_expected_measurements(concentrator_config.expected_measurements),
        );
        let concentrator = Concentrator::with_clock(
            concentrator_config,
            Arc::clone(&publisher) as Arc<dyn concentrator::FramePublisher>,
            Arc::new(SystemClock),
        )
        .map_err(|e| CliError::pipeline_startup(e.to_string()))?;

        let events = Arc::new(EventCounters::default());
        let event_task = spawn_event_logger(concentrator.subscribe(), Arc::clone(&events));
        let tap = spawn_tap(frame_rx, dispatch_tx, self.config.max_frames);

        concentrator
            .start()
            .map_err(|e| CliError::pipeline_startup(e.to_string()))?;

        info!("Starting measurement sources...");
        ingestion.start_all();

        info!(
            max_frames = ?self.config.max_frames,
            duration = ?self.config.duration,
            "Pipeline running"
        );

        let deadline = async {
            match self.config.duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(shutdown);
        tokio::pin!(deadline);

        let mut stats = PipelineStats {
            active_sources: ingestion.source_count(),
            active_sinks,
            ..Default::default()
        };

        loop {
            tokio::select! {
                batch = batch_rx.recv() => {
                    let Ok(batch) = batch else {
                        warn!("Ingestion channel closed");
                        break;
                    };
                    stats.batches_received += 1;
                    stats.measurements_received += batch.measurements.len() as u64;
                    record_batch_received(&batch.source, batch.measurements.len());
                    concentrator.sort_measurements(batch.measurements);
                }
                _ = tap.limit_reached.notified() => {
                    info!(frames = tap.frames.load(Ordering::Relaxed), "Reached max frames limit");
                    break;
                }
                _ = &mut deadline => {
                    info!("Run duration elapsed");
                    break;
                }
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping pipeline...");
                    break;
                }
            }
        }

        // Shutdown
        info!("Shutting down pipeline...");
        ingestion.stop_all();
        concentrator.stop();

        stats.engine = concentrator.statistics();
        stats.status = concentrator.status();
        concentrator.dispose();

        let _ = tap.drain.send(());
        let aggregator = tap.handle.await.context("Output tap task failed")?;
        stats.frames_published = tap.frames.load(Ordering::Relaxed);
        stats.frames_dropped = publisher.dropped();
        stats.publication = aggregator.summary();

        match tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await {
            Ok(Ok(frames)) => debug!(frames, "Dispatcher drained"),
            Ok(Err(e)) => error!(error = %e, "Dispatcher task failed"),
            Err(_) => warn!("Dispatcher did not drain within 5s"),
        }
        event_task.abort();

        stats.events = events.snapshot();
        stats.sinks = sink_metrics
            .iter()
            .map(|(name, metrics)| (name.clone(), metrics.snapshot()))
            .collect();
        stats.duration = start_time.elapsed();

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

/// Log concentrator notifications and count them.
fn spawn_event_logger(
    mut rx: broadcast::Receiver<ConcentratorEvent>,
    counters: Arc<EventCounters>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    counters.record(&event);
                    match &event {
                        ConcentratorEvent::ProcessException { message } => {
                            error!(error = %message, "Frame publication failed")
                        }
                        ConcentratorEvent::DiscardingMeasurements { count, last } => warn!(
                            count,
                            last = ?last.as_ref().map(|m| m.key.to_string()),
                            "Discarding measurements"
                        ),
                        ConcentratorEvent::UnpublishedSamples { seconds } => {
                            warn!(seconds, "Unpublished samples queued")
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Forward published frames to the dispatcher, recording metrics and
/// signalling when the frame limit is reached.
///
/// On `drain` the frames already queued are forwarded and the task ends,
/// closing the dispatcher input.
fn spawn_tap(
    mut rx: mpsc::Receiver<PublishedFrame>,
    dispatch_tx: mpsc::Sender<PublishedFrame>,
    max_frames: Option<u64>,
) -> Tap {
    let (drain, mut drain_rx) = oneshot::channel::<()>();
    let frames = Arc::new(AtomicU64::new(0));
    let limit_reached = Arc::new(Notify::new());

    let task_frames = Arc::clone(&frames);
    let task_limit = Arc::clone(&limit_reached);

    let handle = tokio::spawn(async move {
        let mut aggregator = PublicationMetricsAggregator::new();

        let mut forward = |frame: PublishedFrame| {
            record_publication_metrics(&frame);
            aggregator.update(&frame);
            let count = task_frames.fetch_add(1, Ordering::Relaxed) + 1;
            if max_frames == Some(count) {
                task_limit.notify_one();
            }
            if dispatch_tx.try_send(frame).is_err() {
                warn!(count, "Dispatcher input full, frame skipped");
            }
        };

        loop {
            tokio::select! {
                biased;
                frame = rx.recv() => match frame {
                    Some(frame) => forward(frame),
                    None => break,
                },
                _ = &mut drain_rx => {
                    while let Ok(frame) = rx.try_recv() {
                        forward(frame);
                    }
                    break;
                }
            }
        }

        drop(forward);
        aggregator
    });

    Tap {
        handle,
        drain,
        frames,
        limit_reached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ConcentratorConfig, SourceConfig};

    fn service(fps: u32) -> ServiceConfig {
        ServiceConfig {
            version: Default::default(),
            concentrator: ConcentratorConfig::new(fps, 0.2, 1.0),
            sources: vec![SourceConfig {
                name: "PMU1".into(),
                signal_count: 4,
                rate_hz: fps as f64,
                jitter_ms: 0.0,
                late_probability: 0.0,
                bad_time_probability: 0.0,
                clock_offset_ms: 0.0,
            }],
            sinks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_pipeline_stops_at_max_frames() {
        let pipeline = Pipeline::new(PipelineConfig {
            service: service(50),
            max_frames: Some(5),
            duration: Some(Duration::from_secs(10)),
            buffer_size: 64,
            metrics_port: None,
            late_delay: Duration::from_secs(1),
        });

        let stats = pipeline.run(std::future::pending()).await.unwrap();
        assert!(stats.frames_published >= 5);
        assert!(stats.engine.published_frames >= 5);
        assert_eq!(stats.publication.total_frames, stats.frames_published);
        assert!(stats.measurements_received > 0);
        assert!(stats.status.contains("Frames per second"));
    }

    #[tokio::test]
    async fn test_pipeline_stops_on_shutdown_signal() {
        let pipeline = Pipeline::new(PipelineConfig {
            service: service(30),
            max_frames: None,
            duration: None,
            buffer_size: 64,
            metrics_port: None,
            late_delay: Duration::from_secs(1),
        });

        let stats = pipeline
            .run(tokio::time::sleep(Duration::from_millis(300)))
            .await
            .unwrap();
        assert_eq!(stats.active_sources, 1);
        assert!(stats.duration >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_tap_drains_on_request() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (dispatch_tx, mut dispatch_rx) = mpsc::channel(8);
        let tap = spawn_tap(frame_rx, dispatch_tx, Some(2));

        for sequence in 1..=3 {
            frame_tx
                .send(PublishedFrame {
                    timestamp: 0,
                    index: 0,
                    sequence,
                    measurements: Vec::new(),
                    meta: Default::default(),
                })
                .await
                .unwrap();
        }

        tap.limit_reached.notified().await;
        tap.drain.send(()).unwrap();
        let aggregator = tap.handle.await.unwrap();

        assert_eq!(aggregator.total_frames, 3);
        let mut forwarded = 0;
        while dispatch_rx.recv().await.is_some() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 3);
    }
}
