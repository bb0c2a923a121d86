//! # Integration Tests
//!
//! End-to-end tests across the workspace crates:
//! - configuration files and settings strings agree
//! - simulated sources -> concentrator -> dispatcher -> file sink
//! - tolerance handling visible in published output

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::DownsamplingMethod;

    const SERVICE_TOML: &str = r#"
[concentrator]
frames_per_second = 50
lag_time = 0.2
lead_time = 1.0
downsampling_method = "best_quality"
expected_measurements = 6

[[sources]]
name = "PMU1"
signal_count = 4
rate_hz = 50.0

[[sources]]
name = "PMU2"
signal_count = 2
rate_hz = 50.0

[[sinks]]
name = "log"
sink_type = "log"
"#;

    #[test]
    fn test_settings_string_matches_file_section() {
        let service = ConfigLoader::load_from_str(SERVICE_TOML, ConfigFormat::Toml).unwrap();
        let settings = ConfigLoader::parse_settings(
            "framesPerSecond=50; lagTime=0.2; leadTime=1.0; \
             downsamplingMethod=BestQuality; expectedMeasurements=6",
        )
        .unwrap();

        assert_eq!(service.concentrator, settings);
        assert_eq!(settings.downsampling_method, DownsamplingMethod::BestQuality);
        assert_eq!(service.total_signals(), settings.expected_measurements);
    }

    #[test]
    fn test_service_config_survives_json() {
        let service = ConfigLoader::load_from_str(SERVICE_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&service).unwrap();
        let reparsed = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(reparsed.concentrator, service.concentrator);
        assert_eq!(reparsed.sinks.len(), 1);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use concentrator::{Concentrator, FramePublisher, ManualClock, SystemClock};
    use contracts::{
        ConcentratorConfig, PublishedFrame, SinkConfig, SinkType, SourceConfig, Ticks,
        TICKS_PER_SECOND,
    };
    use dispatcher::{create_dispatcher, ChannelPublisher};
    use ingestion::{BackpressureConfig, IngestionPipeline, SampleGenerator, SimulatedSource};
    use observability::PublicationMetricsAggregator;
    use tokio::sync::mpsc;

    const EPOCH: Ticks = 1_700_000_000 * TICKS_PER_SECOND;
    const FPS: u32 = 50;
    const TICKS_PER_FRAME: Ticks = TICKS_PER_SECOND / FPS as Ticks;

    fn source(name: &str, signals: u32) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            signal_count: signals,
            rate_hz: f64::from(FPS),
            jitter_ms: 0.0,
            late_probability: 0.0,
            bad_time_probability: 0.0,
            clock_offset_ms: 0.0,
        }
    }

    fn generator(config: SourceConfig, seed: u64) -> SampleGenerator {
        SimulatedSource::new(config)
            .unwrap()
            .with_seed(seed)
            .with_late_delay(Duration::from_secs(5))
            .generator()
    }

    fn engine_config() -> ConcentratorConfig {
        let mut config = ConcentratorConfig::new(FPS, 0.2, 1.0);
        config.expected_measurements = 6;
        config.use_local_clock_as_real_time = true;
        config
    }

    fn file_sink(path: &std::path::Path) -> SinkConfig {
        SinkConfig {
            name: "frames".to_string(),
            sink_type: SinkType::File,
            queue_capacity: 64,
            params: HashMap::from([
                ("path".to_string(), path.display().to_string()),
                ("flush_every".to_string(), "0".to_string()),
            ]),
        }
    }

    fn read_frames(path: &std::path::Path) -> Vec<PublishedFrame> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Feed `samples` sample instants from every generator, publishing as
    /// frames become ready, then let the lag expire for the rest.
    fn drive(
        concentrator: &Concentrator,
        clock: &ManualClock,
        generators: &mut [SampleGenerator],
        samples: i64,
    ) -> usize {
        let mut published = 0;
        for k in 0..samples {
            let now = EPOCH + k * TICKS_PER_FRAME + 10;
            clock.set(now);
            for generator in generators.iter_mut() {
                concentrator.sort_measurements(generator.next_batch(now).batch.measurements);
            }
            published += concentrator.publish_ready_frames();
        }
        clock.set(EPOCH + 2 * TICKS_PER_SECOND);
        published + concentrator.publish_ready_frames()
    }

    /// Simulated samples -> Concentrator -> ChannelPublisher -> Dispatcher -> FileSink
    #[tokio::test]
    async fn test_e2e_frames_reach_file_sink_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");

        let (frame_tx, frame_rx) = mpsc::channel::<PublishedFrame>(64);
        let dispatcher = create_dispatcher(vec![file_sink(&path)], frame_rx).await.unwrap();
        let dispatcher_handle = dispatcher.spawn();

        let clock = Arc::new(ManualClock::new(EPOCH));
        let publisher = Arc::new(ChannelPublisher::new(frame_tx).with_expected_measurements(6));
        let concentrator = Concentrator::with_clock(
            engine_config(),
            Arc::clone(&publisher) as Arc<dyn FramePublisher>,
            clock.clone(),
        )
        .unwrap();
        concentrator.set_enabled(true);

        let mut generators = vec![generator(source("PMU1", 4), 1), generator(source("PMU2", 2), 2)];
        let published = drive(&concentrator, &clock, &mut generators, 25);
        assert_eq!(published, 25);

        let stats = concentrator.statistics();
        assert_eq!(stats.received_measurements, 150);
        assert_eq!(stats.discarded_measurements, 0);
        assert_eq!(stats.published_frames, 25);

        // Dropping every publisher reference closes the dispatcher input.
        drop(concentrator);
        drop(publisher);
        assert_eq!(dispatcher_handle.await.unwrap(), 25);

        let frames = read_frames(&path);
        assert_eq!(frames.len(), 25);
        for (k, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence, k as u64 + 1);
            assert_eq!(frame.index, k);
            assert_eq!(frame.timestamp, EPOCH + k as Ticks * TICKS_PER_FRAME);
            assert_eq!(frame.measurements.len(), 6);
            assert_eq!(frame.missing_measurements(), 0);
        }
        let from_pmu1 = frames[0]
            .measurements
            .iter()
            .filter(|m| m.key.source() == "PMU1")
            .count();
        assert_eq!(from_pmu1, 4);
    }

    /// Late samples are discarded when arrival sorts are off and show up as
    /// incomplete frames downstream.
    #[tokio::test]
    async fn test_e2e_late_source_leaves_frames_incomplete() {
        let (frame_tx, mut frame_rx) = mpsc::channel::<PublishedFrame>(64);

        let mut config = engine_config();
        config.allow_sorts_by_arrival = false;

        let clock = Arc::new(ManualClock::new(EPOCH));
        let publisher = Arc::new(ChannelPublisher::new(frame_tx).with_expected_measurements(6));
        let concentrator = Concentrator::with_clock(
            config,
            Arc::clone(&publisher) as Arc<dyn FramePublisher>,
            clock.clone(),
        )
        .unwrap();
        concentrator.set_enabled(true);

        let mut late = source("PMU2", 2);
        late.late_probability = 1.0;
        let mut generators = vec![generator(source("PMU1", 4), 3), generator(late, 4)];
        assert_eq!(drive(&concentrator, &clock, &mut generators, 25), 25);

        let stats = concentrator.statistics();
        assert_eq!(stats.discarded_measurements, 50);
        assert_eq!(stats.processed_measurements, 100);
        assert_eq!(concentrator.last_discarded_measurement().unwrap().key.source(), "PMU2");

        drop(concentrator);
        drop(publisher);

        let mut aggregator = PublicationMetricsAggregator::new();
        while let Some(frame) = frame_rx.recv().await {
            aggregator.update(&frame);
        }
        let summary = aggregator.summary();
        assert_eq!(summary.total_frames, 25);
        assert_eq!(summary.incomplete_frames, 25);
        assert_eq!(summary.total_missing, 50);
        assert_eq!(summary.sequence_gaps, 0);
        assert_eq!(summary.source_counts.get("PMU2"), None);
    }

    /// Live sources and scheduler on the system clock.
    #[tokio::test]
    async fn test_e2e_live_pipeline_publishes() {
        let mut ingestion = IngestionPipeline::from_sources(
            &[source("PMU1", 4), source("PMU2", 2)],
            BackpressureConfig::default(),
            Duration::from_secs(1),
        )
        .unwrap();
        let batch_rx = ingestion.take_receiver().unwrap();

        let (frame_tx, mut frame_rx) = mpsc::channel::<PublishedFrame>(256);
        let mut config = ConcentratorConfig::new(FPS, 0.2, 1.0);
        config.expected_measurements = 6;
        let concentrator = Concentrator::with_clock(
            config,
            Arc::new(ChannelPublisher::new(frame_tx).with_expected_measurements(6)),
            Arc::new(SystemClock),
        )
        .unwrap();
        concentrator.start().unwrap();
        ingestion.start_all();

        let mut frames = Vec::new();
        let collected = tokio::time::timeout(Duration::from_secs(5), async {
            while frames.len() < 10 {
                tokio::select! {
                    Ok(batch) = batch_rx.recv() => {
                        concentrator.sort_measurements(batch.measurements);
                    }
                    Some(frame) = frame_rx.recv() => frames.push(frame),
                }
            }
        })
        .await;

        ingestion.stop_all();
        concentrator.stop();
        assert!(collected.is_ok(), "only {} frames published", frames.len());

        for pair in frames.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
            assert_eq!(pair[0].sequence + 1, pair[1].sequence);
        }
        assert!(concentrator.statistics().published_frames >= 10);
    }
}
