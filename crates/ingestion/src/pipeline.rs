//! Ingestion Pipeline main entry

use std::collections::HashMap;
use std::sync::Arc;

use async_channel::Receiver;
use contracts::SourceConfig;
use tracing::{debug, info, instrument};

use crate::adapter::MeasurementSource;
use crate::backpressure::{batch_channel, BatchSender, MeasurementBatch};
use crate::config::{BackpressureConfig, IngestionMetrics};
use crate::error::{IngestionError, Result};
use crate::simulated::SimulatedSource;

/// Ingestion Pipeline
///
/// Manages multiple measurement sources and merges their batches into one
/// channel.
pub struct IngestionPipeline {
    sources: HashMap<String, Box<dyn MeasurementSource>>,
    metrics: Arc<IngestionMetrics>,
    tx: BatchSender,
    rx: Option<Receiver<MeasurementBatch>>,
}

impl IngestionPipeline {
    /// Create a pipeline with a channel of `channel_capacity` batches
    pub fn new(channel_capacity: usize) -> Self {
        Self::with_config(BackpressureConfig {
            channel_capacity,
            ..Default::default()
        })
    }

    /// Create with custom backpressure configuration
    pub fn with_config(config: BackpressureConfig) -> Self {
        let (tx, rx) = batch_channel(config.channel_capacity, config.drop_policy);

        Self {
            sources: HashMap::new(),
            metrics: Arc::new(IngestionMetrics::new()),
            tx,
            rx: Some(rx),
        }
    }

    /// Build a pipeline with one simulated source per configuration entry.
    ///
    /// `late_delay` sets how old injected late samples are.
    pub fn from_sources(
        configs: &[SourceConfig],
        backpressure: BackpressureConfig,
        late_delay: std::time::Duration,
    ) -> Result<Self> {
        let mut pipeline = Self::with_config(backpressure);
        for config in configs {
            let source = SimulatedSource::new(config.clone())?.with_late_delay(late_delay);
            pipeline.register_source(Box::new(source))?;
        }
        Ok(pipeline)
    }

    /// Register a source
    #[instrument(name = "ingestion_register_source", skip(self, source), fields(source = %source.name()))]
    pub fn register_source(&mut self, source: Box<dyn MeasurementSource>) -> Result<()> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(IngestionError::DuplicateSource { source_name: name });
        }
        debug!(signals = source.signal_count(), "registered measurement source");
        self.sources.insert(name, source);
        Ok(())
    }

    /// Start all registered sources
    #[instrument(name = "ingestion_start_all", skip(self))]
    pub fn start_all(&self) {
        info!(count = self.sources.len(), "starting all measurement sources");
        for (name, source) in &self.sources {
            if !source.is_running() {
                debug!(source = %name, "starting source");
                source.start(self.tx.clone(), Arc::clone(&self.metrics));
            }
        }
    }

    /// Stop all sources
    #[instrument(name = "ingestion_stop_all", skip(self))]
    pub fn stop_all(&self) {
        info!(count = self.sources.len(), "stopping all measurement sources");
        for (name, source) in &self.sources {
            if source.is_running() {
                debug!(source = %name, "stopping source");
                source.stop();
            }
        }
    }

    /// Get the batch receiver
    ///
    /// Note: Can only be called once, subsequent calls return None
    pub fn take_receiver(&mut self) -> Option<Receiver<MeasurementBatch>> {
        self.rx.take()
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Signals across all sources
    pub fn signal_count(&self) -> usize {
        self.sources.values().map(|s| s.signal_count()).sum()
    }

    pub fn is_source_running(&self, name: &str) -> bool {
        self.sources
            .get(name)
            .map(|s| s.is_running())
            .unwrap_or(false)
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.stop_all();
    }
}
