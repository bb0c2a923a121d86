//! # Ingestion Pipeline
//!
//! Measurement ingestion module.
//!
//! Responsibilities:
//! - Register measurement sources (simulated devices)
//! - Inject delivery jitter, late samples and bad timestamps on request
//! - Backpressure management and drop policy
//! - Send batches downstream via async-channel
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{BackpressureConfig, IngestionPipeline};
//!
//! let mut pipeline = IngestionPipeline::from_sources(
//!     &config.sources,
//!     BackpressureConfig::default(),
//!     Duration::from_secs(10),
//! )?;
//! let rx = pipeline.take_receiver().unwrap();
//! pipeline.start_all();
//! while let Ok(batch) = rx.recv().await {
//!     concentrator.sort_measurements(batch.measurements);
//! }
//! ```

mod adapter;
mod backpressure;
mod config;
mod error;
mod pipeline;
mod simulated;

pub use adapter::MeasurementSource;
pub use backpressure::{batch_channel, BatchSender, MeasurementBatch};
pub use config::{BackpressureConfig, DropPolicy, IngestionMetrics, MetricsSnapshot};
pub use error::{IngestionError, Result};
pub use pipeline::IngestionPipeline;
pub use simulated::{GeneratedBatch, SampleGenerator, SimulatedSource};
