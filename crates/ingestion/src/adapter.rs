//! Measurement source trait

use std::sync::Arc;

use crate::backpressure::BatchSender;
use crate::config::IngestionMetrics;

/// A producer of measurement batches.
///
/// Implementations own their own task; `start` must return immediately.
pub trait MeasurementSource: Send + Sync {
    /// Source name (key source acronym)
    fn name(&self) -> &str;

    /// Number of signals per batch
    fn signal_count(&self) -> usize;

    /// Begin producing batches into `tx`
    fn start(&self, tx: BatchSender, metrics: Arc<IngestionMetrics>);

    /// Stop producing
    fn stop(&self);

    fn is_running(&self) -> bool;
}
