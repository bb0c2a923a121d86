//! Batch channel with drop-policy aware sends

use std::sync::Arc;

use async_channel::{Receiver, Sender, TrySendError};
use contracts::Measurement;
use tracing::trace;

use crate::config::{DropPolicy, IngestionMetrics};
use crate::error::{IngestionError, Result};

/// One sample instant from one source
#[derive(Debug, Clone)]
pub struct MeasurementBatch {
    pub source: Arc<str>,
    pub measurements: Vec<Measurement>,
}

/// Sending half shared by every source of a pipeline.
///
/// Holds a receiver clone so `DropOldest` can evict the head of the queue.
#[derive(Debug, Clone)]
pub struct BatchSender {
    tx: Sender<MeasurementBatch>,
    evict: Arc<Receiver<MeasurementBatch>>,
    policy: DropPolicy,
}

impl BatchSender {
    pub(crate) fn new(
        tx: Sender<MeasurementBatch>,
        evict: Receiver<MeasurementBatch>,
        policy: DropPolicy,
    ) -> Self {
        Self {
            tx,
            evict: Arc::new(evict),
            policy,
        }
    }

    /// Downstream consumer still attached
    pub fn is_connected(&self) -> bool {
        // The shared eviction handle is one receiver; clones share it
        !self.tx.is_closed() && self.tx.receiver_count() > 1
    }

    /// Send without waiting, applying the drop policy when full.
    pub fn send(&self, batch: MeasurementBatch, metrics: &IngestionMetrics) -> Result<()> {
        if !self.is_connected() {
            return Err(IngestionError::ChannelClosed {
                source_name: batch.source.to_string(),
            });
        }

        let count = batch.measurements.len();
        let mut pending = batch;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => {
                    metrics.record_sent(count);
                    metrics.update_queue_len(self.tx.len());
                    return Ok(());
                }
                Err(TrySendError::Full(batch)) => {
                    metrics.record_dropped();
                    metrics::counter!("ingestion_batches_dropped_total", "source" => batch.source.to_string())
                        .increment(1);
                    match self.policy {
                        DropPolicy::DropNewest => {
                            trace!(source = %batch.source, "batch dropped (newest)");
                            return Ok(());
                        }
                        DropPolicy::DropOldest => {
                            if let Ok(evicted) = self.evict.try_recv() {
                                trace!(source = %evicted.source, "batch dropped (oldest)");
                            }
                            pending = batch;
                        }
                    }
                }
                Err(TrySendError::Closed(batch)) => {
                    return Err(IngestionError::ChannelClosed {
                        source_name: batch.source.to_string(),
                    });
                }
            }
        }
    }
}

/// Bounded batch channel
pub fn batch_channel(
    capacity: usize,
    policy: DropPolicy,
) -> (BatchSender, Receiver<MeasurementBatch>) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    (BatchSender::new(tx, rx.clone(), policy), rx)
}
