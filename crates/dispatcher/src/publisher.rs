//! ChannelPublisher - concentrator publish hook feeding the dispatcher

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use anyhow::anyhow;
use concentrator::{Frame, FramePublisher};
use contracts::PublishedFrame;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Converts each ready [`Frame`] into a [`PublishedFrame`] and queues it
/// without blocking the scheduler.
///
/// Sequence numbers start at 1 and are assigned in publication order, so
/// gaps seen by a sink mean frames were dropped on the way.
pub struct ChannelPublisher {
    tx: mpsc::Sender<PublishedFrame>,
    sequence: AtomicU64,
    expected_measurements: AtomicU32,
    dropped: AtomicU64,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<PublishedFrame>) -> Self {
        Self {
            tx,
            sequence: AtomicU64::new(0),
            expected_measurements: AtomicU32::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Measurements a complete frame should hold, copied into frame metadata
    pub fn with_expected_measurements(self, expected: u32) -> Self {
        self.expected_measurements.store(expected, Ordering::Relaxed);
        self
    }

    pub fn set_expected_measurements(&self, expected: u32) {
        self.expected_measurements.store(expected, Ordering::Relaxed);
    }

    /// Frames handed to the channel so far (dropped ones included)
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Frames lost because the dispatcher input was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FramePublisher for ChannelPublisher {
    fn publish_frame(&self, frame: &Frame, index: usize) -> anyhow::Result<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let expected = self.expected_measurements.load(Ordering::Relaxed);
        let published = frame.to_published(index, sequence, expected);

        match self.tx.try_send(published) {
            Ok(()) => {
                trace!(sequence, index, "frame queued for dispatch");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sequence, "dispatcher input full, published frame dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(anyhow!("dispatcher input closed, frame #{sequence} lost"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Measurement, MeasurementKey, TICKS_PER_SECOND};

    const EPOCH: i64 = 1_700_000_000 * TICKS_PER_SECOND;

    fn frame_with(count: u32) -> Frame {
        let mut frame = Frame::new(EPOCH, EPOCH);
        for id in 1..=count {
            let key = MeasurementKey::generate("PMU1", id);
            frame
                .measurements_mut()
                .insert(key.clone(), Measurement::new(key, f64::from(id), EPOCH));
        }
        frame
    }

    #[test]
    fn test_sequence_and_expected_count() {
        let (tx, mut rx) = mpsc::channel(4);
        let publisher = ChannelPublisher::new(tx).with_expected_measurements(3);

        publisher.publish_frame(&frame_with(2), 0).unwrap();
        publisher.publish_frame(&frame_with(3), 1).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.missing_measurements(), 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.index, 1);
        assert_eq!(second.measurements[2].key.id(), 3);
    }

    #[test]
    fn test_full_channel_drops_without_error() {
        let (tx, _rx) = mpsc::channel(1);
        let publisher = ChannelPublisher::new(tx);

        assert!(publisher.publish_frame(&frame_with(1), 0).is_ok());
        assert!(publisher.publish_frame(&frame_with(1), 1).is_ok());
        assert_eq!(publisher.published(), 2);
        assert_eq!(publisher.dropped(), 1);
    }

    #[test]
    fn test_closed_channel_is_an_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let publisher = ChannelPublisher::new(tx);
        assert!(publisher.publish_frame(&frame_with(1), 0).is_err());
    }
}
