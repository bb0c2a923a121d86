//! LogSink - one tracing line per published frame

use contracts::{format_ticks, ContractError, DataSink, PublishedFrame};
use tracing::{info, instrument};

/// Sink that logs frame summaries for debugging
pub struct LogSink {
    name: String,
    frames: u64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: 0,
        }
    }

    fn log_frame_summary(&self, frame: &PublishedFrame) {
        info!(
            sink = %self.name,
            sequence = frame.sequence,
            index = frame.index,
            timestamp = %format_ticks(frame.timestamp),
            measurements = frame.measurements.len(),
            missing = frame.missing_measurements(),
            downsampled = frame.meta.downsampled_measurements,
            latency_ms = frame.publication_latency() * 1000.0,
            "PublishedFrame received"
        );
    }
}

impl DataSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, frame),
        fields(sink = %self.name, sequence = frame.sequence)
    )]
    async fn write(&mut self, frame: &PublishedFrame) -> Result<(), ContractError> {
        self.log_frame_summary(frame);
        self.frames += 1;
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, frames = self.frames, "LogSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::tests::published;

    #[tokio::test]
    async fn test_log_sink_write() {
        let mut sink = LogSink::new("test_log");
        sink.write(&published(1, 3)).await.unwrap();
        sink.write(&published(2, 3)).await.unwrap();
        assert_eq!(sink.frames, 2);
        assert!(sink.close().await.is_ok());
    }

    #[test]
    fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
