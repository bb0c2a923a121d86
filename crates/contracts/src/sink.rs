//! DataSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for sinks receiving published frames.

use crate::{ContractError, PublishedFrame};

/// Data output trait
///
/// All sink implementations must implement this trait.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write a published frame
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, frame: &PublishedFrame) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
