//! # Dispatcher
//!
//! Published frame distribution.
//!
//! Responsibilities:
//! - Consume `PublishedFrame`s produced by the concentrator
//! - Fan out to every configured sink
//! - Isolate slow sinks so publication is never blocked
//! - Bridge the concentrator publish hook into the dispatcher input

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod publisher;
pub mod sinks;

pub use contracts::{DataSink, PublishedFrame};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use publisher::ChannelPublisher;
pub use sinks::{FileSink, FileSinkConfig, LogSink};
