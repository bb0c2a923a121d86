//! # Concentrator
//!
//! Time-aligns measurements from many sources into frames at a fixed rate
//! and publishes each frame once, in timestamp order, after a lag window.
//!
//! ## Data Flow
//! ```text
//! producers ──sort_measurements──► FrameQueue ──(lag elapsed)──► FramePublisher
//!                                      ▲
//!                       FrameRateTimer ┘ (wakes the scheduler)
//! ```
//!
//! ## Usage
//! ```ignore
//! let concentrator = Concentrator::new(config, |frame: &Frame, index: usize| {
//!     println!("frame {index}: {} measurements", frame.len());
//!     Ok(())
//! })?;
//! concentrator.start()?;
//! concentrator.sort_measurements(batch);
//! ```

mod clock;
mod concentrator;
pub mod downsampling;
mod error;
mod events;
mod frame;
mod frame_queue;
mod frame_rate_timer;
mod publisher;
mod statistics;
mod status;
mod tracking_frame;

pub use clock::{Clock, ManualClock, SystemClock};
pub use concentrator::Concentrator;
pub use downsampling::MeasurementFilter;
pub use error::ConcentratorError;
pub use events::{ConcentratorEvent, DiscardReason, SortOutcome};
pub use frame::Frame;
pub use frame_queue::{FrameQueue, NoFrame, QueueSettings};
pub use frame_rate_timer::{frame_periods, FrameRateTimer};
pub use publisher::FramePublisher;
pub use statistics::{ConcentratorStatistics, StatisticsSnapshot};
pub use status::StatusReport;
pub use tracking_frame::{MergeOutcome, TrackingFrame};
