//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace.
//! Business crates depend on this crate only, never on each other's internals.
//!
//! ## Time Model
//! - All timestamps are [`Ticks`]: 100-nanosecond intervals since the Unix epoch
//! - A frame timestamp is always aligned to a bucket boundary inside its second

mod concentrator_config;
mod error;
mod measurement;
mod measurement_key;
mod published;
mod service_config;
mod sink;
mod ticks;

pub use concentrator_config::*;
pub use error::*;
pub use measurement::*;
pub use measurement_key::MeasurementKey;
pub use published::*;
pub use service_config::*;
pub use sink::*;
pub use ticks::*;
