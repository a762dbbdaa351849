//! Shared data types between camera workers, the camera manager and exporters
//!
//! Readings, reading events and runtime status snapshots live here so
//! that producers and consumers agree on a single representation.

pub mod messages;
pub mod readings;
pub mod state;

pub use messages::ReadingEvent;
pub use readings::{IndicatorReading, Reading};
pub use state::{CameraRuntimeStatus, ConnectionState, IndicatorStatus, MeterStatus};
