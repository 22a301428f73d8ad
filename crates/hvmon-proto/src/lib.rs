//! Shared data model for the monitor: geometry, detections, semantic
//! categories, events and clocks.

pub mod clock;
pub mod detection;
pub mod event;
pub mod geometry;
pub mod label;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use detection::{Detection, ResultBundle};
pub use event::{AlarmEvent, ErrorKind, MonitorEvent};
pub use geometry::{Rect, Rotation};
pub use label::Category;

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("rotation must be 0, 90, 180 or 270 degrees (got {0})")]
    InvalidRotation(i32),
}
