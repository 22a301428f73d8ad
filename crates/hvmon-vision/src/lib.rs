//! Frame intake, detection and overlay geometry for the monitor.

pub mod camera;
pub mod detector;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod prepare;
pub mod render;
pub mod sink;
pub mod ssd;
pub mod stub;
#[cfg(feature = "tflite")]
pub mod tflite;
pub mod throttle;
pub mod worker;

pub use detector::{build_with_fallback, requires_rebuild, Delegate, Detector, DetectorConfig, DetectorFactory};
pub use error::VisionError;
pub use frame::{CropRect, Frame, PixelPlane};
pub use overlay::{BoxMapper, ContentAspect, LabelStyle, OverlayItem, OverlayRenderer, Viewport};
pub use sink::EventSink;
pub use worker::{DetectionWorker, Submit, SubmitCounters};
