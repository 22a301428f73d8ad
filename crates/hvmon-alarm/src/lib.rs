//! Alarm debounce and status reporting on top of detection results.

pub mod mode;
pub mod status;
pub mod tracker;

pub use mode::AlarmMode;
pub use status::{Status, StatusBoard};
pub use tracker::{AlarmConfig, AlarmState, AlarmTracker};

#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    #[error("invalid alarm config: {0}")]
    InvalidConfig(String),
}
