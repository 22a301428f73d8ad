use anyhow::Result;
use hvmon_proto::{Detection, ErrorKind, MonitorEvent};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::VisionError;
use crate::sink::EventSink;

pub const DEFAULT_THRESHOLD: f32 = 0.6;
pub const DEFAULT_MAX_RESULTS: u32 = 1;
pub const DEFAULT_DETECTION_INTERVAL_MS: u64 = 200;
pub const DEFAULT_MODEL: &str = "2.tflite";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

impl std::fmt::Display for Delegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delegate::Cpu => f.write_str("CPU"),
            Delegate::Gpu => f.write_str("GPU"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub score_threshold: f32,
    pub max_results: u32,
    pub delegate: Delegate,
    /// Model file path.
    pub model: String,
    /// One label per line, indexed by class id.
    pub labels: Option<String>,
    pub detection_interval_ms: u64,
    pub num_threads: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
            delegate: Delegate::Cpu,
            model: DEFAULT_MODEL.to_string(),
            labels: None,
            detection_interval_ms: DEFAULT_DETECTION_INTERVAL_MS,
            num_threads: 4,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), VisionError> {
        let bad = |m: String| Err(VisionError::InvalidConfig(m));
        if !(0.1..=0.9).contains(&self.score_threshold) {
            return bad(format!("score_threshold {} outside 0.1..=0.9", self.score_threshold));
        }
        if !(1..=10).contains(&self.max_results) {
            return bad(format!("max_results {} outside 1..=10", self.max_results));
        }
        if self.detection_interval_ms > 1000 {
            return bad(format!("detection_interval_ms {} above 1000", self.detection_interval_ms));
        }
        if self.model.trim().is_empty() {
            return bad("model path is empty".into());
        }
        if self.num_threads == 0 {
            return bad("num_threads must be >= 1".into());
        }
        Ok(())
    }

    pub fn with_delegate(&self, delegate: Delegate) -> Self {
        Self { delegate, ..self.clone() }
    }
}

/// Whether moving from `old` to `new` needs a fresh detector. Every field
/// is baked into the detector at construction time.
pub fn requires_rebuild(old: &DetectorConfig, new: &DetectorConfig) -> bool {
    old.score_threshold != new.score_threshold
        || old.max_results != new.max_results
        || old.delegate != new.delegate
        || old.model != new.model
        || old.labels != new.labels
        || old.detection_interval_ms != new.detection_interval_ms
        || old.num_threads != new.num_threads
}

/// Detection backend. Dropping it releases the underlying resources.
///
/// Score filtering and result capping are configured into the backend at
/// construction; callers do not filter again.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    /// Run on an upright image. Boxes are in the image's pixel space.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;
}

pub trait DetectorFactory: Send {
    fn create(&self, cfg: &DetectorConfig) -> Result<Box<dyn Detector>>;
}

pub struct BuiltDetector {
    pub detector: Box<dyn Detector>,
    /// Delegate actually in use (CPU after a GPU fallback).
    pub delegate: Delegate,
}

/// Construct a detector. A failed GPU construction is reported as
/// `GpuInitFail` and retried once on CPU. Returns `None` when nothing could
/// be built; the failure has then been emitted to `sink`.
pub fn build_with_fallback(
    factory: &dyn DetectorFactory,
    cfg: &DetectorConfig,
    sink: &dyn EventSink,
) -> Option<BuiltDetector> {
    info!(
        "detector: building threshold={} max_results={} delegate={} model={} interval={}ms",
        cfg.score_threshold, cfg.max_results, cfg.delegate, cfg.model, cfg.detection_interval_ms
    );

    let first = factory.create(cfg);
    let (attempt, delegate) = match (first, cfg.delegate) {
        (Ok(d), delegate) => return Some(BuiltDetector { detector: d, delegate }),
        (Err(e), Delegate::Gpu) => {
            warn!("detector: GPU delegate failed, falling back to CPU: {:#}", e);
            sink.emit(MonitorEvent::error(ErrorKind::GpuInitFail, format!("GPU delegate setup failed: {:#}", e)));
            (factory.create(&cfg.with_delegate(Delegate::Cpu)), Delegate::Cpu)
        }
        (Err(e), Delegate::Cpu) => (Err(e), Delegate::Cpu),
    };

    match attempt {
        Ok(d) => Some(BuiltDetector { detector: d, delegate }),
        Err(e) => {
            error!("detector: init failed model={} delegate={}: {:#}", cfg.model, delegate, e);
            sink.emit(MonitorEvent::error(
                ErrorKind::Other,
                format!("object detector init failed (model '{}', delegate {}): {:#}", cfg.model, delegate, e),
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{ScriptedFactory, ScriptedHit};

    fn events() -> (crossbeam_channel::Sender<MonitorEvent>, crossbeam_channel::Receiver<MonitorEvent>) {
        crossbeam_channel::unbounded()
    }

    #[test]
    fn default_config_is_valid() {
        DetectorConfig::default().validate().unwrap();
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let mut c = DetectorConfig { score_threshold: 0.95, ..Default::default() };
        assert!(c.validate().is_err());
        c.score_threshold = 0.5;
        c.max_results = 11;
        assert!(c.validate().is_err());
        c.max_results = 10;
        c.detection_interval_ms = 1001;
        assert!(c.validate().is_err());
        c.detection_interval_ms = 0;
        c.validate().unwrap();
    }

    #[test]
    fn rebuild_on_any_detector_field() {
        let base = DetectorConfig::default();
        assert!(!requires_rebuild(&base, &base.clone()));
        assert!(requires_rebuild(&base, &DetectorConfig { score_threshold: 0.5, ..base.clone() }));
        assert!(requires_rebuild(&base, &DetectorConfig { max_results: 3, ..base.clone() }));
        assert!(requires_rebuild(&base, &base.with_delegate(Delegate::Gpu)));
        assert!(requires_rebuild(&base, &DetectorConfig { model: "other.tflite".into(), ..base.clone() }));
        assert!(requires_rebuild(&base, &DetectorConfig { detection_interval_ms: 0, ..base.clone() }));
    }

    #[test]
    fn gpu_failure_falls_back_to_cpu() {
        let factory = ScriptedFactory::new(vec![ScriptedHit::full("person", 0.9)]).fail_gpu();
        let (tx, rx) = events();
        let built = build_with_fallback(&factory, &DetectorConfig::default().with_delegate(Delegate::Gpu), &tx)
            .expect("cpu fallback");
        assert_eq!(built.delegate, Delegate::Cpu);
        assert_eq!(factory.created(), 1);
        match rx.try_recv().unwrap() {
            MonitorEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::GpuInitFail),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn total_failure_reports_other_error() {
        let factory = ScriptedFactory::new(vec![]).fail_all();
        let (tx, rx) = events();
        assert!(build_with_fallback(&factory, &DetectorConfig::default(), &tx).is_none());
        match rx.try_recv().unwrap() {
            MonitorEvent::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::Other);
                assert!(message.contains("2.tflite"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn gpu_then_cpu_failure_reports_both() {
        let factory = ScriptedFactory::new(vec![]).fail_all();
        let (tx, rx) = events();
        assert!(build_with_fallback(&factory, &DetectorConfig::default().with_delegate(Delegate::Gpu), &tx).is_none());
        let kinds: Vec<ErrorKind> = rx
            .try_iter()
            .map(|e| match e {
                MonitorEvent::Error { kind, .. } => kind,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(kinds, vec![ErrorKind::GpuInitFail, ErrorKind::Other]);
    }
}
