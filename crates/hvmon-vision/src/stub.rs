//! Scripted backend for replays and tests. Returns a fixed set of hits
//! scaled to whatever image it is given, filtered by the configured
//! threshold and result cap like a real backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use hvmon_proto::{Detection, Rect};
use image::RgbImage;
use serde::Deserialize;

use crate::detector::{Delegate, Detector, DetectorConfig, DetectorFactory};

/// A hit with its box in normalized 0..1 image coordinates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptedHit {
    pub label: String,
    pub score: f32,
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl ScriptedHit {
    pub fn new(label: &str, score: f32, left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { label: label.to_string(), score, left, top, right, bottom }
    }

    /// Hit covering the whole image.
    pub fn full(label: &str, score: f32) -> Self {
        Self::new(label, score, 0.0, 0.0, 1.0, 1.0)
    }
}

#[derive(Default)]
struct Shared {
    hits: Vec<ScriptedHit>,
    fail_detect: AtomicBool,
    detect_calls: AtomicUsize,
    delay_ms: AtomicUsize,
}

pub struct ScriptedDetector {
    shared: Arc<Shared>,
    threshold: f32,
    max_results: usize,
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        self.shared.detect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.shared.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay as u64));
        }
        anyhow::ensure!(!self.shared.fail_detect.load(Ordering::SeqCst), "scripted detect failure");

        let (w, h) = (image.width() as f32, image.height() as f32);
        let mut hits = self.shared.hits.clone();
        hits.retain(|hit| hit.score >= self.threshold);
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(self.max_results);

        Ok(hits
            .into_iter()
            .map(|hit| {
                Detection::new(
                    hit.label,
                    hit.score,
                    Rect::new(hit.left * w, hit.top * h, hit.right * w, hit.bottom * h),
                )
            })
            .collect())
    }
}

/// Factory handing out [`ScriptedDetector`]s that share one script.
#[derive(Clone)]
pub struct ScriptedFactory {
    shared: Arc<Shared>,
    fail_gpu: bool,
    fail_all: Arc<AtomicBool>,
    created: Arc<AtomicUsize>,
    configs: Arc<Mutex<Vec<DetectorConfig>>>,
}

impl ScriptedFactory {
    pub fn new(hits: Vec<ScriptedHit>) -> Self {
        let shared = Shared { hits, ..Default::default() };
        Self {
            shared: Arc::new(shared),
            fail_gpu: false,
            fail_all: Arc::new(AtomicBool::new(false)),
            created: Arc::new(AtomicUsize::new(0)),
            configs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// GPU construction always fails.
    pub fn fail_gpu(mut self) -> Self {
        self.fail_gpu = true;
        self
    }

    /// Every construction fails.
    pub fn fail_all(self) -> Self {
        self.fail_all.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_detect(&self, fail: bool) {
        self.shared.fail_detect.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.shared.delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Successful constructions so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn detect_calls(&self) -> usize {
        self.shared.detect_calls.load(Ordering::SeqCst)
    }

    /// Configs of successful constructions, oldest first.
    pub fn built_configs(&self) -> Vec<DetectorConfig> {
        self.configs.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl DetectorFactory for ScriptedFactory {
    fn create(&self, cfg: &DetectorConfig) -> Result<Box<dyn Detector>> {
        anyhow::ensure!(!self.fail_all.load(Ordering::SeqCst), "scripted construction failure");
        if self.fail_gpu && cfg.delegate == Delegate::Gpu {
            anyhow::bail!("GPU delegate not supported on this device");
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut g) = self.configs.lock() {
            g.push(cfg.clone());
        }
        Ok(Box::new(ScriptedDetector {
            shared: self.shared.clone(),
            threshold: cfg.score_threshold,
            max_results: cfg.max_results as usize,
        }))
    }
}
