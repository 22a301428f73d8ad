use std::path::Path;

use anyhow::{Context, Result};
use hvmon_alarm::AlarmConfig;
use hvmon_proto::Rotation;
use hvmon_vision::camera::CameraConfig;
use hvmon_vision::stub::ScriptedHit;
use hvmon_vision::{ContentAspect, Delegate, DetectorConfig, LabelStyle, Viewport};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendCfg,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub monitor: MonitorCfg,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub overlay: OverlayCfg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Tflite,
    Stub,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendCfg {
    #[serde(default)]
    pub kind: BackendKind,
    /// Scripted hits for the stub backend.
    #[serde(default)]
    pub hits: Vec<ScriptedHit>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorCfg {
    /// Alarm tracking on (monitoring) or off (preview only).
    pub enabled: bool,
    pub capture_interval_ms: u64,
    /// How often `run --watch` checks the config file.
    pub watch_interval_ms: u64,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self { enabled: true, capture_interval_ms: 100, watch_interval_ms: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverlayCfg {
    pub canvas_w: f32,
    pub canvas_h: f32,
    pub display_rotation: Rotation,
    pub aspect: ContentAspect,
    pub label: LabelStyle,
    pub stroke: u32,
    /// TrueType font for label text; the bundled DejaVu Sans when unset.
    pub font: Option<String>,
    /// PNG snapshots of the overlay are written here when set.
    pub snapshot_dir: Option<String>,
    pub snapshot_every_ms: u64,
}

impl Default for OverlayCfg {
    fn default() -> Self {
        Self {
            canvas_w: 1280.0,
            canvas_h: 720.0,
            display_rotation: Rotation::Deg0,
            aspect: ContentAspect::Sensor,
            label: LabelStyle::default(),
            stroke: 3,
            font: None,
            snapshot_dir: None,
            snapshot_every_ms: 1000,
        }
    }
}

impl OverlayCfg {
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.canvas_w, self.canvas_h, self.display_rotation).with_aspect(self.aspect)
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&s).context("parse config toml")
}

pub fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    cfg.detector.validate().context("[detector]")?;
    cfg.alarm.validate().context("[alarm]")?;

    anyhow::ensure!(cfg.overlay.canvas_w > 0.0 && cfg.overlay.canvas_h > 0.0, "overlay canvas must be non-empty");
    if let ContentAspect::Fixed(r) = cfg.overlay.aspect {
        anyhow::ensure!(r > 0.0 && r.is_finite(), "overlay.aspect fixed ratio invalid: {}", r);
    }
    anyhow::ensure!(cfg.overlay.label.char_width > 0.0 && cfg.overlay.label.line_height > 0.0, "overlay.label metrics must be positive");
    anyhow::ensure!(cfg.monitor.capture_interval_ms > 0, "monitor.capture_interval_ms must be > 0");
    if let Some(font) = &cfg.overlay.font {
        anyhow::ensure!(Path::new(font).is_file(), "overlay.font {} not found", font);
    }

    anyhow::ensure!(
        matches!(cfg.camera.mode.as_str(), "libcamera-jpeg" | "v4l2-mjpeg" | "image-dir"),
        "unknown camera.mode: {}",
        cfg.camera.mode
    );
    Rotation::from_degrees(cfg.camera.rotation_degrees).context("camera.rotation_degrees")?;
    if cfg.camera.mode == "image-dir" {
        anyhow::ensure!(Path::new(&cfg.camera.device).is_dir(), "camera.device {} is not a directory", cfg.camera.device);
    }

    match cfg.backend.kind {
        BackendKind::Tflite => {
            #[cfg(not(feature = "tflite"))]
            anyhow::bail!("backend.kind=tflite but binary not built with --features tflite");

            #[cfg(feature = "tflite")]
            {
                anyhow::ensure!(Path::new(&cfg.detector.model).is_file(), "model {} not found", cfg.detector.model);
                if let Some(labels) = &cfg.detector.labels {
                    anyhow::ensure!(Path::new(labels).is_file(), "labels {} not found", labels);
                }
                if cfg.detector.delegate == Delegate::Gpu && !cfg!(feature = "tflite-gpu") {
                    warn!("doctor: delegate=gpu without --features tflite-gpu; will fall back to CPU");
                }
            }
        }
        BackendKind::Stub => {
            if cfg.backend.hits.is_empty() {
                warn!("doctor: stub backend has no scripted hits");
            }
            if cfg.detector.delegate == Delegate::Gpu {
                info!("doctor: stub backend ignores the delegate");
            }
        }
    }

    info!("doctor: OK");
    Ok(())
}
