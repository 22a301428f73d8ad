//! Host-side handling of worker output: alarm tracking, the status line
//! and overlay snapshots.

use std::path::{Path, PathBuf};

use ab_glyph::FontArc;
use anyhow::{Context, Result};
use hvmon_alarm::{AlarmTracker, Status, StatusBoard};
use hvmon_proto::{AlarmEvent, MonitorEvent, ResultBundle};
use hvmon_vision::render::{embedded_font, load_font, OverlayPainter};
use hvmon_vision::{OverlayItem, OverlayRenderer, Viewport};
use image::{Rgb, RgbImage};
use tracing::{debug, info, warn};

use crate::config::Config;

pub struct Monitor {
    tracker: AlarmTracker,
    board: StatusBoard,
    renderer: OverlayRenderer,
    viewport: Viewport,
    painter: OverlayPainter,
    font: FontArc,
    font_path: Option<String>,
    last_bundle: Option<ResultBundle>,
}

impl Monitor {
    pub fn new(cfg: &Config, now_ms: u64) -> Result<Self> {
        let mut tracker = AlarmTracker::new(cfg.alarm.clone());
        tracker.set_monitoring(cfg.monitor.enabled);
        let mut board = StatusBoard::default();
        board.set(if cfg.monitor.enabled { Status::Monitoring } else { Status::Previewing }, now_ms);
        let font = open_font(cfg.overlay.font.as_deref())?;
        Ok(Self {
            tracker,
            board,
            renderer: OverlayRenderer::new(cfg.overlay.label),
            viewport: cfg.overlay.viewport(),
            painter: OverlayPainter::new(font.clone(), cfg.overlay.label, cfg.overlay.stroke),
            font,
            font_path: cfg.overlay.font.clone(),
            last_bundle: None,
        })
    }

    /// Apply a reloaded config. Alarm settings take effect immediately; a
    /// monitoring toggle starts tracking from scratch.
    pub fn apply(&mut self, cfg: &Config, now_ms: u64) {
        self.tracker.set_config(cfg.alarm.clone());
        if cfg.monitor.enabled != self.tracker.is_monitoring() {
            self.tracker.set_monitoring(cfg.monitor.enabled);
            self.board.set(if cfg.monitor.enabled { Status::Monitoring } else { Status::Previewing }, now_ms);
        }
        let viewport = cfg.overlay.viewport();
        if viewport.display_rotation != self.viewport.display_rotation {
            self.board.set(Status::AdjustingOrientation, now_ms);
        }
        self.viewport = viewport;
        self.renderer = OverlayRenderer::new(cfg.overlay.label);
        if cfg.overlay.font != self.font_path {
            match open_font(cfg.overlay.font.as_deref()) {
                Ok(font) => {
                    self.font = font;
                    self.font_path = cfg.overlay.font.clone();
                }
                Err(e) => warn!("monitor: keeping previous font: {:#}", e),
            }
        }
        self.painter = OverlayPainter::new(self.font.clone(), cfg.overlay.label, cfg.overlay.stroke);
    }

    /// Feed one worker event; returns the alarms it raised.
    pub fn handle(&mut self, event: MonitorEvent, now_ms: u64) -> Vec<AlarmEvent> {
        match event {
            MonitorEvent::Results(bundle) => {
                let alarms = self.tracker.update(&bundle.detections, now_ms);
                let changed = if bundle.is_empty() {
                    self.board.on_no_result(self.tracker.is_monitoring(), now_ms)
                } else {
                    self.board.on_results(self.tracker.is_monitoring(), &alarms, now_ms)
                };
                if changed {
                    debug!("monitor: status {}", self.board.status());
                }
                debug!("monitor: {} detection(s), {}ms", bundle.detections.len(), bundle.inference_time_ms);
                self.last_bundle = Some(bundle);
                alarms
            }
            MonitorEvent::Alarm(alarm) => vec![alarm],
            MonitorEvent::Error { kind, message } => {
                warn!("monitor: error {} ({}): {}", kind.code(), kind_name(kind), message);
                self.board.on_error(message, now_ms);
                Vec::new()
            }
        }
    }

    /// Frame source trouble surfaces on the status line only.
    pub fn capture_failed(&mut self, message: &str, now_ms: u64) {
        self.board.on_error(message, now_ms);
    }

    /// The run loop has shut down.
    pub fn stopped(&mut self, now_ms: u64) {
        self.board.set(Status::Stopped, now_ms);
    }

    pub fn status(&self) -> &Status {
        self.board.status()
    }

    pub fn tracker(&self) -> &AlarmTracker {
        &self.tracker
    }

    /// Overlay items of the latest pass.
    pub fn layout(&self) -> Vec<OverlayItem> {
        match &self.last_bundle {
            Some(bundle) => self.renderer.layout(bundle, self.viewport),
            None => Vec::new(),
        }
    }

    /// The latest overlay drawn on a blank canvas.
    pub fn snapshot(&self) -> RgbImage {
        let w = self.viewport.canvas_w.round().max(1.0) as u32;
        let h = self.viewport.canvas_h.round().max(1.0) as u32;
        let mut canvas = RgbImage::from_pixel(w, h, Rgb([16, 16, 16]));
        self.painter.draw(&mut canvas, &self.layout());
        canvas
    }

    pub fn write_snapshot(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let ts = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let path = dir.join(format!("overlay-{}.png", ts));
        self.snapshot().save(&path).with_context(|| format!("write {}", path.display()))?;
        info!("monitor: snapshot {}", path.display());
        Ok(path)
    }
}

fn open_font(path: Option<&str>) -> Result<FontArc> {
    match path {
        Some(path) => load_font(path),
        None => embedded_font(),
    }
}

fn kind_name(kind: hvmon_proto::ErrorKind) -> &'static str {
    match kind {
        hvmon_proto::ErrorKind::Other => "other",
        hvmon_proto::ErrorKind::GpuInitFail => "gpu init",
    }
}
