use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use hvmon_proto::Rotation;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::frame::{CropRect, Frame};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub mode: String,   // "libcamera-jpeg" | "v4l2-mjpeg" | "image-dir"
    pub device: String, // /dev/video0 (v4l2) or a directory (image-dir)
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation that makes the sensor image upright.
    pub rotation_degrees: i32,
    /// Valid region as [left, top, width, height]; whole frame when unset.
    pub crop: Option<[u32; 4]>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: "libcamera-jpeg".into(),
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            rotation_degrees: 0,
            crop: None,
        }
    }
}

/// Pragmatic capture:
/// - libcamera-jpeg: call `libcamera-still -n -t 1 --width ... --height ... -o -`
///   returns a JPEG frame on stdout (simple, robust on Pi)
/// - v4l2-mjpeg: call `ffmpeg` to grab a single MJPEG frame
pub async fn capture_jpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    match cfg.mode.as_str() {
        "libcamera-jpeg" => capture_libcamera(cfg).await,
        "v4l2-mjpeg" => capture_v4l2_ffmpeg(cfg).await,
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
}

async fn capture_libcamera(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("libcamera-still");
    cmd.kill_on_drop(true);
    cmd.args([
        "-n",                 // no preview
        "-t", "1",            // 1ms
        "--width", &cfg.width.to_string(),
        "--height", &cfg.height.to_string(),
        "-o", "-",            // stdout
    ]);

    debug!("capture: libcamera-still");
    let out = cmd.output().await.context("run libcamera-still")?;
    anyhow::ensure!(out.status.success(), "libcamera-still failed");
    Ok(out.stdout)
}

async fn capture_v4l2_ffmpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("ffmpeg");
    cmd.kill_on_drop(true);
    cmd.args([
        "-hide_banner","-loglevel","error",
        "-f","video4linux2",
        "-input_format","mjpeg",
        "-video_size",&format!("{}x{}", cfg.width, cfg.height),
        "-i",&cfg.device,
        "-vframes","1",
        "-f","image2pipe",
        "-vcodec","mjpeg",
        "-",
    ]);

    debug!("capture: ffmpeg v4l2");
    let out = cmd.output().await.context("run ffmpeg capture")?;
    anyhow::ensure!(out.status.success(), "ffmpeg capture failed");
    Ok(out.stdout)
}

/// Produces [`Frame`]s in sensor orientation, tagged with the configured
/// rotation and crop. Besides the [`capture_jpeg`] modes it supports
/// `image-dir`, which cycles through the PNG/JPEG files of `device` in name
/// order.
pub struct FrameGrabber {
    cfg: CameraConfig,
    rotation: Rotation,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl FrameGrabber {
    pub fn new(cfg: CameraConfig) -> Result<Self> {
        let rotation = Rotation::from_degrees(cfg.rotation_degrees)?;
        let files = if cfg.mode == "image-dir" {
            let files = list_images(&cfg.device)?;
            anyhow::ensure!(!files.is_empty(), "no PNG/JPEG files in {}", cfg.device);
            files
        } else {
            Vec::new()
        };
        Ok(Self { cfg, rotation, files, cursor: 0 })
    }

    pub async fn next_frame(&mut self) -> Result<Frame> {
        let bytes = if self.cfg.mode == "image-dir" {
            let path = &self.files[self.cursor % self.files.len()];
            self.cursor = self.cursor.wrapping_add(1);
            debug!("capture: {}", path.display());
            tokio::fs::read(path).await.with_context(|| format!("read {}", path.display()))?
        } else {
            capture_jpeg(&self.cfg).await?
        };
        self.decode(&bytes)
    }

    /// Capture every `interval_ms` on a background task and send each frame,
    /// or the capture error, to `tx`. Stops when the receiver is dropped;
    /// abort the handle to stop sooner.
    pub fn spawn(mut self, interval_ms: u64, tx: mpsc::Sender<Result<Frame>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let frame = self.next_frame().await;
                if tx.send(frame).await.is_err() {
                    debug!("capture: receiver gone, stopping");
                    break;
                }
            }
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Frame> {
        let img = image::load_from_memory(bytes).context("decode frame")?.to_rgba8();
        let frame = Frame::from_rgba(img, self.rotation);
        Ok(match self.cfg.crop {
            Some([left, top, width, height]) => frame.with_crop(CropRect { left, top, width, height }),
            None => frame,
        })
    }
}

fn list_images(dir: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read dir {}", dir))? {
        let path = entry?.path();
        let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
        if matches!(ext.as_deref(), Some("png" | "jpg" | "jpeg")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn image_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(6, 4, Rgba([10, 20, 30, 255])).save(dir.path().join("a.png")).unwrap();
        RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])).save(dir.path().join("b.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();
        dir
    }

    #[tokio::test]
    async fn image_dir_cycles_in_name_order() {
        let dir = image_dir();
        let cfg = CameraConfig {
            mode: "image-dir".into(),
            device: dir.path().display().to_string(),
            rotation_degrees: 90,
            ..Default::default()
        };
        let mut grabber = FrameGrabber::new(cfg).unwrap();
        let dims: Vec<(u32, u32)> = {
            let mut v = Vec::new();
            for _ in 0..3 {
                let f = grabber.next_frame().await.unwrap();
                assert_eq!(f.rotation, Rotation::Deg90);
                v.push((f.width, f.height));
            }
            v
        };
        assert_eq!(dims, vec![(6, 4), (3, 2), (6, 4)]);
    }

    #[tokio::test]
    async fn crop_is_applied() {
        let dir = image_dir();
        let cfg = CameraConfig {
            mode: "image-dir".into(),
            device: dir.path().display().to_string(),
            crop: Some([1, 1, 4, 2]),
            ..Default::default()
        };
        let f = FrameGrabber::new(cfg).unwrap().next_frame().await.unwrap();
        assert_eq!(f.crop, CropRect { left: 1, top: 1, width: 4, height: 2 });
    }

    #[tokio::test]
    async fn spawned_capture_streams_until_receiver_drops() {
        let dir = image_dir();
        let cfg = CameraConfig { mode: "image-dir".into(), device: dir.path().display().to_string(), ..Default::default() };
        let (tx, mut rx) = mpsc::channel(1);
        let handle = FrameGrabber::new(cfg).unwrap().spawn(5, tx);

        let first = rx.recv().await.unwrap().unwrap();
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!((first.width, second.width), (6, 3));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[test]
    fn rejects_bad_rotation_and_empty_dir() {
        let cfg = CameraConfig { rotation_degrees: 45, ..Default::default() };
        assert!(FrameGrabber::new(cfg).is_err());

        let dir = tempfile::tempdir().unwrap();
        let cfg = CameraConfig { mode: "image-dir".into(), device: dir.path().display().to_string(), ..Default::default() };
        assert!(FrameGrabber::new(cfg).is_err());
    }
}
