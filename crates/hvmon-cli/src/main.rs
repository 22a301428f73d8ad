use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use hvmon_cli::config::{doctor, load_config, BackendKind, Config};
use hvmon_cli::monitor::Monitor;
use hvmon_proto::{Clock, MonitorEvent, MonotonicClock, Rect, Rotation};
use hvmon_vision::camera::FrameGrabber;
use hvmon_vision::overlay::{sensor_dims, unrotate};
use hvmon_vision::stub::ScriptedFactory;
use hvmon_vision::worker::DEFAULT_STOP_GRACE;
use hvmon_vision::{BoxMapper, DetectionWorker, DetectorFactory, Frame, Submit};

#[cfg(feature = "tflite")]
use hvmon_vision::tflite::{TfliteDetector, TfliteFactory};

#[derive(Debug, Parser)]
#[command(name = "hvmon", version, about = "hvmon - person & vehicle camera monitor")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config file.
    Doctor,
    /// Capture, detect and raise alarms until Ctrl-C.
    Run {
        /// Re-read the config file while running and apply changes.
        #[arg(long)]
        watch: bool,
        /// Stop after capturing this many frames.
        #[arg(long)]
        frames: Option<u64>,
    },
    /// Map a detector box onto the overlay canvas and print it as JSON.
    Transform {
        /// left,top,right,bottom in detector-input pixels
        #[arg(long = "box")]
        bbox: String,
        /// Detector input size, WxH
        #[arg(long)]
        input: String,
        #[arg(long, default_value_t = 0)]
        rotation: i32,
        #[arg(long)]
        display_rotation: Option<i32>,
        /// Canvas size WxH; defaults to [overlay]
        #[arg(long)]
        canvas: Option<String>,
    },
    Vision { #[command(subcommand)] cmd: VisionCmd },
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run { watch, frames } => run(&cli.config, cfg, watch, frames).await?,
        Command::Transform { bbox, input, rotation, display_rotation, canvas } => {
            transform(&cfg, &bbox, &input, rotation, display_rotation, canvas.as_deref())?
        }
        Command::Vision { cmd: VisionCmd::Inspect } => inspect(&cfg)?,
    }
    Ok(())
}

fn make_factory(cfg: &Config) -> Result<Box<dyn DetectorFactory>> {
    match cfg.backend.kind {
        BackendKind::Stub => Ok(Box::new(ScriptedFactory::new(cfg.backend.hits.clone()))),
        BackendKind::Tflite => tflite_factory(),
    }
}

#[cfg(feature = "tflite")]
fn tflite_factory() -> Result<Box<dyn DetectorFactory>> {
    Ok(Box::new(TfliteFactory))
}

#[cfg(not(feature = "tflite"))]
fn tflite_factory() -> Result<Box<dyn DetectorFactory>> {
    anyhow::bail!("backend.kind=tflite but binary not built with --features tflite")
}

#[cfg(feature = "tflite")]
fn inspect(cfg: &Config) -> Result<()> {
    let mut det = TfliteDetector::new(&cfg.detector)?;
    print!("{}", det.inspect()?);
    Ok(())
}

#[cfg(not(feature = "tflite"))]
fn inspect(_cfg: &Config) -> Result<()> {
    anyhow::bail!("vision backend not available; build with --features tflite")
}

fn modified(path: &str) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn run(config_path: &str, cfg: Config, watch: bool, frames: Option<u64>) -> Result<()> {
    info!("run: starting (backend {:?}, watch={})", cfg.backend.kind, watch);

    let clock = MonotonicClock::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<MonitorEvent>();
    let worker = DetectionWorker::start(make_factory(&cfg)?, cfg.detector.clone(), Arc::new(tx))
        .context("start detection worker")?;
    let grabber = FrameGrabber::new(cfg.camera.clone()).context("open camera")?;
    let mut monitor = Monitor::new(&cfg, clock.now_ms()).context("load overlay font")?;

    let (frame_tx, mut frame_rx) = mpsc::channel::<Result<Frame>>(1);
    let mut capture = grabber.spawn(cfg.monitor.capture_interval_ms, frame_tx.clone());
    let mut watch_tick = tokio::time::interval(Duration::from_millis(cfg.monitor.watch_interval_ms.max(100)));
    let mut last_mtime = modified(config_path);
    let mut current = cfg;

    let mut captured = 0u64;
    let mut capture_done = false;
    let mut last_snapshot: Option<u64> = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("run: ctrl-c");
                break;
            }
            Some(next) = frame_rx.recv(), if !capture_done => {
                match next {
                    Ok(frame) => {
                        captured += 1;
                        match worker.submit(frame, clock.now_ms()) {
                            Submit::Queued => {}
                            other => debug!("run: frame {} {:?}", captured, other),
                        }
                    }
                    Err(e) => {
                        warn!("run: capture failed: {:#}", e);
                        monitor.capture_failed(&format!("capture failed: {:#}", e), clock.now_ms());
                    }
                }
                if frames.is_some_and(|n| captured >= n) {
                    info!("run: captured {} frames, draining", captured);
                    capture.abort();
                    capture_done = true;
                }
            }
            Some(ev) = rx.recv() => {
                let now = clock.now_ms();
                let before = monitor.status().clone();
                let alarms = monitor.handle(ev, now);
                for alarm in &alarms {
                    println!("{}", serde_json::to_string(&MonitorEvent::Alarm(alarm.clone()))?);
                }
                if *monitor.status() != before {
                    info!("status: {}", monitor.status());
                }
                if let Some(dir) = &current.overlay.snapshot_dir {
                    let due = !alarms.is_empty()
                        || last_snapshot.map_or(true, |t| now.saturating_sub(t) >= current.overlay.snapshot_every_ms);
                    if due {
                        match monitor.write_snapshot(dir) {
                            Ok(_) => last_snapshot = Some(now),
                            Err(e) => warn!("run: snapshot failed: {:#}", e),
                        }
                    }
                }
            }
            _ = watch_tick.tick(), if watch => {
                let mtime = modified(config_path);
                if mtime != last_mtime {
                    last_mtime = mtime;
                    match reload(config_path) {
                        Ok(mut next) => {
                            if next.detector != current.detector {
                                worker.reconfigure(next.detector.clone()).context("reconfigure worker")?;
                            }
                            let capture_changed = next.camera != current.camera
                                || next.monitor.capture_interval_ms != current.monitor.capture_interval_ms;
                            if capture_changed && !capture_done {
                                match FrameGrabber::new(next.camera.clone()) {
                                    Ok(g) => {
                                        capture.abort();
                                        capture = g.spawn(next.monitor.capture_interval_ms, frame_tx.clone());
                                    }
                                    Err(e) => {
                                        warn!("run: capture change rejected: {:#}", e);
                                        next.camera = current.camera.clone();
                                        next.monitor.capture_interval_ms = current.monitor.capture_interval_ms;
                                    }
                                }
                            }
                            monitor.apply(&next, clock.now_ms());
                            info!("run: config reloaded");
                            current = next;
                        }
                        Err(e) => warn!("run: config reload rejected: {:#}", e),
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(500)), if capture_done => {
                break;
            }
        }
    }

    capture.abort();
    drop(frame_rx);
    let counters = worker.counters();
    let stopped = tokio::task::spawn_blocking(move || worker.stop(DEFAULT_STOP_GRACE))
        .await
        .context("join worker stop")?;
    while let Ok(ev) = rx.try_recv() {
        for alarm in monitor.handle(ev, clock.now_ms()) {
            println!("{}", serde_json::to_string(&MonitorEvent::Alarm(alarm))?);
        }
    }
    monitor.stopped(clock.now_ms());

    info!(
        "run: stopped (frames={} queued={} throttled={} busy={} clean={} status={})",
        captured, counters.queued, counters.throttled, counters.busy, stopped, monitor.status()
    );
    Ok(())
}

fn reload(path: &str) -> Result<Config> {
    let cfg = load_config(path)?;
    cfg.detector.validate().context("[detector]")?;
    cfg.alarm.validate().context("[alarm]")?;
    anyhow::ensure!(cfg.monitor.capture_interval_ms > 0, "monitor.capture_interval_ms must be > 0");
    Ok(cfg)
}

fn parse_list(s: &str, sep: char, n: usize) -> Result<Vec<f32>> {
    let v: Vec<f32> = s
        .split(sep)
        .map(|p| p.trim().parse::<f32>().with_context(|| format!("bad number '{}' in '{}'", p, s)))
        .collect::<Result<_>>()?;
    anyhow::ensure!(v.len() == n, "expected {} values in '{}'", n, s);
    Ok(v)
}

fn transform(
    cfg: &Config,
    bbox: &str,
    input: &str,
    rotation: i32,
    display_rotation: Option<i32>,
    canvas: Option<&str>,
) -> Result<()> {
    let b = parse_list(bbox, ',', 4)?;
    let dims = parse_list(input, 'x', 2)?;
    let (in_w, in_h) = (dims[0] as u32, dims[1] as u32);
    let rotation = Rotation::from_degrees(rotation)?;

    let mut overlay = cfg.overlay.clone();
    if let Some(d) = display_rotation {
        overlay.display_rotation = Rotation::from_degrees(d)?;
    }
    if let Some(c) = canvas {
        let c = parse_list(c, 'x', 2)?;
        overlay.canvas_w = c[0];
        overlay.canvas_h = c[1];
    }

    let rect = Rect::new(b[0], b[1], b[2], b[3]);
    let mapper = BoxMapper::new(in_w, in_h, rotation, overlay.viewport())
        .context("nothing to draw: degenerate input or canvas size")?;
    let (sensor_w, sensor_h) = sensor_dims(in_w as f32, in_h as f32, rotation);
    let content = mapper.content();

    let out = serde_json::json!({
        "sensor_size": [sensor_w, sensor_h],
        "sensor": unrotate(rect, in_w as f32, in_h as f32, rotation),
        "content": {
            "x": content.offset_x,
            "y": content.offset_y,
            "width": content.width,
            "height": content.height,
        },
        "canvas": mapper.map(rect),
        "flipped": overlay.viewport().is_flipped(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
