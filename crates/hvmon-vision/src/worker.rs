//! Single-threaded detection actor.
//!
//! The worker thread owns the detector. Callers hand frames over through a
//! one-slot channel after the throttle check; a frame that finds the slot
//! occupied is dropped on the spot. Reconfiguration and shutdown travel on
//! a separate control channel that is always drained before the next frame
//! is looked at.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use hvmon_proto::{ErrorKind, MonitorEvent, ResultBundle};
use tracing::{debug, info, warn};

use crate::detector::{build_with_fallback, requires_rebuild, BuiltDetector, DetectorConfig, DetectorFactory};
use crate::error::VisionError;
use crate::frame::Frame;
use crate::prepare::prepare_upright;
use crate::sink::EventSink;
use crate::throttle::FrameThrottle;

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(200);
const STOP_EXTRA_GRACE: Duration = Duration::from_millis(100);

/// What happened to a submitted frame. In every case but `Queued` the
/// frame has already been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    Queued,
    Throttled,
    Busy,
    Stopped,
}

/// Per-outcome submit counts. `queued` frames reached the detector slot;
/// `busy` ones passed the throttle but found the slot occupied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitCounters {
    pub queued: u64,
    pub throttled: u64,
    pub busy: u64,
}

enum Control {
    Reconfigure(DetectorConfig),
    Stop,
}

fn lock(throttle: &Mutex<FrameThrottle>) -> MutexGuard<'_, FrameThrottle> {
    throttle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct DetectionWorker {
    frames: Option<Sender<Frame>>,
    control: Sender<Control>,
    throttle: Arc<Mutex<FrameThrottle>>,
    queued: AtomicU64,
    busy: AtomicU64,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl DetectionWorker {
    /// Spawn the worker thread. The first detector is built on that thread;
    /// construction failures arrive on `sink` as error events.
    pub fn start(
        factory: Box<dyn DetectorFactory>,
        cfg: DetectorConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, VisionError> {
        cfg.validate()?;

        let (frame_tx, frame_rx) = bounded::<Frame>(1);
        let (control_tx, control_rx) = unbounded::<Control>();
        let (done_tx, done_rx) = bounded::<()>(1);
        let throttle = Arc::new(Mutex::new(FrameThrottle::new(cfg.detection_interval_ms)));

        let actor = Actor {
            factory,
            sink,
            cfg,
            current: None,
            throttle: throttle.clone(),
            frames: frame_rx,
            control: control_rx,
        };

        let handle = std::thread::Builder::new().name("hvmon-detect".into()).spawn(move || {
            actor.run();
            let _ = done_tx.send(());
        })?;

        Ok(Self {
            frames: Some(frame_tx),
            control: control_tx,
            throttle,
            queued: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            done: done_rx,
            handle: Some(handle),
        })
    }

    /// Offer a frame captured at `now_ms` (monotonic). Never blocks.
    pub fn submit(&self, frame: Frame, now_ms: u64) -> Submit {
        let Some(tx) = self.frames.as_ref() else {
            return Submit::Stopped;
        };
        if !lock(&self.throttle).tick_should_process(now_ms) {
            return Submit::Throttled;
        }
        match tx.try_send(frame) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                Submit::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.busy.fetch_add(1, Ordering::Relaxed);
                debug!("worker: busy, frame dropped");
                Submit::Busy
            }
            Err(TrySendError::Disconnected(_)) => Submit::Stopped,
        }
    }

    /// Queue a new configuration. It is applied before the next frame.
    pub fn reconfigure(&self, cfg: DetectorConfig) -> Result<(), VisionError> {
        cfg.validate()?;
        self.control.send(Control::Reconfigure(cfg)).map_err(|_| VisionError::WorkerStopped)
    }

    pub fn counters(&self) -> SubmitCounters {
        let (_, throttled) = lock(&self.throttle).counters();
        SubmitCounters {
            queued: self.queued.load(Ordering::Relaxed),
            throttled,
            busy: self.busy.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker and wait up to `grace` (plus a short extra wait) for
    /// it to exit. Returns false when the thread was left running detached.
    pub fn stop(mut self, grace: Duration) -> bool {
        self.frames.take();
        let _ = self.control.send(Control::Stop);

        let finished = match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => {
                debug!("worker: still busy after {:?}, waiting {:?} more", grace, STOP_EXTRA_GRACE);
                !matches!(self.done.recv_timeout(STOP_EXTRA_GRACE), Err(RecvTimeoutError::Timeout))
            }
        };

        match self.handle.take() {
            Some(handle) if finished => {
                if handle.join().is_err() {
                    warn!("worker: detection thread panicked");
                }
            }
            Some(_) => warn!("worker: detection thread did not stop in time; detaching"),
            None => {}
        }
        finished
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.frames.take();
            let _ = self.control.send(Control::Stop);
        }
    }
}

struct Actor {
    factory: Box<dyn DetectorFactory>,
    sink: Arc<dyn EventSink>,
    cfg: DetectorConfig,
    current: Option<BuiltDetector>,
    throttle: Arc<Mutex<FrameThrottle>>,
    frames: Receiver<Frame>,
    control: Receiver<Control>,
}

impl Actor {
    fn run(mut self) {
        self.current = build_with_fallback(self.factory.as_ref(), &self.cfg, self.sink.as_ref());
        info!("worker: started (detector ready: {})", self.current.is_some());

        let control = self.control.clone();
        let frames = self.frames.clone();

        'outer: loop {
            while let Ok(cmd) = control.try_recv() {
                if !self.handle(cmd) {
                    break 'outer;
                }
            }

            select! {
                recv(control) -> cmd => match cmd {
                    Ok(cmd) => {
                        if !self.handle(cmd) {
                            break 'outer;
                        }
                    }
                    Err(_) => break 'outer,
                },
                recv(frames) -> frame => match frame {
                    Ok(frame) => {
                        while let Ok(cmd) = control.try_recv() {
                            if !self.handle(cmd) {
                                break 'outer;
                            }
                        }
                        self.process(frame);
                    }
                    Err(_) => break 'outer,
                },
            }
        }

        self.current = None;
        info!("worker: stopped");
    }

    /// Returns false on stop.
    fn handle(&mut self, cmd: Control) -> bool {
        match cmd {
            Control::Stop => false,
            Control::Reconfigure(cfg) => {
                self.apply(cfg);
                true
            }
        }
    }

    fn apply(&mut self, cfg: DetectorConfig) {
        if self.current.is_some() && !requires_rebuild(&self.cfg, &cfg) {
            debug!("worker: config unchanged, keeping detector");
            self.cfg = cfg;
            return;
        }

        self.current = None;
        {
            let mut t = lock(&self.throttle);
            t.set_interval(cfg.detection_interval_ms);
            t.reset();
        }
        self.current = build_with_fallback(self.factory.as_ref(), &cfg, self.sink.as_ref());
        self.cfg = cfg;
    }

    fn process(&mut self, frame: Frame) {
        let Some(built) = self.current.as_mut() else {
            debug!("worker: no detector, frame released unprocessed");
            return;
        };

        let upright = match prepare_upright(&frame) {
            Ok(u) => u,
            Err(e) => {
                warn!("worker: frame preparation failed: {}", e);
                self.sink.emit(MonitorEvent::error(ErrorKind::Other, format!("frame preparation failed: {}", e)));
                return;
            }
        };
        frame.close();

        let started = Instant::now();
        match built.detector.detect(&upright.image) {
            Ok(detections) => {
                let bundle = ResultBundle {
                    detections,
                    inference_time_ms: started.elapsed().as_millis() as u64,
                    input_width: upright.width(),
                    input_height: upright.height(),
                    source_rotation: upright.rotation,
                };
                debug!(
                    "worker: {} detection(s) in {}ms via {}",
                    bundle.detections.len(),
                    bundle.inference_time_ms,
                    built.detector.name()
                );
                self.sink.emit(MonitorEvent::Results(bundle));
            }
            Err(e) => {
                warn!("worker: detect failed: {:#}", e);
                self.sink.emit(MonitorEvent::error(ErrorKind::Other, format!("detection failed: {:#}", e)));
            }
        }
    }
}
