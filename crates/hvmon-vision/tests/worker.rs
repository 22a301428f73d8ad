use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use hvmon_proto::{ErrorKind, MonitorEvent, Rotation};
use hvmon_vision::stub::{ScriptedFactory, ScriptedHit};
use hvmon_vision::{Delegate, DetectionWorker, DetectorConfig, Frame, Submit, SubmitCounters};
use image::RgbaImage;

#[derive(Clone, Default)]
struct Releases(Arc<AtomicUsize>);

impl Releases {
    fn frame(&self) -> Frame {
        let c = self.0.clone();
        Frame::from_rgba(RgbaImage::new(32, 24), Rotation::Deg0).on_release(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn next(rx: &Receiver<MonitorEvent>) -> MonitorEvent {
    rx.recv_timeout(Duration::from_secs(3)).expect("event")
}

fn no_interval() -> DetectorConfig {
    DetectorConfig { detection_interval_ms: 0, max_results: 5, ..Default::default() }
}

fn start(factory: &ScriptedFactory, cfg: DetectorConfig) -> (DetectionWorker, Receiver<MonitorEvent>) {
    let (tx, rx) = unbounded();
    (DetectionWorker::start(Box::new(factory.clone()), cfg, Arc::new(tx)).unwrap(), rx)
}

#[test]
fn busy_worker_drops_extra_frames() {
    let factory = ScriptedFactory::new(vec![ScriptedHit::full("person", 0.9)]);
    factory.set_delay(Duration::from_millis(150));
    let (worker, rx) = start(&factory, no_interval());
    let releases = Releases::default();

    assert_eq!(worker.submit(releases.frame(), 0), Submit::Queued);
    wait_until("first detect", || factory.detect_calls() == 1);
    assert_eq!(worker.submit(releases.frame(), 1), Submit::Queued);
    assert_eq!(worker.submit(releases.frame(), 2), Submit::Busy);
    assert_eq!(worker.submit(releases.frame(), 3), Submit::Busy);
    assert_eq!(worker.counters(), SubmitCounters { queued: 2, throttled: 0, busy: 2 });

    next(&rx);
    next(&rx);
    assert!(worker.stop(Duration::from_secs(1)));
    assert_eq!(factory.detect_calls(), 2);
    assert_eq!(releases.count(), 4);
}

#[test]
fn every_frame_released_once_across_shutdown() {
    let factory = ScriptedFactory::new(vec![]);
    factory.set_delay(Duration::from_millis(50));
    let (worker, _rx) = start(&factory, no_interval());
    let releases = Releases::default();

    let mut submitted = 0;
    for t in 0..20u64 {
        worker.submit(releases.frame(), t);
        submitted += 1;
        std::thread::sleep(Duration::from_millis(3));
    }
    assert!(worker.stop(Duration::from_secs(1)));
    assert_eq!(releases.count(), submitted);
}

#[test]
fn reconfigure_rebuilds_and_resets_throttle() {
    let factory = ScriptedFactory::new(vec![ScriptedHit::full("car", 0.7)]);
    let cfg = DetectorConfig { detection_interval_ms: 1000, ..Default::default() };
    let (worker, rx) = start(&factory, cfg.clone());
    let releases = Releases::default();

    assert_eq!(worker.submit(releases.frame(), 10_000), Submit::Queued);
    next(&rx);
    assert_eq!(worker.submit(releases.frame(), 10_050), Submit::Throttled);

    worker.reconfigure(DetectorConfig { score_threshold: 0.75, ..cfg.clone() }).unwrap();
    wait_until("rebuild", || factory.created() == 2);
    assert_eq!(worker.submit(releases.frame(), 10_060), Submit::Queued);
    match next(&rx) {
        MonitorEvent::Results(b) => assert!(b.detections.is_empty(), "0.7 is below the new threshold"),
        other => panic!("unexpected {:?}", other),
    }

    let built = factory.built_configs();
    assert_eq!(built.len(), 2);
    assert_eq!(built[1].score_threshold, 0.75);
    assert!(worker.stop(Duration::from_secs(1)));
}

#[test]
fn unchanged_config_keeps_detector() {
    let factory = ScriptedFactory::new(vec![]);
    let (worker, rx) = start(&factory, no_interval());
    worker.reconfigure(no_interval()).unwrap();
    let releases = Releases::default();
    assert_eq!(worker.submit(releases.frame(), 0), Submit::Queued);
    next(&rx);
    assert_eq!(factory.created(), 1);
    assert!(worker.stop(Duration::from_secs(1)));
}

#[test]
fn invalid_reconfigure_is_rejected() {
    let factory = ScriptedFactory::new(vec![]);
    let (worker, _rx) = start(&factory, no_interval());
    assert!(worker.reconfigure(DetectorConfig { max_results: 0, ..no_interval() }).is_err());
    assert!(worker.stop(Duration::from_secs(1)));
}

#[test]
fn gpu_failure_falls_back_and_keeps_detecting() {
    let factory = ScriptedFactory::new(vec![ScriptedHit::full("person", 0.9)]).fail_gpu();
    let (worker, rx) = start(&factory, no_interval().with_delegate(Delegate::Gpu));

    match next(&rx) {
        MonitorEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::GpuInitFail),
        other => panic!("unexpected {:?}", other),
    }
    let releases = Releases::default();
    assert_eq!(worker.submit(releases.frame(), 0), Submit::Queued);
    assert!(matches!(next(&rx), MonitorEvent::Results(b) if b.detections.len() == 1));
    assert_eq!(factory.built_configs()[0].delegate, Delegate::Cpu);
    assert!(worker.stop(Duration::from_secs(1)));
}

#[test]
fn failed_build_skips_frames_until_reconfigured() {
    let factory = ScriptedFactory::new(vec![ScriptedHit::full("bus", 0.9)]).fail_all();
    let (worker, rx) = start(&factory, no_interval());
    assert!(matches!(next(&rx), MonitorEvent::Error { kind: ErrorKind::Other, .. }));

    let releases = Releases::default();
    assert_eq!(worker.submit(releases.frame(), 0), Submit::Queued);
    wait_until("release", || releases.count() == 1);
    assert_eq!(factory.detect_calls(), 0);

    factory.set_fail_all(false);
    worker.reconfigure(no_interval()).unwrap();
    assert_eq!(worker.submit(releases.frame(), 1), Submit::Queued);
    assert!(matches!(next(&rx), MonitorEvent::Results(_)));
    assert!(worker.stop(Duration::from_secs(1)));
}

#[test]
fn detect_error_is_not_fatal() {
    let factory = ScriptedFactory::new(vec![]);
    factory.set_fail_detect(true);
    let (worker, rx) = start(&factory, no_interval());
    let releases = Releases::default();

    worker.submit(releases.frame(), 0);
    assert!(matches!(next(&rx), MonitorEvent::Error { kind: ErrorKind::Other, .. }));
    factory.set_fail_detect(false);
    worker.submit(releases.frame(), 1);
    assert!(matches!(next(&rx), MonitorEvent::Results(_)));
    assert!(worker.stop(Duration::from_secs(1)));
}

#[test]
fn slow_detect_is_detached_after_grace() {
    let factory = ScriptedFactory::new(vec![]);
    factory.set_delay(Duration::from_millis(800));
    let (worker, _rx) = start(&factory, no_interval());
    let releases = Releases::default();
    worker.submit(releases.frame(), 0);
    wait_until("detect started", || factory.detect_calls() == 1);
    assert!(!worker.stop(Duration::from_millis(50)));
}

#[tokio::test]
async fn tokio_sink_receives_results() {
    let factory = ScriptedFactory::new(vec![ScriptedHit::full("truck", 0.8)]);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let worker = DetectionWorker::start(Box::new(factory), no_interval(), Arc::new(tx)).unwrap();
    let releases = Releases::default();
    worker.submit(releases.frame(), 0);

    let ev = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await.unwrap().unwrap();
    match ev {
        MonitorEvent::Results(b) => assert_eq!(b.detections[0].label, "truck"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(worker.stop(Duration::from_secs(1)));
}
