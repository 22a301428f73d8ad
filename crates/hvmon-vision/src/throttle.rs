/// Minimum spacing between detection attempts.
///
/// Frames arriving sooner than `interval_ms` after the last passed one are
/// dropped before any conversion work happens.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval_ms: u64,
    last_attempt_ms: Option<u64>,
    passed: u64,
    skipped: u64,
}

impl FrameThrottle {
    pub fn new(interval_ms: u64) -> Self {
        Self { interval_ms, last_attempt_ms: None, passed: 0, skipped: 0 }
    }

    /// Records an attempt and returns true when the frame should proceed.
    pub fn tick_should_process(&mut self, now_ms: u64) -> bool {
        if let Some(last) = self.last_attempt_ms {
            if now_ms.saturating_sub(last) < self.interval_ms {
                self.skipped += 1;
                return false;
            }
        }
        self.last_attempt_ms = Some(now_ms);
        self.passed += 1;
        true
    }

    /// Next frame passes unconditionally.
    pub fn reset(&mut self) {
        self.last_attempt_ms = None;
    }

    pub fn set_interval(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// (passed, skipped)
    pub fn counters(&self) -> (u64, u64) {
        (self.passed, self.skipped)
    }
}
