use hvmon_proto::AlarmEvent;

/// Minimum spacing between routine status refreshes.
pub const REFRESH_MS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Stopped,
    Previewing,
    Monitoring,
    NoDetections { monitoring: bool },
    Error(String),
    AdjustingOrientation,
    Alarm(String),
}

impl Status {
    /// States a routine result update may always overwrite.
    fn is_stale(&self) -> bool {
        matches!(
            self,
            Status::Stopped | Status::Error(_) | Status::AdjustingOrientation | Status::NoDetections { .. }
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Stopped => f.write_str("Stopped"),
            Status::Previewing => f.write_str("Previewing (not monitoring)"),
            Status::Monitoring => f.write_str("Monitoring..."),
            Status::NoDetections { monitoring: true } => f.write_str("No detections (monitoring)"),
            Status::NoDetections { monitoring: false } => f.write_str("No detections (previewing)"),
            Status::Error(msg) => write!(f, "Error ({})", msg),
            Status::AdjustingOrientation => f.write_str("Adjusting orientation..."),
            Status::Alarm(msg) => f.write_str(msg),
        }
    }
}

/// One-line status as shown to the operator.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    status: Status,
    last_update_ms: u64,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self { status: Status::Stopped, last_update_ms: 0 }
    }
}

impl StatusBoard {
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Unconditional change (start, stop, orientation change, ...).
    pub fn set(&mut self, status: Status, now_ms: u64) {
        self.status = status;
        self.last_update_ms = now_ms;
    }

    pub fn on_error(&mut self, message: impl Into<String>, now_ms: u64) {
        self.set(Status::Error(message.into()), now_ms);
    }

    /// A pass with detections. Alarms always win; otherwise the line is
    /// refreshed when it shows a stale state or has not changed for
    /// [`REFRESH_MS`]. Returns true when the line changed.
    pub fn on_results(&mut self, monitoring: bool, alarms: &[AlarmEvent], now_ms: u64) -> bool {
        if let Some(last) = alarms.last() {
            self.set(Status::Alarm(last.message.clone()), now_ms);
            return true;
        }
        if self.status.is_stale() || now_ms.saturating_sub(self.last_update_ms) > REFRESH_MS {
            let next = if monitoring { Status::Monitoring } else { Status::Previewing };
            let changed = next != self.status;
            self.set(next, now_ms);
            return changed;
        }
        false
    }

    /// A pass without detections. Stopped, error and orientation states
    /// are left alone.
    pub fn on_no_result(&mut self, monitoring: bool, now_ms: u64) -> bool {
        match self.status {
            Status::Stopped | Status::Error(_) | Status::AdjustingOrientation => false,
            _ => {
                let next = Status::NoDetections { monitoring };
                let changed = next != self.status;
                self.set(next, now_ms);
                changed
            }
        }
    }
}
