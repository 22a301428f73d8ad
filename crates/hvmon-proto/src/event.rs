use serde::{Deserialize, Serialize};

use crate::{Category, ResultBundle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Other,
    GpuInitFail,
}

impl ErrorKind {
    /// Numeric code shown next to error messages.
    pub fn code(self) -> u8 {
        match self {
            ErrorKind::Other => 0,
            ErrorKind::GpuInitFail => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub ts_unix_ms: i64,
    pub category: Category,
    pub duration_ms: u64,
    pub message: String,
}

impl AlarmEvent {
    pub fn new(category: Category, duration_ms: u64) -> Self {
        let message = format!("ALARM! {} detected for {}s!", category, duration_ms / 1000);
        Self {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            category,
            duration_ms,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Results(ResultBundle),
    Alarm(AlarmEvent),
    Error { kind: ErrorKind, message: String },
}

impl MonitorEvent {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        MonitorEvent::Error { kind, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alarm_message_uses_whole_seconds() {
        let ev = AlarmEvent::new(Category::Vehicle, 3499);
        assert_eq!(ev.message, "ALARM! vehicle detected for 3s!");
        assert!(ev.ts_unix_ms > 0);
    }

    #[test]
    fn events_are_tagged_in_json() {
        let ev = MonitorEvent::error(ErrorKind::GpuInitFail, "no gpu");
        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["kind"], "GpuInitFail");
        assert_eq!(ErrorKind::GpuInitFail.code(), 1);
    }
}
