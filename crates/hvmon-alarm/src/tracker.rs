//! Per-category debounce: a category has to stay in view for the
//! configured duration before it raises an alarm, and then stays quiet for
//! the cooldown.

use std::collections::{HashMap, HashSet};

use hvmon_proto::{AlarmEvent, Category, Detection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::mode::AlarmMode;
use crate::AlarmError;

pub const DEFAULT_DURATION_MS: u64 = 3000;
pub const DEFAULT_COOLDOWN_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    pub mode: AlarmMode,
    /// How long a category must be seen without a gap.
    pub continuous_duration_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            mode: AlarmMode::default(),
            continuous_duration_ms: DEFAULT_DURATION_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

impl AlarmConfig {
    pub fn validate(&self) -> Result<(), AlarmError> {
        if !(500..=10_000).contains(&self.continuous_duration_ms) {
            return Err(AlarmError::InvalidConfig(format!(
                "continuous_duration_ms {} outside 500..=10000",
                self.continuous_duration_ms
            )));
        }
        if self.cooldown_ms == 0 {
            return Err(AlarmError::InvalidConfig("cooldown_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Absent,
    /// Seen, not long enough yet.
    Tracking,
    /// Seen long enough; the next pass alarms.
    Armed,
    /// Alarmed within the cooldown window.
    CoolingDown,
}

#[derive(Debug)]
pub struct AlarmTracker {
    cfg: AlarmConfig,
    monitoring: bool,
    first_seen: HashMap<Category, u64>,
    last_alarm: HashMap<Category, u64>,
}

impl AlarmTracker {
    pub fn new(cfg: AlarmConfig) -> Self {
        Self { cfg, monitoring: false, first_seen: HashMap::new(), last_alarm: HashMap::new() }
    }

    pub fn config(&self) -> &AlarmConfig {
        &self.cfg
    }

    /// Takes effect on the next update; tracking state is kept.
    pub fn set_config(&mut self, cfg: AlarmConfig) {
        if cfg != self.cfg {
            info!(
                "alarm: mode={} duration={}ms cooldown={}ms",
                cfg.mode, cfg.continuous_duration_ms, cfg.cooldown_ms
            );
        }
        self.cfg = cfg;
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// Turning monitoring on or off starts from a clean slate, cooldowns
    /// included.
    pub fn set_monitoring(&mut self, on: bool) {
        info!("alarm: monitoring {}", if on { "on" } else { "off" });
        self.monitoring = on;
        self.first_seen.clear();
        self.last_alarm.clear();
    }

    /// Feed the detections of one completed pass taken at `now_ms`.
    pub fn update(&mut self, detections: &[Detection], now_ms: u64) -> Vec<AlarmEvent> {
        if !self.monitoring {
            self.first_seen.clear();
            return Vec::new();
        }

        let present: HashSet<Category> = detections.iter().map(Detection::category).collect();
        let mut alarms = Vec::new();

        for category in detections.iter().map(Detection::category) {
            if !self.cfg.mode.accepts(&category) {
                continue;
            }
            let first = *self.first_seen.entry(category.clone()).or_insert(now_ms);
            let elapsed = now_ms.saturating_sub(first);
            if elapsed < self.cfg.continuous_duration_ms {
                continue;
            }
            let cooled = match self.last_alarm.get(&category) {
                Some(&last) => now_ms.saturating_sub(last) > self.cfg.cooldown_ms,
                None => true,
            };
            if !cooled {
                continue;
            }

            let event = AlarmEvent::new(category.clone(), elapsed);
            info!("alarm: {}", event.message);
            self.first_seen.insert(category.clone(), now_ms);
            self.last_alarm.insert(category, now_ms);
            alarms.push(event);
        }

        self.first_seen.retain(|category, _| {
            let keep = present.contains(category);
            if !keep {
                debug!("alarm: {} left the frame", category);
            }
            keep
        });
        alarms
    }

    pub fn state(&self, category: &Category, now_ms: u64) -> AlarmState {
        if let Some(&last) = self.last_alarm.get(category) {
            if now_ms.saturating_sub(last) <= self.cfg.cooldown_ms {
                return AlarmState::CoolingDown;
            }
        }
        match self.first_seen.get(category) {
            Some(&first) if now_ms.saturating_sub(first) >= self.cfg.continuous_duration_ms => AlarmState::Armed,
            Some(_) => AlarmState::Tracking,
            None => AlarmState::Absent,
        }
    }
}
