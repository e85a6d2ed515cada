// Bandwidth controller - effective transfer ceiling for new downloads
//
// Resolution per evaluation:
//   disabled                     -> 0 (unlimited)
//   highest-priority active window, else the manual ceiling
//   x adaptive factor (time of day, link class, efficiency, trend), clamped
//   x flat network-class multiplier when network-aware
// Units are KiB/s throughout; yt-dlp receives `--limit-rate <n>K`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use time::Weekday;
use tracing::{debug, info};

use super::traits::{Clock, NetworkProbe};
use super::utils::NetworkClass;

/// Bounds of the combined adaptive factor
pub const ADAPTIVE_MIN: f64 = 0.3;
pub const ADAPTIVE_MAX: f64 = 1.5;

const SAMPLE_WINDOW: usize = 20;
const TREND_TARGET: f64 = 0.9;

/// A time-of-day window with its own ceiling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthSchedule {
    pub name: String,
    /// Minutes after midnight, inclusive
    pub start_minute: u16,
    /// Minutes after midnight, exclusive. Less than `start_minute` wraps past
    /// midnight; equal means the whole day.
    pub end_minute: u16,
    /// Days the window starts on; empty means every day
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    /// Ceiling in KiB/s, 0 for unlimited
    pub limit_kib: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher wins when windows overlap
    #[serde(default)]
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

impl BandwidthSchedule {
    pub fn new(name: impl Into<String>, start: (u8, u8), end: (u8, u8), limit_kib: u64) -> Self {
        let minute = |(h, m): (u8, u8)| (h.min(23) as u16) * 60 + m.min(59) as u16;
        Self {
            name: name.into(),
            start_minute: minute(start),
            end_minute: minute(end),
            weekdays: Vec::new(),
            limit_kib,
            enabled: true,
            priority: 0,
        }
    }

    pub fn with_weekdays(mut self, weekdays: Vec<Weekday>) -> Self {
        self.weekdays = weekdays;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn runs_on(&self, weekday: Weekday) -> bool {
        self.weekdays.is_empty() || self.weekdays.contains(&weekday)
    }

    /// Whether the window covers `minute` (after midnight) on `weekday`.
    /// The part of a wrapping window after midnight belongs to the previous day.
    pub fn is_active(&self, minute: u16, weekday: Weekday) -> bool {
        if !self.enabled {
            return false;
        }
        let (start, end) = (self.start_minute, self.end_minute);
        if start == end {
            self.runs_on(weekday)
        } else if start < end {
            self.runs_on(weekday) && minute >= start && minute < end
        } else {
            (minute >= start && self.runs_on(weekday)) || (minute < end && self.runs_on(weekday.previous()))
        }
    }
}

/// User-facing bandwidth settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthSettings {
    pub enabled: bool,
    /// Ceiling when no schedule is active, KiB/s, 0 for unlimited
    pub manual_limit_kib: u64,
    pub schedules: Vec<BandwidthSchedule>,
    pub adaptive: bool,
    pub network_aware: bool,
}

impl Default for BandwidthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            manual_limit_kib: 0,
            schedules: Vec::new(),
            adaptive: false,
            network_aware: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ThroughputSample {
    requested_kib: f64,
    achieved_kib: f64,
}

/// Adaptive multiplier for the hour of day
pub fn time_of_day_factor(hour: u8) -> f64 {
    match hour {
        18..=23 => 0.8,
        1..=6 => 1.2,
        _ => 1.0,
    }
}

/// Adaptive dampening per link class
pub fn adaptive_network_factor(class: NetworkClass) -> f64 {
    match class {
        NetworkClass::Wired | NetworkClass::Unknown => 1.0,
        NetworkClass::Wifi => 0.9,
        NetworkClass::Mobile => 0.6,
    }
}

/// Flat multiplier applied when network-aware adjustment is on
pub fn network_aware_multiplier(class: NetworkClass) -> f64 {
    match class {
        NetworkClass::Wired | NetworkClass::Unknown => 1.0,
        NetworkClass::Wifi => 0.85,
        NetworkClass::Mobile => 0.5,
    }
}

/// Rate-limit fragment for a ceiling in KiB/s
pub fn limit_rate_args(limit_kib: u64) -> Vec<String> {
    match limit_kib {
        0 => Vec::new(),
        limit => vec!["--limit-rate".to_string(), format!("{}K", limit)],
    }
}

pub struct BandwidthController {
    settings: RwLock<BandwidthSettings>,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn NetworkProbe>,
    samples: Mutex<VecDeque<ThroughputSample>>,
    /// Last value computed by `update`
    current: RwLock<u64>,
}

impl BandwidthController {
    pub fn new(settings: BandwidthSettings, clock: Arc<dyn Clock>, probe: Arc<dyn NetworkProbe>) -> Self {
        let controller = Self {
            settings: RwLock::new(settings),
            clock,
            probe,
            samples: Mutex::new(VecDeque::with_capacity(SAMPLE_WINDOW)),
            current: RwLock::new(0),
        };
        controller.update();
        controller
    }

    pub fn settings(&self) -> BandwidthSettings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: BandwidthSettings) {
        *self.settings.write() = settings;
        self.update();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.settings.write().enabled = enabled;
        self.update();
    }

    pub fn set_manual_limit(&self, limit_kib: u64) {
        self.settings.write().manual_limit_kib = limit_kib;
        self.update();
    }

    /// Add a schedule, replacing one with the same name
    pub fn upsert_schedule(&self, schedule: BandwidthSchedule) {
        {
            let mut settings = self.settings.write();
            match settings.schedules.iter_mut().find(|s| s.name == schedule.name) {
                Some(existing) => *existing = schedule,
                None => settings.schedules.push(schedule),
            }
        }
        self.update();
    }

    pub fn remove_schedule(&self, name: &str) -> bool {
        let removed = {
            let mut settings = self.settings.write();
            let before = settings.schedules.len();
            settings.schedules.retain(|s| s.name != name);
            settings.schedules.len() != before
        };
        if removed {
            self.update();
        }
        removed
    }

    /// Highest-priority schedule active right now. Ties go to the one listed first.
    pub fn active_schedule(&self) -> Option<BandwidthSchedule> {
        let now = self.clock.now();
        let minute = now.hour() as u16 * 60 + now.minute() as u16;
        let weekday = now.weekday();

        let settings = self.settings.read();
        let mut best: Option<&BandwidthSchedule> = None;
        for schedule in settings.schedules.iter().filter(|s| s.is_active(minute, weekday)) {
            if best.map_or(true, |b| schedule.priority > b.priority) {
                best = Some(schedule);
            }
        }
        best.cloned()
    }

    /// Feed one throughput observation (both values in KiB/s)
    pub fn record_sample(&self, requested_kib: f64, achieved_kib: f64) {
        if !achieved_kib.is_finite() || achieved_kib < 0.0 || !requested_kib.is_finite() {
            return;
        }
        let mut samples = self.samples.lock();
        if samples.len() == SAMPLE_WINDOW {
            samples.pop_front();
        }
        samples.push_back(ThroughputSample {
            requested_kib: requested_kib.max(0.0),
            achieved_kib,
        });
    }

    /// Mean achieved/requested over samples that had a ceiling
    fn efficiency(&self) -> Option<f64> {
        let samples = self.samples.lock();
        let ratios: Vec<f64> = samples
            .iter()
            .filter(|s| s.requested_kib > 0.0)
            .map(|s| (s.achieved_kib / s.requested_kib).min(1.0))
            .collect();
        if ratios.is_empty() {
            None
        } else {
            Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
        }
    }

    fn mean_achieved(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            None
        } else {
            Some(samples.iter().map(|s| s.achieved_kib).sum::<f64>() / samples.len() as f64)
        }
    }

    /// Combined adaptive factor for a base ceiling, clamped to [0.3, 1.5]
    pub fn adaptive_factor(&self, base_kib: u64) -> f64 {
        let hour = self.clock.now().hour();
        let mut factor = time_of_day_factor(hour) * adaptive_network_factor(self.probe.network_class());

        match self.efficiency() {
            Some(e) if e < 0.5 => factor *= 0.8,
            Some(e) if e < 0.75 => factor *= 0.9,
            _ => {}
        }

        if let Some(achieved) = self.mean_achieved() {
            let target = base_kib as f64 * TREND_TARGET;
            if achieved >= target {
                factor *= 1.05;
            } else {
                factor *= 0.95;
            }
        }

        factor.clamp(ADAPTIVE_MIN, ADAPTIVE_MAX)
    }

    /// Effective ceiling in KiB/s; 0 means unlimited
    pub fn current_limit(&self) -> u64 {
        let settings = self.settings();
        if !settings.enabled {
            return 0;
        }

        let base = match self.active_schedule() {
            Some(schedule) => schedule.limit_kib,
            None => settings.manual_limit_kib,
        };
        if base == 0 {
            return 0;
        }

        let mut limit = base as f64;
        if settings.adaptive {
            limit *= self.adaptive_factor(base);
        }
        if settings.network_aware {
            limit *= network_aware_multiplier(self.probe.network_class());
        }

        // A positive ceiling must not round down to "unlimited"
        (limit.floor().max(0.0) as u64).max(1)
    }

    /// `--limit-rate <n>K`, or nothing when unlimited
    pub fn build_args(&self) -> Vec<String> {
        limit_rate_args(self.current_limit())
    }

    /// Recompute and cache the ceiling; returns true when it changed
    pub fn update(&self) -> bool {
        let limit = self.current_limit();
        let mut current = self.current.write();
        if *current != limit {
            info!(from_kib = *current, to_kib = limit, "bandwidth ceiling changed");
            *current = limit;
            true
        } else {
            debug!(limit_kib = limit, "bandwidth ceiling unchanged");
            false
        }
    }

    /// Ceiling from the last `update`
    pub fn last_limit(&self) -> u64 {
        *self.current.read()
    }
}
