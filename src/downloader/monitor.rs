// Resource monitor - estimated memory footprint and pressure responses
//
// The footprint is a heuristic: serialized cache size plus a fixed allowance
// per running download. Crossing the elevated threshold evicts the least-hit
// cache entries; crossing the critical threshold additionally drops
// concurrency to one and pauses the queue until the footprint is back to
// normal.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::orchestrator::Orchestrator;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    #[default]
    Normal,
    Elevated,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryThresholds {
    pub elevated_bytes: u64,
    pub critical_bytes: u64,
    /// Allowance charged for each downloading job
    pub per_job_bytes: u64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            elevated_bytes: 256 * MIB,
            critical_bytes: 512 * MIB,
            per_job_bytes: 64 * MIB,
        }
    }
}

impl MemoryThresholds {
    pub fn level_for(&self, footprint: u64) -> PressureLevel {
        if footprint >= self.critical_bytes {
            PressureLevel::Critical
        } else if footprint >= self.elevated_bytes {
            PressureLevel::Elevated
        } else {
            PressureLevel::Normal
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    level: PressureLevel,
    /// Concurrency in effect before the critical response lowered it
    saved_concurrency: Option<usize>,
    paused_by_monitor: bool,
}

pub struct ResourceMonitor {
    thresholds: MemoryThresholds,
    state: Mutex<MonitorState>,
}

impl ResourceMonitor {
    pub fn new(thresholds: MemoryThresholds) -> Self {
        Self {
            thresholds,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn thresholds(&self) -> &MemoryThresholds {
        &self.thresholds
    }

    pub fn level(&self) -> PressureLevel {
        self.state.lock().level
    }

    pub fn footprint(&self, orchestrator: &Orchestrator) -> u64 {
        let cache_bytes = orchestrator.cache().map_or(0, |c| c.estimated_bytes() as u64);
        cache_bytes + orchestrator.active_count() as u64 * self.thresholds.per_job_bytes
    }

    /// Measure and react
    pub fn check(&self, orchestrator: &Orchestrator) -> PressureLevel {
        let footprint = self.footprint(orchestrator);
        self.check_with(orchestrator, footprint)
    }

    /// React to an externally measured footprint
    pub fn check_with(&self, orchestrator: &Orchestrator, footprint: u64) -> PressureLevel {
        let level = self.thresholds.level_for(footprint);
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.level, level)
        };
        if level == previous {
            return level;
        }

        if level > previous {
            warn!(?level, footprint, "memory pressure rising");
            if let Some(cache) = orchestrator.cache() {
                let evicted = cache.evict_under_pressure();
                info!(evicted, "cache entries evicted under pressure");
            }
        } else {
            info!(?level, footprint, "memory pressure easing");
        }

        if level == PressureLevel::Critical {
            self.enter_critical(orchestrator);
        } else if level == PressureLevel::Normal {
            self.restore(orchestrator);
        }

        orchestrator.report_pressure(level);
        level
    }

    fn enter_critical(&self, orchestrator: &Orchestrator) {
        let mut state = self.state.lock();
        if state.saved_concurrency.is_none() {
            state.saved_concurrency = Some(orchestrator.max_concurrent());
        }
        if !orchestrator.is_paused() {
            state.paused_by_monitor = true;
        }
        let should_pause = state.paused_by_monitor;
        drop(state);

        orchestrator.set_max_concurrent(1);
        if should_pause {
            orchestrator.pause();
        }
    }

    fn restore(&self, orchestrator: &Orchestrator) {
        let (saved, resume) = {
            let mut state = self.state.lock();
            (state.saved_concurrency.take(), std::mem::take(&mut state.paused_by_monitor))
        };
        if let Some(n) = saved {
            orchestrator.set_max_concurrent(n);
        }
        if resume {
            orchestrator.resume();
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(MemoryThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_thresholds() {
        let t = MemoryThresholds {
            elevated_bytes: 100,
            critical_bytes: 200,
            per_job_bytes: 10,
        };
        assert_eq!(t.level_for(0), PressureLevel::Normal);
        assert_eq!(t.level_for(99), PressureLevel::Normal);
        assert_eq!(t.level_for(100), PressureLevel::Elevated);
        assert_eq!(t.level_for(250), PressureLevel::Critical);
    }

    #[test]
    fn levels_are_ordered() {
        assert!(PressureLevel::Critical > PressureLevel::Elevated);
        assert!(PressureLevel::Elevated > PressureLevel::Normal);
    }

    #[test]
    fn partial_thresholds_deserialize() {
        let t: MemoryThresholds = serde_json::from_str(r#"{"critical_bytes": 1024}"#).unwrap();
        assert_eq!(t.critical_bytes, 1024);
        assert_eq!(t.elevated_bytes, 256 * MIB);
    }
}
