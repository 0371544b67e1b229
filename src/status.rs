use log::{info, warn};

use crate::constants::{INDICATOR_HEALTHY_MS, INDICATOR_UNHEALTHY_MS};

/// Schedules the liveness samples behind the status LED. While the
/// reporting link looks healthy a sample is due every five seconds;
/// once it looks down the cadence drops to a fast recheck so recovery
/// shows up quickly. Purely a timer: reconnecting is left to `report`.
pub struct Indicator {
    healthy: bool,
    next_sample: u64,
}

impl Indicator {
    /// Starts optimistic, with the first sample due immediately.
    pub fn new() -> Self {
        Self {
            healthy: true,
            next_sample: 0,
        }
    }

    /// Whether a liveness sample is due at `now_ms`.
    pub fn due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_sample
    }

    /// Records a sample outcome and schedules the next one.
    pub fn record(&mut self, now_ms: u64, healthy: bool) {
        if healthy && !self.healthy {
            info!("reporting link recovered");
        } else if !healthy && self.healthy {
            warn!("reporting link down");
        }
        self.healthy = healthy;
        self.next_sample = now_ms + self.period_ms();
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn period_ms(&self) -> u64 {
        if self.healthy {
            INDICATOR_HEALTHY_MS
        } else {
            INDICATOR_UNHEALTHY_MS
        }
    }
}

impl Default for Indicator {
    fn default() -> Self {
        Self::new()
    }
}
