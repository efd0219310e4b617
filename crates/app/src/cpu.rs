use parking_lot::RwLock;
use std::time::Duration;

/// EMA smoothing for the busy-fraction samples.
const LOAD_ALPHA: f64 = 0.2;

/// Advisory CPU load estimate: the EWMA of the monitor task's busy
/// fraction per tick period, clamped to [0, 1]. This measures the control
/// loop's own duty cycle, not system-wide CPU; it exists so the adaptive
/// policy and buffer optimizer have a live input instead of a constant.
pub struct CpuLoadEstimator {
    period: Duration,
    load: RwLock<f64>,
}

impl CpuLoadEstimator {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            load: RwLock::new(0.0),
        }
    }

    /// Feeds the busy time of one tick into the estimate.
    pub fn record_tick(&self, busy: Duration) {
        let period = self.period.as_secs_f64();
        if period <= 0.0 {
            return;
        }
        let ratio = (busy.as_secs_f64() / period).clamp(0.0, 1.0);
        let mut load = self.load.write();
        *load = (*load * (1.0 - LOAD_ALPHA) + ratio * LOAD_ALPHA).clamp(0.0, 1.0);
    }

    pub fn current(&self) -> f64 {
        *self.load.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_ticks_keep_load_near_zero() {
        let est = CpuLoadEstimator::new(Duration::from_millis(500));
        for _ in 0..10 {
            est.record_tick(Duration::from_micros(100));
        }
        assert!(est.current() < 0.01);
    }

    #[test]
    fn saturated_ticks_converge_upward() {
        let est = CpuLoadEstimator::new(Duration::from_millis(500));
        for _ in 0..30 {
            est.record_tick(Duration::from_millis(500));
        }
        assert!(est.current() > 0.9);
    }

    #[test]
    fn load_never_leaves_unit_range() {
        let est = CpuLoadEstimator::new(Duration::from_millis(500));
        est.record_tick(Duration::from_secs(10)); // way past the period
        assert!(est.current() <= 1.0);
        assert!(est.current() >= 0.0);
    }
}
