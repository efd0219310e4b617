use parking_lot::RwLock;
use std::time::Duration;

use ferrodub_foundation::AudioError;

const DEFAULT_HIGH_WATERMARK: f64 = 0.8;
const DEFAULT_LOW_WATERMARK: f64 = 0.2;

/// Hysteretic flow gate over the jitter buffer fill level: activates
/// strictly above the high watermark, clears strictly below the low one,
/// and holds its state in between so a fill level oscillating around a
/// single threshold cannot flap the gate.
pub struct BackpressureController {
    inner: RwLock<BackpressureInner>,
}

struct BackpressureInner {
    high_watermark: f64,
    low_watermark: f64,
    current_fill_level: f64,
    active: bool,
    events_count: u64,
    throttling_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackpressureStats {
    pub events_count: u64,
    pub throttling_duration: Duration,
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new()
    }
}

impl BackpressureController {
    pub fn new() -> Self {
        Self::with_watermarks(DEFAULT_HIGH_WATERMARK, DEFAULT_LOW_WATERMARK)
    }

    pub fn with_watermarks(high: f64, low: f64) -> Self {
        Self {
            inner: RwLock::new(BackpressureInner {
                high_watermark: high,
                low_watermark: low,
                current_fill_level: 0.0,
                active: false,
                events_count: 0,
                throttling_duration: Duration::ZERO,
            }),
        }
    }

    /// Feeds the latest fill level through the hysteresis state machine and
    /// reports whether the producer should throttle.
    pub fn should_apply_backpressure(&self, fill_level: f64) -> bool {
        let mut inner = self.inner.write();
        inner.current_fill_level = fill_level;

        if fill_level > inner.high_watermark {
            if !inner.active {
                inner.events_count += 1;
                tracing::debug!(fill_level, "backpressure activated");
            }
            inner.active = true;
        } else if fill_level < inner.low_watermark {
            inner.active = false;
        }

        inner.active
    }

    /// Recommended producer throttle for the last observed fill level.
    pub fn throttle_duration(&self) -> Duration {
        let inner = self.inner.read();
        if inner.current_fill_level > 0.9 {
            Duration::from_millis(10)
        } else if inner.current_fill_level > 0.8 {
            Duration::from_millis(5)
        } else {
            Duration::ZERO
        }
    }

    pub fn set_watermarks(&self, high: f64, low: f64) -> Result<(), AudioError> {
        if high <= low || high > 1.0 || low < 0.0 {
            return Err(AudioError::InvalidWatermarks { high, low });
        }
        let mut inner = self.inner.write();
        inner.high_watermark = high;
        inner.low_watermark = low;
        Ok(())
    }

    pub fn watermarks(&self) -> (f64, f64) {
        let inner = self.inner.read();
        (inner.high_watermark, inner.low_watermark)
    }

    pub fn current_fill_level(&self) -> f64 {
        self.inner.read().current_fill_level
    }

    pub fn is_active(&self) -> bool {
        self.inner.read().active
    }

    pub fn record_throttling(&self, duration: Duration) {
        self.inner.write().throttling_duration += duration;
    }

    pub fn stats(&self) -> BackpressureStats {
        let inner = self.inner.read();
        BackpressureStats {
            events_count: inner.events_count,
            throttling_duration: inner.throttling_duration,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.events_count = 0;
        inner.throttling_duration = Duration::ZERO;
        inner.active = false;
        inner.current_fill_level = 0.0;
    }
}
