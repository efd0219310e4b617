use std::time::{Duration, Instant};

/// One observation of pipeline health, composed by the coordinator from the
/// capture and playback snapshots each monitor tick.
#[derive(Debug, Clone, Copy)]
pub struct LatencyMetrics {
    pub capture_latency: Duration,
    pub playback_latency: Duration,
    /// Jitter buffer utilization in [0, 1].
    pub buffer_fill_level: f64,
    pub dropped_frames: u64,
    pub underruns: u64,
    pub overruns: u64,
    pub timestamp: Instant,
}

impl LatencyMetrics {
    pub fn end_to_end(&self) -> Duration {
        self.capture_latency + self.playback_latency
    }
}

impl Default for LatencyMetrics {
    fn default() -> Self {
        Self {
            capture_latency: Duration::ZERO,
            playback_latency: Duration::ZERO,
            buffer_fill_level: 0.0,
            dropped_frames: 0,
            underruns: 0,
            overruns: 0,
            timestamp: Instant::now(),
        }
    }
}

/// Device acquisition mode. Shared coexists with other audio clients at a
/// latency cost; exclusive takes the device for the lowest latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceMode {
    #[default]
    Shared,
    Exclusive,
}
