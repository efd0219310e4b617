use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ferrodub_foundation::{real_clock, AudioError, SharedClock};
use ferrodub_telemetry::{DeviceMode, LatencyMetrics};

const MAX_HISTORY: usize = 100;
const OPTIMIZATION_COOLDOWN: Duration = Duration::from_secs(1);
const MIN_TARGET_LATENCY: Duration = Duration::from_millis(10);
const MAX_TARGET_LATENCY: Duration = Duration::from_millis(500);
/// End-to-end latency this far past the target counts as a violation.
const VIOLATION_MARGIN: Duration = Duration::from_millis(150);
const HIGH_CPU_LOAD: f64 = 0.8;
const LOW_CPU_LOAD: f64 = 0.3;
/// Above this load the shared device mode is preferred.
const MODE_CPU_THRESHOLD: f64 = 0.7;
/// Targets below this prefer exclusive device access.
const EXCLUSIVE_LATENCY_TARGET: Duration = Duration::from_millis(50);

/// Tracks end-to-end latency over a bounded rolling window, derives
/// percentiles, selects the device operation mode, and rate-gates buffer
/// optimization decisions. Decisions land here; enactment is the
/// coordinator's job through the adaptive policy.
pub struct LatencyManager {
    inner: RwLock<LatencyInner>,
    clock: SharedClock,
}

struct LatencyInner {
    capture_latency: Duration,
    playback_latency: Duration,
    end_to_end_latency: Duration,
    target_latency: Duration,
    history: VecDeque<Duration>,
    cpu_load: f64,
    mode: DeviceMode,
    buffer_optimizations: u64,
    latency_violations: u64,
    last_optimization: Option<Instant>,
    jitter_compensation: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct LatencyStats {
    pub capture_latency: Duration,
    pub playback_latency: Duration,
    pub end_to_end_latency: Duration,
    pub target_latency: Duration,
    pub average_latency: Duration,
    pub p50_latency: Duration,
    pub p95_latency: Duration,
    pub p99_latency: Duration,
    pub cpu_load: f64,
    pub mode: DeviceMode,
    pub buffer_optimizations: u64,
    pub latency_violations: u64,
    pub jitter_compensation: Duration,
}

impl LatencyManager {
    pub fn new(target_latency: Duration) -> Self {
        Self::with_clock(target_latency, real_clock())
    }

    pub fn with_clock(target_latency: Duration, clock: SharedClock) -> Self {
        Self {
            inner: RwLock::new(LatencyInner {
                capture_latency: Duration::ZERO,
                playback_latency: Duration::ZERO,
                end_to_end_latency: Duration::ZERO,
                target_latency,
                history: VecDeque::with_capacity(MAX_HISTORY),
                cpu_load: 0.0,
                mode: DeviceMode::Shared,
                buffer_optimizations: 0,
                latency_violations: 0,
                last_optimization: None,
                jitter_compensation: Duration::ZERO,
            }),
            clock,
        }
    }

    /// Current latency observation as a metrics snapshot. Buffer fill and
    /// frame counters are the coordinator's to fill in.
    pub fn monitor_latency(&self) -> LatencyMetrics {
        let inner = self.inner.read();
        LatencyMetrics {
            capture_latency: inner.capture_latency,
            playback_latency: inner.playback_latency,
            buffer_fill_level: 0.0,
            dropped_frames: 0,
            underruns: 0,
            overruns: 0,
            timestamp: Instant::now(),
        }
    }

    /// Records a capture/playback latency pair; the sum joins the rolling
    /// window and counts against the violation margin.
    pub fn update_latency(&self, capture: Duration, playback: Duration) {
        let mut inner = self.inner.write();

        inner.capture_latency = capture;
        inner.playback_latency = playback;
        inner.end_to_end_latency = capture + playback;

        if inner.history.len() == MAX_HISTORY {
            inner.history.pop_front();
        }
        let sample = inner.end_to_end_latency;
        inner.history.push_back(sample);

        if inner.end_to_end_latency > inner.target_latency + VIOLATION_MARGIN {
            inner.latency_violations += 1;
            tracing::warn!(
                end_to_end = ?inner.end_to_end_latency,
                target = ?inner.target_latency,
                "target latency violated"
            );
        }
    }

    /// Rate-gated buffer optimization decision. High load (>0.8) and low
    /// load (<0.3) count an optimization and start the cooldown; medium
    /// load changes nothing and leaves the gate open.
    pub fn optimize_buffers(&self, cpu_load: f64) -> Result<(), AudioError> {
        let mut inner = self.inner.write();

        if let Some(last) = inner.last_optimization {
            let elapsed = self.clock.now().saturating_duration_since(last);
            if elapsed < OPTIMIZATION_COOLDOWN {
                return Err(AudioError::CooldownActive {
                    remaining: OPTIMIZATION_COOLDOWN - elapsed,
                });
            }
        }

        if !(0.0..=1.0).contains(&cpu_load) {
            return Err(AudioError::InvalidCpuLoad(cpu_load));
        }

        inner.cpu_load = cpu_load;

        if cpu_load > HIGH_CPU_LOAD || cpu_load < LOW_CPU_LOAD {
            inner.buffer_optimizations += 1;
            inner.last_optimization = Some(self.clock.now());
        }

        Ok(())
    }

    /// Picks the device mode for the current target latency and CPU load:
    /// exclusive when the target is tight and the CPU can afford it,
    /// shared when the CPU is loaded, exclusive otherwise.
    pub fn select_operation_mode(&self) -> DeviceMode {
        let mut inner = self.inner.write();

        inner.mode = if inner.target_latency < EXCLUSIVE_LATENCY_TARGET
            && inner.cpu_load < MODE_CPU_THRESHOLD
        {
            DeviceMode::Exclusive
        } else if inner.cpu_load > MODE_CPU_THRESHOLD {
            DeviceMode::Shared
        } else {
            DeviceMode::Exclusive
        };

        inner.mode
    }

    pub fn current_mode(&self) -> DeviceMode {
        self.inner.read().mode
    }

    pub fn end_to_end_latency(&self) -> Duration {
        self.inner.read().end_to_end_latency
    }

    pub fn target_latency(&self) -> Duration {
        self.inner.read().target_latency
    }

    pub fn set_target_latency(&self, target: Duration) -> Result<(), AudioError> {
        if target < MIN_TARGET_LATENCY || target > MAX_TARGET_LATENCY {
            return Err(AudioError::InvalidTargetLatency(target));
        }
        self.inner.write().target_latency = target;
        Ok(())
    }

    pub fn is_within_target(&self) -> bool {
        let inner = self.inner.read();
        inner.end_to_end_latency <= inner.target_latency
    }

    pub fn update_cpu_load(&self, load: f64) -> Result<(), AudioError> {
        if !(0.0..=1.0).contains(&load) {
            return Err(AudioError::InvalidCpuLoad(load));
        }
        self.inner.write().cpu_load = load;
        Ok(())
    }

    pub fn average_latency(&self) -> Duration {
        self.inner.read().average()
    }

    /// Percentile over the rolling window; zero for an empty window or a
    /// percentile outside [0, 100]. Sorts a local copy, never shared state.
    pub fn latency_percentile(&self, percentile: f64) -> Duration {
        let inner = self.inner.read();
        inner.percentiles(&[percentile])[0]
    }

    /// Half the standard deviation of the rolling window.
    pub fn calculate_jitter_compensation(&self) -> Duration {
        let mut inner = self.inner.write();

        if inner.history.len() < 2 {
            return Duration::ZERO;
        }

        let avg = inner.average().as_secs_f64();
        let variance = inner
            .history
            .iter()
            .map(|d| {
                let diff = d.as_secs_f64() - avg;
                diff * diff
            })
            .sum::<f64>()
            / inner.history.len() as f64;

        let std_dev = variance.sqrt();
        inner.jitter_compensation = Duration::from_secs_f64(std_dev / 2.0);
        inner.jitter_compensation
    }

    pub fn stats(&self) -> LatencyStats {
        let inner = self.inner.read();
        let percentiles = inner.percentiles(&[50.0, 95.0, 99.0]);

        LatencyStats {
            capture_latency: inner.capture_latency,
            playback_latency: inner.playback_latency,
            end_to_end_latency: inner.end_to_end_latency,
            target_latency: inner.target_latency,
            average_latency: inner.average(),
            p50_latency: percentiles[0],
            p95_latency: percentiles[1],
            p99_latency: percentiles[2],
            cpu_load: inner.cpu_load,
            mode: inner.mode,
            buffer_optimizations: inner.buffer_optimizations,
            latency_violations: inner.latency_violations,
            jitter_compensation: inner.jitter_compensation,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.history.clear();
        inner.buffer_optimizations = 0;
        inner.latency_violations = 0;
        inner.capture_latency = Duration::ZERO;
        inner.playback_latency = Duration::ZERO;
        inner.end_to_end_latency = Duration::ZERO;
        inner.jitter_compensation = Duration::ZERO;
    }
}

impl LatencyInner {
    fn average(&self) -> Duration {
        if self.history.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.history.iter().sum();
        sum / self.history.len() as u32
    }

    fn percentiles(&self, wanted: &[f64]) -> Vec<Duration> {
        if self.history.is_empty() {
            return vec![Duration::ZERO; wanted.len()];
        }

        let mut sorted: Vec<Duration> = self.history.iter().copied().collect();
        sorted.sort_unstable();

        wanted
            .iter()
            .map(|&p| {
                if !(0.0..=100.0).contains(&p) {
                    return Duration::ZERO;
                }
                let index = ((sorted.len() - 1) as f64 * p / 100.0) as usize;
                sorted[index]
            })
            .collect()
    }
}
