use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ferrodub_telemetry::LatencyMetrics;

/// An optimization the coordinator should enact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Shrink the jitter buffer by this many steps to cut latency.
    ReduceBuffer(u32),
    /// Grow the jitter buffer by this many steps to absorb underruns.
    IncreaseBuffer(u32),
    SwitchToExclusiveMode,
    SwitchToSharedMode,
    ApplyDriftCompensation,
}

struct Thresholds {
    latency_threshold: Duration,
    buffer_adjustment_step: u32,
    cpu_threshold: f64,
    underrun_threshold: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyStats {
    pub latency_threshold: Duration,
    pub buffer_adjustment_step: u32,
    pub cpu_threshold: f64,
    pub underrun_threshold: u64,
    pub actions_applied: u64,
}

/// Maps current metrics to a list of actions. The rules fire
/// independently; conflicting actions are the coordinator's to resolve.
/// Evaluation is a pure function of its arguments — only the
/// `actions_applied` counter accumulates across calls.
pub struct AdaptivePolicy {
    thresholds: RwLock<Thresholds>,
    actions_applied: AtomicU64,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptivePolicy {
    pub fn new() -> Self {
        Self::with_thresholds(Duration::from_millis(80), 2, 0.8, 5)
    }

    pub fn with_thresholds(
        latency_threshold: Duration,
        buffer_adjustment_step: u32,
        cpu_threshold: f64,
        underrun_threshold: u64,
    ) -> Self {
        Self {
            thresholds: RwLock::new(Thresholds {
                latency_threshold,
                buffer_adjustment_step,
                cpu_threshold,
                underrun_threshold,
            }),
            actions_applied: AtomicU64::new(0),
        }
    }

    pub fn evaluate(
        &self,
        metrics: &LatencyMetrics,
        underruns: u64,
        cpu_load: f64,
    ) -> Vec<Action> {
        let thresholds = self.thresholds.read();
        let mut actions = Vec::new();

        // High end-to-end latency: shrink the buffer.
        if metrics.end_to_end() > thresholds.latency_threshold {
            actions.push(Action::ReduceBuffer(thresholds.buffer_adjustment_step));
        }

        // Frequent underruns: grow the buffer.
        if underruns > thresholds.underrun_threshold {
            actions.push(Action::IncreaseBuffer(thresholds.buffer_adjustment_step));
        }

        // Loaded CPU prefers the shared device mode; an idle one can afford
        // exclusive access for lower latency.
        if cpu_load > thresholds.cpu_threshold {
            actions.push(Action::SwitchToSharedMode);
        } else if cpu_load < 0.5 {
            actions.push(Action::SwitchToExclusiveMode);
        }

        // Dropped frames hint at clock drift.
        if metrics.dropped_frames > 0 {
            actions.push(Action::ApplyDriftCompensation);
        }

        self.actions_applied
            .fetch_add(actions.len() as u64, Ordering::Relaxed);
        actions
    }

    /// Evaluation from a metrics snapshot alone; CPU load defaults to a
    /// neutral 0.5.
    pub fn evaluate_with_metrics(&self, metrics: &LatencyMetrics) -> Vec<Action> {
        self.evaluate(metrics, metrics.underruns, 0.5)
    }

    pub fn set_latency_threshold(&self, threshold: Duration) {
        self.thresholds.write().latency_threshold = threshold;
    }

    pub fn latency_threshold(&self) -> Duration {
        self.thresholds.read().latency_threshold
    }

    pub fn set_buffer_adjustment_step(&self, step: u32) {
        self.thresholds.write().buffer_adjustment_step = step;
    }

    pub fn buffer_adjustment_step(&self) -> u32 {
        self.thresholds.read().buffer_adjustment_step
    }

    pub fn set_cpu_threshold(&self, threshold: f64) {
        self.thresholds.write().cpu_threshold = threshold;
    }

    pub fn cpu_threshold(&self) -> f64 {
        self.thresholds.read().cpu_threshold
    }

    pub fn set_underrun_threshold(&self, threshold: u64) {
        self.thresholds.write().underrun_threshold = threshold;
    }

    pub fn underrun_threshold(&self) -> u64 {
        self.thresholds.read().underrun_threshold
    }

    pub fn actions_applied(&self) -> u64 {
        self.actions_applied.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.actions_applied.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PolicyStats {
        let thresholds = self.thresholds.read();
        PolicyStats {
            latency_threshold: thresholds.latency_threshold,
            buffer_adjustment_step: thresholds.buffer_adjustment_step,
            cpu_threshold: thresholds.cpu_threshold,
            underrun_threshold: thresholds.underrun_threshold,
            actions_applied: self.actions_applied.load(Ordering::Relaxed),
        }
    }
}
