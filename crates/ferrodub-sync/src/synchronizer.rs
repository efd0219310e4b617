use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ferrodub_foundation::{real_clock, AudioError, SharedClock};

const MAX_HISTORY: usize = 100;
/// EMA smoothing factor for the drift estimate.
const DRIFT_ALPHA: f64 = 0.1;
const ADJUSTMENT_COOLDOWN: Duration = Duration::from_millis(500);
const MIN_TARGET_LATENCY: Duration = Duration::from_millis(10);
const MAX_TARGET_LATENCY: Duration = Duration::from_millis(500);
const MIN_TARGET_ALIGNMENT: Duration = Duration::from_millis(1);
const MAX_TARGET_ALIGNMENT: Duration = Duration::from_millis(200);
/// Drift rate above which the two device clocks are considered skewed.
const SKEW_THRESHOLD_MS_PER_S: f64 = 2.0;
const SKEW_MIN_SAMPLES: usize = 10;

/// Tracks temporal alignment between the capture and playback streams and
/// estimates clock drift from their paired timestamp histories.
///
/// Resize decisions are rate-gated here; the accepted target is published
/// as a pending request the coordinator drains and enacts on the playback
/// jitter buffer.
pub struct StreamSynchronizer {
    inner: RwLock<SyncInner>,
    clock: SharedClock,
}

struct SyncInner {
    capture_timestamps: VecDeque<Instant>,
    playback_timestamps: VecDeque<Instant>,
    /// Signed drift in seconds; positive means playback runs ahead.
    drift_secs: f64,
    target_alignment: Duration,
    buffer_adjustments: u64,
    last_adjustment: Option<Instant>,
    pending_resize: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncStats {
    /// Signed drift estimate in seconds.
    pub drift_compensation_secs: f64,
    pub current_alignment: Duration,
    pub target_alignment: Duration,
    pub buffer_adjustments: u64,
    pub capture_data_points: usize,
    pub playback_data_points: usize,
}

impl Default for StreamSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSynchronizer {
    pub fn new() -> Self {
        Self::with_clock(real_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            inner: RwLock::new(SyncInner {
                capture_timestamps: VecDeque::with_capacity(MAX_HISTORY),
                playback_timestamps: VecDeque::with_capacity(MAX_HISTORY),
                drift_secs: 0.0,
                target_alignment: Duration::from_millis(50),
                buffer_adjustments: 0,
                last_adjustment: None,
                pending_resize: None,
            }),
            clock,
        }
    }

    /// Appends a capture/playback timestamp pair (evicting the oldest past
    /// 100) and refreshes the drift estimate.
    pub fn sync_capture_playback(&self, capture_time: Instant, playback_time: Instant) {
        let mut inner = self.inner.write();

        if inner.capture_timestamps.len() == MAX_HISTORY {
            inner.capture_timestamps.pop_front();
        }
        inner.capture_timestamps.push_back(capture_time);

        if inner.playback_timestamps.len() == MAX_HISTORY {
            inner.playback_timestamps.pop_front();
        }
        inner.playback_timestamps.push_back(playback_time);

        inner.recalculate_drift();
    }

    /// Current EMA-smoothed drift estimate, signed, in seconds.
    pub fn drift_compensation(&self) -> f64 {
        self.inner.read().drift_secs
    }

    /// Validates and accepts a jitter-buffer resize target. Successful
    /// calls are rate-gated to one per 500ms; the accepted target is
    /// retrievable via `take_resize_request`.
    pub fn adjust_buffer_size(&self, target_latency: Duration) -> Result<(), AudioError> {
        let mut inner = self.inner.write();

        if let Some(last) = inner.last_adjustment {
            let elapsed = self.clock.now().saturating_duration_since(last);
            if elapsed < ADJUSTMENT_COOLDOWN {
                return Err(AudioError::CooldownActive {
                    remaining: ADJUSTMENT_COOLDOWN - elapsed,
                });
            }
        }

        if target_latency < MIN_TARGET_LATENCY || target_latency > MAX_TARGET_LATENCY {
            return Err(AudioError::InvalidTargetLatency(target_latency));
        }

        inner.buffer_adjustments += 1;
        inner.last_adjustment = Some(self.clock.now());
        inner.pending_resize = Some(target_latency);
        Ok(())
    }

    /// Hands the most recent accepted resize target to the coordinator.
    pub fn take_resize_request(&self) -> Option<Duration> {
        self.inner.write().pending_resize.take()
    }

    /// Absolute difference between the latest capture and playback
    /// timestamps; zero until both streams have reported.
    pub fn alignment(&self) -> Duration {
        self.inner.read().alignment()
    }

    pub fn is_aligned(&self) -> bool {
        let inner = self.inner.read();
        inner.alignment() <= inner.target_alignment
    }

    pub fn set_target_alignment(&self, target: Duration) -> Result<(), AudioError> {
        if target < MIN_TARGET_ALIGNMENT || target > MAX_TARGET_ALIGNMENT {
            return Err(AudioError::InvalidTargetAlignment(target));
        }
        self.inner.write().target_alignment = target;
        Ok(())
    }

    /// Expected playback instant for a capture timestamp under the current
    /// drift estimate.
    pub fn timestamp_mapping(&self, capture_time: Instant) -> Instant {
        let drift = self.inner.read().drift_secs;
        if drift >= 0.0 {
            capture_time + Duration::from_secs_f64(drift)
        } else {
            capture_time - Duration::from_secs_f64(-drift)
        }
    }

    /// True when the drift rate exceeds 2ms per second of capture span.
    /// Needs at least ten samples to say anything.
    pub fn detect_clock_skew(&self) -> (bool, f64) {
        let inner = self.inner.read();

        if inner.capture_timestamps.len() < SKEW_MIN_SAMPLES {
            return (false, 0.0);
        }
        let span = span_of(&inner.capture_timestamps);
        if span.is_zero() {
            return (false, 0.0);
        }

        let rate_ms_per_s = inner.drift_secs * 1000.0 / span.as_secs_f64();
        (rate_ms_per_s.abs() > SKEW_THRESHOLD_MS_PER_S, inner.drift_secs)
    }

    pub fn stats(&self) -> SyncStats {
        let inner = self.inner.read();
        SyncStats {
            drift_compensation_secs: inner.drift_secs,
            current_alignment: inner.alignment(),
            target_alignment: inner.target_alignment,
            buffer_adjustments: inner.buffer_adjustments,
            capture_data_points: inner.capture_timestamps.len(),
            playback_data_points: inner.playback_timestamps.len(),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.capture_timestamps.clear();
        inner.playback_timestamps.clear();
        inner.drift_secs = 0.0;
        inner.buffer_adjustments = 0;
        inner.pending_resize = None;
    }
}

impl SyncInner {
    fn recalculate_drift(&mut self) {
        if self.capture_timestamps.len() < 2 || self.playback_timestamps.len() < 2 {
            return;
        }

        let capture_span = span_of(&self.capture_timestamps).as_secs_f64();
        let playback_span = span_of(&self.playback_timestamps).as_secs_f64();
        let instantaneous = playback_span - capture_span;

        self.drift_secs = self.drift_secs * (1.0 - DRIFT_ALPHA) + instantaneous * DRIFT_ALPHA;
    }

    fn alignment(&self) -> Duration {
        match (
            self.capture_timestamps.back(),
            self.playback_timestamps.back(),
        ) {
            (Some(&capture), Some(&playback)) => {
                if playback >= capture {
                    playback - capture
                } else {
                    capture - playback
                }
            }
            _ => Duration::ZERO,
        }
    }
}

fn span_of(history: &VecDeque<Instant>) -> Duration {
    match (history.front(), history.back()) {
        (Some(&first), Some(&last)) => last.saturating_duration_since(first),
        _ => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrodub_foundation::test_clock;

    fn feed_growing_gap(sync: &StreamSynchronizer, pairs: usize) {
        // Playback starts 10ms behind capture; the gap grows 1ms per pair,
        // so the playback span outruns the capture span.
        let base = Instant::now();
        for i in 0..pairs {
            let capture = base + Duration::from_millis(20 * i as u64);
            let playback =
                capture + Duration::from_millis(10) + Duration::from_millis(i as u64);
            sync.sync_capture_playback(capture, playback);
        }
    }

    #[test]
    fn drift_detected_for_growing_gap() {
        let sync = StreamSynchronizer::new();
        feed_growing_gap(&sync, 20);

        let drift = sync.drift_compensation();
        assert!(drift != 0.0);
        assert!(drift.abs() <= 0.1, "drift {drift} exceeds 100ms");
        // Playback pulls ahead, so the sign is positive.
        assert!(drift > 0.0);
    }

    #[test]
    fn histories_cap_at_one_hundred() {
        let sync = StreamSynchronizer::new();
        feed_growing_gap(&sync, 150);
        let stats = sync.stats();
        assert_eq!(stats.capture_data_points, 100);
        assert_eq!(stats.playback_data_points, 100);
    }

    #[test]
    fn alignment_is_absolute_difference_of_latest_pair() {
        let sync = StreamSynchronizer::new();
        assert_eq!(sync.alignment(), Duration::ZERO);

        let base = Instant::now();
        sync.sync_capture_playback(base, base + Duration::from_millis(30));
        assert_eq!(sync.alignment(), Duration::from_millis(30));
        assert!(sync.is_aligned()); // default target is 50ms

        sync.sync_capture_playback(base, base + Duration::from_millis(80));
        assert!(!sync.is_aligned());
    }

    #[test]
    fn target_alignment_bounds() {
        let sync = StreamSynchronizer::new();
        assert!(sync.set_target_alignment(Duration::from_millis(200)).is_ok());
        assert!(sync.set_target_alignment(Duration::from_millis(1)).is_ok());
        assert!(matches!(
            sync.set_target_alignment(Duration::from_micros(500)),
            Err(AudioError::InvalidTargetAlignment(_))
        ));
        assert!(matches!(
            sync.set_target_alignment(Duration::from_millis(201)),
            Err(AudioError::InvalidTargetAlignment(_))
        ));
    }

    #[test]
    fn cooldown_gates_successive_adjustments() {
        let clock = test_clock();
        let sync = StreamSynchronizer::with_clock(clock.clone());

        sync.adjust_buffer_size(Duration::from_millis(60)).unwrap();
        let err = sync
            .adjust_buffer_size(Duration::from_millis(60))
            .unwrap_err();
        assert!(matches!(err, AudioError::CooldownActive { .. }));

        clock.advance(Duration::from_millis(501));
        sync.adjust_buffer_size(Duration::from_millis(60)).unwrap();
        assert_eq!(sync.stats().buffer_adjustments, 2);
    }

    #[test]
    fn invalid_target_does_not_start_cooldown() {
        let clock = test_clock();
        let sync = StreamSynchronizer::with_clock(clock.clone());

        assert!(matches!(
            sync.adjust_buffer_size(Duration::from_millis(5)),
            Err(AudioError::InvalidTargetLatency(_))
        ));
        assert!(matches!(
            sync.adjust_buffer_size(Duration::from_millis(600)),
            Err(AudioError::InvalidTargetLatency(_))
        ));
        // A valid call right after still succeeds.
        sync.adjust_buffer_size(Duration::from_millis(60)).unwrap();
    }

    #[test]
    fn accepted_target_becomes_pending_resize_request() {
        let sync = StreamSynchronizer::new();
        assert!(sync.take_resize_request().is_none());

        sync.adjust_buffer_size(Duration::from_millis(70)).unwrap();
        assert_eq!(sync.take_resize_request(), Some(Duration::from_millis(70)));
        // Drained exactly once.
        assert!(sync.take_resize_request().is_none());
    }

    #[test]
    fn timestamp_mapping_applies_signed_drift() {
        let sync = StreamSynchronizer::new();
        let base = Instant::now();
        // No history yet: identity mapping.
        assert_eq!(sync.timestamp_mapping(base), base);

        feed_growing_gap(&sync, 20);
        let mapped = sync.timestamp_mapping(base);
        assert!(mapped > base);
    }

    #[test]
    fn skew_needs_ten_samples() {
        let sync = StreamSynchronizer::new();
        feed_growing_gap(&sync, 5);
        let (skewed, _) = sync.detect_clock_skew();
        assert!(!skewed);
    }

    #[test]
    fn strong_skew_is_detected() {
        let sync = StreamSynchronizer::new();
        // 20ms pairs over 15 samples: capture span 280ms. The playback gap
        // grows 5ms per pair, accumulating drift well past 2ms/s.
        let base = Instant::now();
        for i in 0..15u64 {
            let capture = base + Duration::from_millis(20 * i);
            let playback = capture + Duration::from_millis(5 * i);
            sync.sync_capture_playback(capture, playback);
        }
        let (skewed, drift) = sync.detect_clock_skew();
        assert!(skewed);
        assert!(drift > 0.0);
    }

    #[test]
    fn reset_clears_history_and_drift() {
        let sync = StreamSynchronizer::new();
        feed_growing_gap(&sync, 20);
        sync.adjust_buffer_size(Duration::from_millis(60)).unwrap();
        sync.reset();

        let stats = sync.stats();
        assert_eq!(stats.capture_data_points, 0);
        assert_eq!(stats.drift_compensation_secs, 0.0);
        assert_eq!(stats.buffer_adjustments, 0);
        assert!(sync.take_resize_request().is_none());
    }
}
