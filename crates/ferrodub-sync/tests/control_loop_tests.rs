//! The control-loop components composed the way the pipeline monitor
//! composes them: metrics feed the latency manager and the policy, policy
//! actions land on the synchronizer, and the synchronizer's cooldown gates
//! the cadence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ferrodub_foundation::{test_clock, AudioError};
use ferrodub_sync::{
    Action, AdaptivePolicy, BackpressureController, LatencyManager, StreamSynchronizer,
};
use ferrodub_telemetry::LatencyMetrics;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn metrics(capture_ms: u64, playback_ms: u64) -> LatencyMetrics {
    LatencyMetrics {
        capture_latency: ms(capture_ms),
        playback_latency: ms(playback_ms),
        buffer_fill_level: 0.4,
        dropped_frames: 0,
        underruns: 0,
        overruns: 0,
        timestamp: Instant::now(),
    }
}

#[test]
fn policy_actions_land_as_resize_requests() {
    let clock = test_clock();
    let synchronizer = Arc::new(StreamSynchronizer::with_clock(clock.clone()));
    let policy = AdaptivePolicy::new();

    // 90ms end-to-end is past the 80ms threshold: the policy asks for a
    // buffer reduction.
    let observed = metrics(50, 40);
    let actions = policy.evaluate(&observed, 0, 0.6);
    assert!(actions.contains(&Action::ReduceBuffer(2)));

    // Enacted the way the monitor does it: step x 10ms off the current
    // end-to-end latency.
    let target = observed.end_to_end() - ms(2 * 10);
    synchronizer.adjust_buffer_size(target).unwrap();
    assert_eq!(synchronizer.take_resize_request(), Some(ms(70)));

    // A second action in the same window hits the cooldown.
    assert!(matches!(
        synchronizer.adjust_buffer_size(target),
        Err(AudioError::CooldownActive { .. })
    ));

    clock.advance(ms(600));
    synchronizer.adjust_buffer_size(target).unwrap();
    assert_eq!(synchronizer.stats().buffer_adjustments, 2);
}

#[test]
fn latency_window_and_policy_agree_on_violations() {
    let manager = LatencyManager::new(ms(100));
    let policy = AdaptivePolicy::new();

    // A burst of slow samples: every one violates the 250ms ceiling and
    // trips the policy's latency rule.
    for _ in 0..10 {
        let observed = metrics(200, 100);
        manager.update_latency(observed.capture_latency, observed.playback_latency);
        let actions = policy.evaluate(&observed, 0, 0.6);
        assert!(actions.contains(&Action::ReduceBuffer(2)));
    }

    let stats = manager.stats();
    assert_eq!(stats.latency_violations, 10);
    assert_eq!(stats.p50_latency, ms(300));
    assert!(stats.p50_latency <= stats.p95_latency);
    assert!(stats.p95_latency <= stats.p99_latency);
}

#[test]
fn backpressure_follows_a_congestion_wave() {
    let controller = BackpressureController::new();

    // Fill climbs, saturates, then drains: the gate opens once, throttles
    // hardest at the peak, and releases only under the low watermark.
    let wave = [0.3, 0.6, 0.85, 0.95, 0.95, 0.85, 0.5, 0.25, 0.15];
    let mut throttled = Duration::ZERO;
    let mut active_ticks = 0;

    for fill in wave {
        if controller.should_apply_backpressure(fill) {
            active_ticks += 1;
            let throttle = controller.throttle_duration();
            if throttle > Duration::ZERO {
                controller.record_throttling(throttle);
                throttled += throttle;
            }
        }
    }

    // Active from 0.85 until the 0.15 release.
    assert_eq!(active_ticks, 6);
    assert!(!controller.is_active());
    let stats = controller.stats();
    assert_eq!(stats.events_count, 1);
    // 5 + 10 + 10 + 5ms at the >0.8 samples; nothing once fill fell to 0.5.
    assert_eq!(stats.throttling_duration, ms(30));
    assert_eq!(throttled, stats.throttling_duration);
}

#[test]
fn drift_prompts_compensation_only_past_the_threshold() {
    let synchronizer = StreamSynchronizer::new();
    let policy = AdaptivePolicy::new();

    // Dropped frames make the policy suggest drift compensation.
    let mut observed = metrics(10, 10);
    observed.dropped_frames = 4;
    let actions = policy.evaluate(&observed, 0, 0.6);
    assert!(actions.contains(&Action::ApplyDriftCompensation));

    // With no accumulated drift the monitor would treat it as a no-op.
    assert!(synchronizer.drift_compensation().abs() < 0.005);

    // Grow a real drift: playback pulls ahead 4ms per pair.
    let base = Instant::now();
    for i in 0..30u64 {
        let capture = base + Duration::from_millis(20 * i);
        let playback = capture + Duration::from_millis(4 * i);
        synchronizer.sync_capture_playback(capture, playback);
    }
    assert!(synchronizer.drift_compensation().abs() > 0.005);

    // Now the compensating adjustment goes through.
    synchronizer.adjust_buffer_size(ms(50)).unwrap();
    assert_eq!(synchronizer.take_resize_request(), Some(ms(50)));
}

#[test]
fn cooldowns_are_independent_per_component() {
    let clock = test_clock();
    let synchronizer = StreamSynchronizer::with_clock(clock.clone());
    let manager = LatencyManager::with_clock(ms(100), clock.clone());

    synchronizer.adjust_buffer_size(ms(60)).unwrap();
    // The synchronizer cooldown does not gate the optimizer.
    manager.optimize_buffers(0.9).unwrap();

    // 600ms clears the 500ms adjustment gate but not the 1s optimizer gate.
    clock.advance(ms(600));
    synchronizer.adjust_buffer_size(ms(60)).unwrap();
    assert!(matches!(
        manager.optimize_buffers(0.9),
        Err(AudioError::CooldownActive { .. })
    ));

    clock.advance(ms(500));
    manager.optimize_buffers(0.9).unwrap();
    assert_eq!(manager.stats().buffer_optimizations, 2);
}
