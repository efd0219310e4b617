//! End-to-end scenarios over the deterministic adapters: the full-duplex
//! loopback, lifecycle idempotence, and the ASR/TTS link integration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ferrodub_app::integration::{AsrLink, TtsLink};
use ferrodub_app::PipelineCoordinator;
use ferrodub_audio::{AudioConfig, PcmFrame};
use ferrodub_foundation::AudioError;

fn loopback_config() -> AudioConfig {
    // 16kHz mono, 320-sample (20ms) frames, 10-frame requested buffer.
    AudioConfig::default()
}

#[tokio::test]
async fn steady_state_loopback() {
    let coordinator = PipelineCoordinator::new(loopback_config());
    coordinator.initialize().await.unwrap();
    coordinator.start().await.unwrap();
    assert!(coordinator.is_running());

    // Just under the first policy-monitor tick, so the observed window is
    // pure steady state.
    tokio::time::sleep(Duration::from_millis(480)).await;

    let capture = coordinator.capture_snapshot();
    let metrics = coordinator.metrics();
    let latency = coordinator.latency_stats();

    // ~24 ticks at 20ms over 480ms, with scheduling slack.
    assert!(
        (15..=35).contains(&capture.frames_produced),
        "frames_produced = {}",
        capture.frames_produced
    );
    assert!(
        metrics.buffer_fill_level <= 0.5,
        "fill = {}",
        metrics.buffer_fill_level
    );
    // The jitter buffer never rejected a frame.
    assert_eq!(metrics.overruns, 0);
    assert_eq!(latency.latency_violations, 0);

    coordinator.stop().await.unwrap();
    coordinator.close().await.unwrap();
}

#[tokio::test]
async fn monitor_tasks_record_module_latencies() {
    let coordinator = PipelineCoordinator::new(loopback_config());
    coordinator.initialize().await.unwrap();
    coordinator.start().await.unwrap();

    // Long enough for the 100ms and 500ms monitors to tick.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    coordinator.stop().await.unwrap();

    let summary = coordinator.metrics_summary();
    for module in ["capture", "playback", "monitor"] {
        let m = summary
            .modules
            .get(module)
            .unwrap_or_else(|| panic!("module {module} missing from summary"));
        assert!(m.measurement_count > 0, "no measurements for {module}");
    }

    coordinator.close().await.unwrap();
}

#[tokio::test]
async fn stop_and_close_are_idempotent() {
    let coordinator = PipelineCoordinator::new(loopback_config());
    coordinator.initialize().await.unwrap();
    coordinator.start().await.unwrap();

    coordinator.stop().await.unwrap();
    coordinator.stop().await.unwrap();
    assert!(!coordinator.is_running());

    // Stopped pipelines restart.
    coordinator.start().await.unwrap();
    assert!(coordinator.is_running());
    coordinator.stop().await.unwrap();

    coordinator.close().await.unwrap();
    coordinator.close().await.unwrap();
}

#[tokio::test]
async fn start_guards_lifecycle() {
    let coordinator = PipelineCoordinator::new(loopback_config());
    assert_eq!(coordinator.start().await, Err(AudioError::NotInitialized));

    coordinator.initialize().await.unwrap();
    coordinator.start().await.unwrap();
    assert_eq!(coordinator.start().await, Err(AudioError::AlreadyRunning));

    coordinator.close().await.unwrap();
    assert_eq!(coordinator.start().await, Err(AudioError::NotInitialized));
}

#[tokio::test]
async fn initialize_twice_is_rejected() {
    let coordinator = PipelineCoordinator::new(loopback_config());
    coordinator.initialize().await.unwrap();
    assert_eq!(
        coordinator.initialize().await,
        Err(AudioError::AlreadyInitialized)
    );
}

#[tokio::test]
async fn links_connect_only_while_not_running() {
    let coordinator = PipelineCoordinator::new(loopback_config());
    let asr = Arc::new(AsrLink::new());
    let tts = Arc::new(TtsLink::new());

    coordinator.connect_asr(Arc::clone(&asr)).unwrap();
    coordinator.connect_tts(Arc::clone(&tts)).unwrap();
    assert!(coordinator.is_asr_connected());
    assert!(coordinator.is_tts_connected());

    coordinator.initialize().await.unwrap();
    coordinator.start().await.unwrap();
    assert_eq!(
        coordinator.connect_asr(Arc::new(AsrLink::new())),
        Err(AudioError::AlreadyRunning)
    );
    assert_eq!(
        coordinator.connect_tts(Arc::new(TtsLink::new())),
        Err(AudioError::AlreadyRunning)
    );

    coordinator.stop().await.unwrap();
    coordinator.connect_asr(Arc::new(AsrLink::new())).unwrap();
    coordinator.close().await.unwrap();
}

#[tokio::test]
async fn captured_frames_fan_out_to_asr() {
    let coordinator = PipelineCoordinator::new(loopback_config());
    let asr = Arc::new(AsrLink::new());
    // The external ASR module takes its end before the pipeline runs.
    let mut asr_frames = asr.take_frame_receiver().unwrap();

    asr.start().unwrap();
    coordinator.connect_asr(Arc::clone(&asr)).unwrap();
    coordinator.initialize().await.unwrap();
    coordinator.start().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(1), asr_frames.recv())
        .await
        .expect("a captured frame reaches ASR")
        .expect("channel open");
    assert_eq!(frame.sample_count(), 320);
    assert!(asr.stats().frames_sent > 0);

    coordinator.stop().await.unwrap();
    coordinator.close().await.unwrap();
}

#[tokio::test]
async fn synthesized_frames_feed_playback() {
    let coordinator = PipelineCoordinator::new(loopback_config());
    let tts = Arc::new(TtsLink::new());
    tts.start().unwrap();
    coordinator.connect_tts(Arc::clone(&tts)).unwrap();

    coordinator.initialize().await.unwrap();
    coordinator.start().await.unwrap();

    let config = loopback_config();
    for _ in 0..3 {
        tts.send_frame(PcmFrame::silence(&config, Instant::now()))
            .unwrap();
    }
    assert_eq!(tts.stats().frames_received, 3);

    // Let the forwarder move them and the drain loop play them.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let playback = coordinator.playback_snapshot();
    assert!(playback.frames_played > 0);

    coordinator.stop().await.unwrap();
    coordinator.close().await.unwrap();
}

#[tokio::test]
async fn target_latency_setter_validates_through_coordinator() {
    let coordinator = PipelineCoordinator::new(loopback_config());
    coordinator
        .set_target_latency(Duration::from_millis(80))
        .unwrap();
    assert_eq!(
        coordinator.set_target_latency(Duration::from_millis(5)),
        Err(AudioError::InvalidTargetLatency(Duration::from_millis(5)))
    );
    assert_eq!(coordinator.latency_stats().target_latency, Duration::from_millis(80));
}

#[tokio::test]
async fn degraded_playback_keeps_pipeline_alive() {
    // A one-frame jitter request gets clamped to the window minimum; the
    // producer will overflow it, the consumer will underrun it, and the
    // pipeline must shrug both off.
    let config = AudioConfig {
        buffer_size: 1,
        ..loopback_config()
    };
    let coordinator = PipelineCoordinator::new(config);
    coordinator.initialize().await.unwrap();
    coordinator.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(coordinator.is_running());

    let playback = coordinator.playback_snapshot();
    // Silence was substituted for every starved tick.
    assert_eq!(playback.underruns, playback.silence_frames);

    coordinator.stop().await.unwrap();
    coordinator.close().await.unwrap();
}
