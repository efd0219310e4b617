//! Capture-to-playback path tests with the deterministic adapters wired
//! together by hand, without the coordinator in between.

use std::sync::Arc;
use std::time::Duration;

use ferrodub_audio::{AudioCapture, AudioConfig, AudioPlayback, NullPlayback, SyntheticCapture};

fn config_10ms() -> AudioConfig {
    AudioConfig {
        frame_size: 160, // 10ms at 16kHz
        buffer_size: 6,
        ..Default::default()
    }
}

#[tokio::test]
async fn frames_flow_from_capture_to_playback() {
    let config = config_10ms();
    let capture = Arc::new(SyntheticCapture::new());
    let playback = Arc::new(NullPlayback::new());

    capture.initialize(config.clone()).await.unwrap();
    playback.initialize(config.clone()).await.unwrap();
    capture.start().await.unwrap();
    playback.start().await.unwrap();

    let mut rx = capture.take_frame_receiver().unwrap();
    let playback_writer = Arc::clone(&playback);
    let forwarder = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            // Overflow is a counted, non-fatal drop.
            let _ = playback_writer.write_frame(frame);
        }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;

    let cap = capture.snapshot();
    let play = playback.snapshot();
    assert!(cap.frames_produced >= 20, "produced {}", cap.frames_produced);
    assert!(play.frames_played > 0, "nothing played");
    // The drain keeps up with the producer at matched clock rates.
    assert!(play.buffer_fill_level <= 0.5);

    capture.stop().await.unwrap();
    playback.stop().await.unwrap();
    forwarder.abort();
}

#[tokio::test]
async fn receiver_can_only_be_taken_once_per_start() {
    let capture = SyntheticCapture::new();
    capture.initialize(AudioConfig::default()).await.unwrap();
    capture.start().await.unwrap();

    assert!(capture.take_frame_receiver().is_some());
    assert!(capture.take_frame_receiver().is_none());

    // A restart hands out a fresh channel.
    capture.stop().await.unwrap();
    capture.start().await.unwrap();
    assert!(capture.take_frame_receiver().is_some());

    capture.stop().await.unwrap();
}

#[tokio::test]
async fn restart_does_not_replay_old_frames() {
    let config = config_10ms();
    let capture = SyntheticCapture::new();
    capture.initialize(config).await.unwrap();

    capture.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    capture.stop().await.unwrap();
    // The first epoch's receiver was never taken; its frames die with it.

    capture.start().await.unwrap();
    let mut rx = capture.take_frame_receiver().unwrap();
    let frame = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("fresh epoch produces frames")
        .expect("channel open");
    // Internal ring was cleared at stop, so the new epoch starts clean.
    assert!(frame.samples.iter().all(|&s| s == 0));
    capture.stop().await.unwrap();
}

#[tokio::test]
async fn playback_reset_stats_zeroes_counters() {
    let playback = NullPlayback::new();
    playback.initialize(config_10ms()).await.unwrap();
    playback.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    playback.stop().await.unwrap();
    assert!(playback.snapshot().underruns > 0);

    playback.reset_stats();
    let snap = playback.snapshot();
    assert_eq!(snap.underruns, 0);
    assert_eq!(snap.silence_frames, 0);
    assert_eq!(snap.ring_underruns, 0);
}

#[tokio::test]
async fn capture_reset_stats_zeroes_counters() {
    let capture = SyntheticCapture::new();
    capture
        .initialize(AudioConfig {
            frame_size: 160,
            buffer_size: 2, // tiny internal ring overruns quickly
            ..Default::default()
        })
        .await
        .unwrap();
    capture.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    capture.stop().await.unwrap();

    let before = capture.snapshot();
    assert!(before.frames_produced > 0);
    assert!(before.capture_errors > 0);

    capture.reset_stats();
    let after = capture.snapshot();
    assert_eq!(after.frames_produced, 0);
    assert_eq!(after.capture_errors, 0);
    assert_eq!(after.ring_overruns, 0);
}
