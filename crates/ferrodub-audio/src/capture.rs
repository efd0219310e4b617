use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::frame::{AudioConfig, PcmFrame};
use crate::ring::FrameRing;
use ferrodub_foundation::AudioError;

/// Egress channel depth between the capture tick and the forwarder task.
pub const FRAME_CHANNEL_CAPACITY: usize = 10;

/// Device-side producer of PCM frames. Platform adapters (WASAPI,
/// PulseAudio, CoreAudio, ...) implement this seam; the transport core only
/// ever talks to the trait.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    async fn initialize(&self, config: AudioConfig) -> Result<(), AudioError>;
    async fn start(&self) -> Result<(), AudioError>;
    /// Idempotent.
    async fn stop(&self) -> Result<(), AudioError>;
    async fn close(&self) -> Result<(), AudioError>;

    /// Hands the bounded egress channel to the single consumer. Returns
    /// `None` before `start` or once already taken.
    fn take_frame_receiver(&self) -> Option<mpsc::Receiver<PcmFrame>>;

    /// Wall time from tick entry to frame enqueue, refreshed per tick.
    fn capture_latency(&self) -> Duration;

    /// One locked read of everything observers need; callers never compose
    /// multiple stats calls.
    fn snapshot(&self) -> CaptureSnapshot;

    fn reset_stats(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureSnapshot {
    pub frames_produced: u64,
    /// Ring overruns and egress-channel drops combined; the ring's own
    /// overrun count below separates the two causes.
    pub capture_errors: u64,
    pub latency: Duration,
    pub ring_fill_level: f64,
    pub ring_overruns: u64,
    pub ring_underruns: u64,
}

#[derive(Debug, Default)]
struct CaptureStats {
    frames_produced: AtomicU64,
    capture_errors: AtomicU64,
}

/// Deterministic capture adapter: a device clock that produces silence
/// frames of the configured shape. Stands in for a real microphone in the
/// harness and in tests.
pub struct SyntheticCapture {
    config: RwLock<Option<AudioConfig>>,
    ring: RwLock<Option<Arc<FrameRing>>>,
    frame_tx: RwLock<Option<mpsc::Sender<PcmFrame>>>,
    frame_rx: Mutex<Option<mpsc::Receiver<PcmFrame>>>,
    latency: Arc<RwLock<Duration>>,
    stats: Arc<CaptureStats>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self {
            config: RwLock::new(None),
            ring: RwLock::new(None),
            frame_tx: RwLock::new(None),
            frame_rx: Mutex::new(None),
            latency: Arc::new(RwLock::new(Duration::from_millis(20))),
            stats: Arc::new(CaptureStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AudioCapture for SyntheticCapture {
    async fn initialize(&self, config: AudioConfig) -> Result<(), AudioError> {
        if self.config.read().is_some() {
            return Err(AudioError::AlreadyInitialized);
        }
        config.validate()?;

        *self.ring.write() = Some(Arc::new(FrameRing::new(config.buffer_size.max(1))));
        *self.config.write() = Some(config);
        Ok(())
    }

    async fn start(&self) -> Result<(), AudioError> {
        let config = self
            .config
            .read()
            .clone()
            .ok_or(AudioError::NotInitialized)?;
        let ring = self
            .ring
            .read()
            .clone()
            .ok_or(AudioError::NotInitialized)?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyRunning);
        }

        // Fresh egress channel per start so a restart never sees frames
        // from the previous epoch.
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        *self.frame_tx.write() = Some(tx.clone());
        *self.frame_rx.lock() = Some(rx);

        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);
        let latency = Arc::clone(&self.latency);
        let period = config.frame_duration();

        let handle = tokio::spawn(async move {
            tracing::debug!(?period, "capture tick loop started");
            // First tick lands one full period after start, like a device
            // clock.
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let tick_start = Instant::now();
                let frame = PcmFrame::silence(&config, tick_start);
                stats.frames_produced.fetch_add(1, Ordering::Relaxed);

                // Ring and egress are independent paths over the same
                // frames; a full ring must not starve the egress.
                if !ring.try_write(frame.clone()) {
                    stats.capture_errors.fetch_add(1, Ordering::Relaxed);
                }

                match tx.try_send(frame) {
                    Ok(()) => {
                        *latency.write() = tick_start.elapsed();
                    }
                    // Egress full or consumer gone: drop the frame, count
                    // it, keep the device clock running.
                    Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                        stats.capture_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            tracing::debug!("capture tick loop stopped");
        });

        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AudioError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // Drop the lock before awaiting the tick task.
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // Buffers are cleared at stop, recreated at initialize, dropped at
        // close.
        if let Some(ring) = self.ring.read().as_ref() {
            ring.clear();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AudioError> {
        self.stop().await?;
        *self.frame_tx.write() = None;
        *self.frame_rx.lock() = None;
        *self.ring.write() = None;
        *self.config.write() = None;
        Ok(())
    }

    fn take_frame_receiver(&self) -> Option<mpsc::Receiver<PcmFrame>> {
        self.frame_rx.lock().take()
    }

    fn capture_latency(&self) -> Duration {
        *self.latency.read()
    }

    fn snapshot(&self) -> CaptureSnapshot {
        let (fill, overruns, underruns) = match self.ring.read().as_ref() {
            Some(ring) => {
                let stats = ring.stats();
                (ring.fill_level(), stats.overruns, stats.underruns)
            }
            None => (0.0, 0, 0),
        };
        CaptureSnapshot {
            frames_produced: self.stats.frames_produced.load(Ordering::Relaxed),
            capture_errors: self.stats.capture_errors.load(Ordering::Relaxed),
            latency: *self.latency.read(),
            ring_fill_level: fill,
            ring_overruns: overruns,
            ring_underruns: underruns,
        }
    }

    fn reset_stats(&self) {
        self.stats.frames_produced.store(0, Ordering::Relaxed);
        self.stats.capture_errors.store(0, Ordering::Relaxed);
        if let Some(ring) = self.ring.read().as_ref() {
            ring.reset_stats();
        }
    }
}
