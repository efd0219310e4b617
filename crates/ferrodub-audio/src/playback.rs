use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::frame::{AudioConfig, PcmFrame};
use crate::ring::FrameRing;
use ferrodub_foundation::AudioError;

/// Jitter window the playback ring is sized for.
const JITTER_WINDOW_MIN: Duration = Duration::from_millis(40);
const JITTER_WINDOW_MAX: Duration = Duration::from_millis(80);
/// Floor for `adjust_buffer_size`; anything smaller cannot absorb producer
/// timing variance at all.
const MIN_JITTER_FRAMES: usize = 2;

/// Device-side consumer of PCM frames. The upstream producer pushes into
/// the jitter ring via `write_frame`; the adapter drains at the device
/// clock rate and substitutes silence on underrun.
#[async_trait]
pub trait AudioPlayback: Send + Sync {
    async fn initialize(&self, config: AudioConfig) -> Result<(), AudioError>;
    async fn start(&self) -> Result<(), AudioError>;
    /// Idempotent.
    async fn stop(&self) -> Result<(), AudioError>;
    async fn close(&self) -> Result<(), AudioError>;

    fn write_frame(&self, frame: PcmFrame) -> Result<(), AudioError>;

    /// Wall time from tick entry to device submission, refreshed per tick.
    fn playback_latency(&self) -> Duration;

    fn buffer_fill_level(&self) -> f64;

    /// Re-sizes the jitter ring for the given target latency, keeping
    /// buffered audio. Minimum two frames.
    fn adjust_buffer_size(&self, target_latency: Duration) -> Result<(), AudioError>;

    fn snapshot(&self) -> PlaybackSnapshot;

    fn reset_stats(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackSnapshot {
    pub latency: Duration,
    pub buffer_fill_level: f64,
    pub buffer_capacity: usize,
    pub frames_played: u64,
    pub silence_frames: u64,
    pub playback_errors: u64,
    pub underruns: u64,
    pub ring_overruns: u64,
    pub ring_underruns: u64,
}

#[derive(Debug, Default)]
struct PlaybackStats {
    frames_played: AtomicU64,
    silence_frames: AtomicU64,
    playback_errors: AtomicU64,
    underruns: AtomicU64,
}

/// Deterministic sink adapter: drains the jitter ring at the device clock
/// rate and discards the audio, counting what a real device would have
/// played. Stands in for a speaker in the harness and in tests.
pub struct NullPlayback {
    config: RwLock<Option<AudioConfig>>,
    ring: RwLock<Option<Arc<FrameRing>>>,
    latency: Arc<RwLock<Duration>>,
    fill_level: Arc<RwLock<f64>>,
    stats: Arc<PlaybackStats>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for NullPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl NullPlayback {
    pub fn new() -> Self {
        Self {
            config: RwLock::new(None),
            ring: RwLock::new(None),
            latency: Arc::new(RwLock::new(Duration::from_millis(30))),
            fill_level: Arc::new(RwLock::new(0.0)),
            stats: Arc::new(PlaybackStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Effective jitter capacity in frames: the requested size clamped to
    /// the 40-80ms window, or the window midpoint when unspecified.
    fn jitter_capacity(config: &AudioConfig) -> usize {
        let frame_duration = config.frame_duration().as_secs_f64();
        let min_cap = (JITTER_WINDOW_MIN.as_secs_f64() / frame_duration).ceil() as usize;
        let max_cap = ((JITTER_WINDOW_MAX.as_secs_f64() / frame_duration).floor() as usize)
            .max(min_cap);

        let capacity = if config.buffer_size > 0 {
            config.buffer_size.clamp(min_cap, max_cap)
        } else {
            (min_cap + max_cap) / 2
        };
        capacity.max(1)
    }
}

#[async_trait]
impl AudioPlayback for NullPlayback {
    async fn initialize(&self, config: AudioConfig) -> Result<(), AudioError> {
        if self.config.read().is_some() {
            return Err(AudioError::AlreadyInitialized);
        }
        config.validate()?;

        let capacity = Self::jitter_capacity(&config);
        tracing::debug!(capacity, "jitter buffer sized");
        *self.ring.write() = Some(Arc::new(FrameRing::new(capacity)));
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

        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);
        let latency = Arc::clone(&self.latency);
        let fill_level = Arc::clone(&self.fill_level);
        let period = config.frame_duration();

        let handle = tokio::spawn(async move {
            tracing::debug!(?period, "playback drain loop started");
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
                match ring.try_read() {
                    Some(_frame) => {
                        // A real adapter submits to the device here.
                        stats.frames_played.fetch_add(1, Ordering::Relaxed);
                        *latency.write() = tick_start.elapsed();
                    }
                    None => {
                        // Underrun: silence is always a valid fallback.
                        stats.underruns.fetch_add(1, Ordering::Relaxed);
                        stats.silence_frames.fetch_add(1, Ordering::Relaxed);
                    }
                }
                *fill_level.write() = ring.fill_level();
            }
            tracing::debug!("playback drain loop stopped");
        });

        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AudioError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // Drop the lock before awaiting the drain task.
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Some(ring) = self.ring.read().as_ref() {
            ring.clear();
        }
        *self.fill_level.write() = 0.0;
        Ok(())
    }

    async fn close(&self) -> Result<(), AudioError> {
        self.stop().await?;
        *self.ring.write() = None;
        *self.config.write() = None;
        Ok(())
    }

    fn write_frame(&self, frame: PcmFrame) -> Result<(), AudioError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(AudioError::NotRunning);
        }
        let ring = self
            .ring
            .read()
            .clone()
            .ok_or(AudioError::NotInitialized)?;

        if let Err(err) = ring.write(frame) {
            self.stats.playback_errors.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }
        *self.fill_level.write() = ring.fill_level();
        Ok(())
    }

    fn playback_latency(&self) -> Duration {
        *self.latency.read()
    }

    fn buffer_fill_level(&self) -> f64 {
        *self.fill_level.read()
    }

    fn adjust_buffer_size(&self, target_latency: Duration) -> Result<(), AudioError> {
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

        let frame_duration = config.frame_duration().as_secs_f64();
        let new_capacity =
            ((target_latency.as_secs_f64() / frame_duration) as usize).max(MIN_JITTER_FRAMES);
        tracing::debug!(?target_latency, new_capacity, "jitter buffer resized");
        ring.resize(new_capacity);
        *self.fill_level.write() = ring.fill_level();
        Ok(())
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        let (fill, capacity, ring_stats) = match self.ring.read().as_ref() {
            Some(ring) => (ring.fill_level(), ring.capacity(), ring.stats()),
            None => (0.0, 0, Default::default()),
        };
        PlaybackSnapshot {
            latency: *self.latency.read(),
            buffer_fill_level: fill,
            buffer_capacity: capacity,
            frames_played: self.stats.frames_played.load(Ordering::Relaxed),
            silence_frames: self.stats.silence_frames.load(Ordering::Relaxed),
            playback_errors: self.stats.playback_errors.load(Ordering::Relaxed),
            underruns: self.stats.underruns.load(Ordering::Relaxed),
            ring_overruns: ring_stats.overruns,
            ring_underruns: ring_stats.underruns,
        }
    }

    fn reset_stats(&self) {
        self.stats.frames_played.store(0, Ordering::Relaxed);
        self.stats.silence_frames.store(0, Ordering::Relaxed);
        self.stats.playback_errors.store(0, Ordering::Relaxed);
        self.stats.underruns.store(0, Ordering::Relaxed);
        if let Some(ring) = self.ring.read().as_ref() {
            ring.reset_stats();
        }
    }
}
