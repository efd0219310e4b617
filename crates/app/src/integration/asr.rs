use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use ferrodub_audio::PcmFrame;
use ferrodub_foundation::AudioError;

const FRAME_CHANNEL_CAPACITY: usize = 10;
const RESULT_CHANNEL_CAPACITY: usize = 5;

/// A recognition hypothesis coming back from the ASR module.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    pub text: String,
    pub confidence: f64,
    pub timestamp: Instant,
    pub is_final: bool,
    /// BCP 47 tag, e.g. "pt-BR".
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsrLinkStats {
    pub frames_sent: u64,
    pub results_received: u64,
}

/// Channel link between the coordinator and an external speech-recognition
/// module: captured frames fan out through the bounded frame channel, and
/// hypotheses come back through the result channel. Both directions are
/// non-blocking and drop when full.
pub struct AsrLink {
    frame_tx: RwLock<Option<mpsc::Sender<PcmFrame>>>,
    frame_rx: Mutex<Option<mpsc::Receiver<PcmFrame>>>,
    result_tx: RwLock<Option<mpsc::Sender<RecognitionResult>>>,
    result_rx: Mutex<Option<mpsc::Receiver<RecognitionResult>>>,
    latency: RwLock<Duration>,
    running: AtomicBool,
    frames_sent: AtomicU64,
    results_received: AtomicU64,
}

impl Default for AsrLink {
    fn default() -> Self {
        Self::new()
    }
}

impl AsrLink {
    pub fn new() -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        Self {
            frame_tx: RwLock::new(Some(frame_tx)),
            frame_rx: Mutex::new(Some(frame_rx)),
            result_tx: RwLock::new(Some(result_tx)),
            result_rx: Mutex::new(Some(result_rx)),
            latency: RwLock::new(Duration::from_millis(200)),
            running: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
            results_received: AtomicU64::new(0),
        }
    }

    pub fn start(&self) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyRunning);
        }
        Ok(())
    }

    /// Idempotent.
    pub fn stop(&self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Fans one captured frame out to the ASR module. Never blocks; a full
    /// channel drops the frame.
    pub fn send_frame(&self, frame: PcmFrame) -> Result<(), AudioError> {
        if !self.is_running() {
            return Err(AudioError::NotRunning);
        }
        let tx = self
            .frame_tx
            .read()
            .clone()
            .ok_or(AudioError::ChannelClosed("asr frame"))?;

        match tx.try_send(frame) {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(AudioError::ChannelFull("asr frame")),
            Err(TrySendError::Closed(_)) => Err(AudioError::ChannelClosed("asr frame")),
        }
    }

    /// Used by the ASR module to publish a hypothesis.
    pub fn send_result(&self, result: RecognitionResult) -> Result<(), AudioError> {
        let tx = self
            .result_tx
            .read()
            .clone()
            .ok_or(AudioError::ChannelClosed("asr result"))?;

        match tx.try_send(result) {
            Ok(()) => {
                self.results_received.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(AudioError::ChannelFull("asr result")),
            Err(TrySendError::Closed(_)) => Err(AudioError::ChannelClosed("asr result")),
        }
    }

    /// Consumed by the ASR module: the stream of captured frames.
    pub fn take_frame_receiver(&self) -> Option<mpsc::Receiver<PcmFrame>> {
        self.frame_rx.lock().take()
    }

    /// Consumed by the pipeline owner: the stream of hypotheses.
    pub fn take_result_receiver(&self) -> Option<mpsc::Receiver<RecognitionResult>> {
        self.result_rx.lock().take()
    }

    pub fn latency(&self) -> Duration {
        *self.latency.read()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    pub fn stats(&self) -> AsrLinkStats {
        AsrLinkStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            results_received: self.results_received.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.results_received.store(0, Ordering::Relaxed);
    }

    pub fn close(&self) -> Result<(), AudioError> {
        self.stop()?;
        *self.frame_tx.write() = None;
        *self.result_tx.write() = None;
        *self.frame_rx.lock() = None;
        *self.result_rx.lock() = None;
        Ok(())
    }
}
