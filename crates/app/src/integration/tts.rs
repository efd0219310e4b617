use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use ferrodub_audio::PcmFrame;
use ferrodub_foundation::AudioError;

const TEXT_CHANNEL_CAPACITY: usize = 5;
const FRAME_CHANNEL_CAPACITY: usize = 10;

/// Synthesis hints accompanying a text request. Advisory for now; the
/// channel carries only the text until the TTS wire format grows a
/// metadata side-band.
#[derive(Debug, Clone, Default)]
pub struct TtsMetadata {
    /// BCP 47 tag, e.g. "en-US".
    pub language: String,
    pub voice_id: String,
    pub speaker_embedding: Vec<f32>,
    pub prosody: ProsodyHints,
}

#[derive(Debug, Clone)]
pub struct ProsodyHints {
    /// 0.8 speaks faster, 1.2 slower.
    pub relative_duration: f64,
    /// 0 none, 1 moderate, 2 strong.
    pub emphasis_level: u8,
    pub pause_after: Duration,
}

impl Default for ProsodyHints {
    fn default() -> Self {
        Self {
            relative_duration: 1.0,
            emphasis_level: 0,
            pause_after: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtsLinkStats {
    pub texts_sent: u64,
    pub frames_received: u64,
}

/// Channel link between the coordinator and an external speech-synthesis
/// module: text goes in through the bounded text channel, synthesized PCM
/// frames come back through the frame channel and the coordinator feeds
/// them into playback. Both directions are non-blocking and drop when full.
pub struct TtsLink {
    text_tx: RwLock<Option<mpsc::Sender<String>>>,
    text_rx: Mutex<Option<mpsc::Receiver<String>>>,
    frame_tx: RwLock<Option<mpsc::Sender<PcmFrame>>>,
    frame_rx: Mutex<Option<mpsc::Receiver<PcmFrame>>>,
    latency: RwLock<Duration>,
    running: AtomicBool,
    texts_sent: AtomicU64,
    frames_received: AtomicU64,
}

impl Default for TtsLink {
    fn default() -> Self {
        Self::new()
    }
}

impl TtsLink {
    pub fn new() -> Self {
        let (text_tx, text_rx) = mpsc::channel(TEXT_CHANNEL_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            text_tx: RwLock::new(Some(text_tx)),
            text_rx: Mutex::new(Some(text_rx)),
            frame_tx: RwLock::new(Some(frame_tx)),
            frame_rx: Mutex::new(Some(frame_rx)),
            latency: RwLock::new(Duration::from_millis(200)),
            running: AtomicBool::new(false),
            texts_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
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

    /// Queues text for synthesis. Never blocks; a full channel rejects the
    /// request.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), AudioError> {
        if !self.is_running() {
            return Err(AudioError::NotRunning);
        }
        let tx = self
            .text_tx
            .read()
            .clone()
            .ok_or(AudioError::ChannelClosed("tts text"))?;

        match tx.try_send(text.into()) {
            Ok(()) => {
                self.texts_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(AudioError::ChannelFull("tts text")),
            Err(TrySendError::Closed(_)) => Err(AudioError::ChannelClosed("tts text")),
        }
    }

    pub fn send_text_with_metadata(
        &self,
        text: impl Into<String>,
        _metadata: TtsMetadata,
    ) -> Result<(), AudioError> {
        self.send_text(text)
    }

    /// Used by the TTS module to publish a synthesized frame.
    pub fn send_frame(&self, frame: PcmFrame) -> Result<(), AudioError> {
        let tx = self
            .frame_tx
            .read()
            .clone()
            .ok_or(AudioError::ChannelClosed("tts frame"))?;

        match tx.try_send(frame) {
            Ok(()) => {
                self.frames_received.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(AudioError::ChannelFull("tts frame")),
            Err(TrySendError::Closed(_)) => Err(AudioError::ChannelClosed("tts frame")),
        }
    }

    /// Consumed by the TTS module: the stream of synthesis requests.
    pub fn take_text_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.text_rx.lock().take()
    }

    /// Consumed by the coordinator: synthesized frames bound for playback.
    pub fn take_frame_receiver(&self) -> Option<mpsc::Receiver<PcmFrame>> {
        self.frame_rx.lock().take()
    }

    pub fn latency(&self) -> Duration {
        *self.latency.read()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    pub fn stats(&self) -> TtsLinkStats {
        TtsLinkStats {
            texts_sent: self.texts_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.texts_sent.store(0, Ordering::Relaxed);
        self.frames_received.store(0, Ordering::Relaxed);
    }

    pub fn close(&self) -> Result<(), AudioError> {
        self.stop()?;
        *self.text_tx.write() = None;
        *self.frame_tx.write() = None;
        *self.text_rx.lock() = None;
        *self.frame_rx.lock() = None;
        Ok(())
    }
}
