use ferrodub_foundation::AudioError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A single quantum of audio moving through the pipeline: interleaved
/// signed 16-bit PCM, produced by capture and consumed exactly once by
/// playback.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: Instant,
    pub duration: Duration,
    /// Advisory VAD flag, opaque to the transport.
    pub is_speech: bool,
}

impl PcmFrame {
    /// A frame of silence with the shape the config dictates.
    pub fn silence(config: &AudioConfig, timestamp: Instant) -> Self {
        Self {
            samples: vec![0i16; config.samples_per_frame()],
            sample_rate: config.sample_rate,
            channels: config.channels,
            timestamp,
            duration: config.frame_duration(),
            is_speech: false,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Audio path configuration, immutable after `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Opaque device identifier; empty selects the platform default.
    pub device_id: String,
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// 1 (mono) or 2 (stereo, interleaved).
    pub channels: u16,
    /// Samples per channel per frame.
    pub frame_size: usize,
    /// Requested jitter capacity in frames; playback clamps it to the
    /// 40-80ms window.
    pub buffer_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            sample_rate: 16_000,
            channels: 1,
            frame_size: 320,
            buffer_size: 10,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidSampleRate(self.sample_rate));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(AudioError::InvalidChannels(self.channels));
        }
        if self.frame_size == 0 {
            return Err(AudioError::InvalidFrameSize(self.frame_size));
        }
        Ok(())
    }

    /// Tick period of the capture and playback device clocks.
    pub fn frame_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::from_millis(20);
        }
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }

    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }
}
