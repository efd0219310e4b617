use std::time::{Duration, Instant};
use thiserror::Error;

use crate::state::PipelineState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    // Configuration
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("invalid channel count: {0} (must be 1 or 2)")]
    InvalidChannels(u16),

    #[error("invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("invalid target latency: {0:?} (must be 10-500ms)")]
    InvalidTargetLatency(Duration),

    #[error("invalid target alignment: {0:?} (must be 1-200ms)")]
    InvalidTargetAlignment(Duration),

    #[error("invalid watermarks: high {high} must exceed low {low}, both within [0, 1]")]
    InvalidWatermarks { high: f64, low: f64 },

    #[error("invalid CPU load: {0} (must be 0.0-1.0)")]
    InvalidCpuLoad(f64),

    // Lifecycle
    #[error("already initialized")]
    AlreadyInitialized,

    #[error("not initialized")]
    NotInitialized,

    #[error("not running")]
    NotRunning,

    #[error("already running")]
    AlreadyRunning,

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    // Buffering
    #[error("buffer overflow: capacity {capacity} reached")]
    Overflow { capacity: usize },

    #[error("buffer underflow: no frames available")]
    Underflow,

    // Channels
    #[error("{0} channel full, frame dropped")]
    ChannelFull(&'static str),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    // Rate gates
    #[error("cooldown active: retry in {remaining:?}")]
    CooldownActive { remaining: Duration },

    // Shutdown
    #[error("workers did not stop within {0:?}")]
    StopTimeout(Duration),
}

impl AudioError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            AudioError::Overflow { .. }
            | AudioError::Underflow
            | AudioError::ChannelFull(_) => RecoveryStrategy::DropAndCount,
            AudioError::CooldownActive { .. } => RecoveryStrategy::RetryLater,
            AudioError::StopTimeout(_) => RecoveryStrategy::Proceed,
            _ => RecoveryStrategy::Surface,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Drop the offending frame, bump a counter, keep streaming.
    DropAndCount,
    /// The operation is rate-gated; retry after the cooldown expires.
    RetryLater,
    /// Timed out waiting; continue the shutdown path regardless.
    Proceed,
    /// Return to the caller; configuration or state must be reconciled.
    Surface,
}

/// A recorded task error: enough context to diagnose after the fact
/// without holding the original error alive.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub module: String,
    pub operation: String,
    pub context: String,
    pub source: Option<String>,
    pub timestamp: Option<Instant>,
}

impl ErrorInfo {
    pub fn new(
        module: impl Into<String>,
        operation: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            operation: operation.into(),
            context: context.into(),
            source: None,
            timestamp: None,
        }
    }

    pub fn with_source(mut self, source: &AudioError) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(src) => write!(
                f,
                "{}.{}: {} (context: {})",
                self.module, self.operation, src, self.context
            ),
            None => write!(
                f,
                "{}.{} failed (context: {})",
                self.module, self.operation, self.context
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_info_display_with_source() {
        let info = ErrorInfo::new("Playback", "WriteFrame", "forwarding captured frame")
            .with_source(&AudioError::Overflow { capacity: 4 });
        let rendered = info.to_string();
        assert!(rendered.contains("Playback.WriteFrame"));
        assert!(rendered.contains("capacity 4"));
    }

    #[test]
    fn buffering_errors_are_droppable() {
        assert_eq!(
            AudioError::Underflow.recovery_strategy(),
            RecoveryStrategy::DropAndCount
        );
        assert_eq!(
            AudioError::ChannelFull("egress").recovery_strategy(),
            RecoveryStrategy::DropAndCount
        );
        assert_eq!(
            AudioError::NotInitialized.recovery_strategy(),
            RecoveryStrategy::Surface
        );
    }
}
