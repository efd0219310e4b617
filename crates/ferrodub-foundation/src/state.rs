use crate::error::AudioError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Coordinator lifecycle. Capture and playback adapters mirror the
/// initialized/running subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Initialized,
    Running,
    Stopped,
    Closed,
}

pub struct PipelineStateMachine {
    state: Arc<RwLock<PipelineState>>,
    state_tx: Sender<PipelineState>,
    state_rx: Receiver<PipelineState>,
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStateMachine {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(PipelineState::Created)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, next: PipelineState) -> Result<(), AudioError> {
        use PipelineState::*;

        let mut current = self.state.write();
        let valid = matches!(
            (*current, next),
            (Created, Initialized)
                | (Initialized, Running)
                | (Running, Stopped)
                | (Stopped, Running)
                | (Created, Closed)
                | (Initialized, Closed)
                | (Stopped, Closed)
        );

        if !valid {
            return Err(AudioError::InvalidTransition {
                from: *current,
                to: next,
            });
        }

        tracing::info!("Pipeline state: {:?} -> {:?}", *current, next);
        *current = next;
        let _ = self.state_tx.send(next);
        Ok(())
    }

    pub fn current(&self) -> PipelineState {
        *self.state.read()
    }

    pub fn is(&self, state: PipelineState) -> bool {
        *self.state.read() == state
    }

    pub fn subscribe(&self) -> Receiver<PipelineState> {
        self.state_rx.clone()
    }
}
