//! Progress reporting for a single orchestrated operation
//!
//! Each operation walks `Idle -> PreparingOperation -> AwaitingSignature ->
//! Submitting -> Confirming -> Succeeded`, or drops to `Failed` from any
//! non-terminal step. [`ProgressTracker`] owns the current step, refuses
//! skips and backward moves, and reports every transition to a
//! [`StatusObserver`].

use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Step of an orchestrated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStep {
    Idle,
    PreparingOperation,
    AwaitingSignature,
    Submitting,
    Confirming,
    Succeeded,
    Failed,
}

impl OperationStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Step that follows on the success path
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::PreparingOperation),
            Self::PreparingOperation => Some(Self::AwaitingSignature),
            Self::AwaitingSignature => Some(Self::Submitting),
            Self::Submitting => Some(Self::Confirming),
            Self::Confirming => Some(Self::Succeeded),
            Self::Succeeded | Self::Failed => None,
        }
    }

    pub fn can_transition_to(&self, target: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == Self::Failed || self.next() == Some(target)
    }
}

/// Notification delivered on every step transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Operation the update belongs to
    pub operation_id: Uuid,
    /// Step just entered
    pub step: OperationStep,
    /// Human readable progress text
    pub message: String,
}

/// Receiver of progress notifications
pub trait StatusObserver: Send + Sync {
    fn on_status(&self, update: &StatusUpdate);
}

impl<F> StatusObserver for F
where
    F: Fn(&StatusUpdate) + Send + Sync,
{
    fn on_status(&self, update: &StatusUpdate) {
        self(update)
    }
}

/// Forwards updates into a channel; a closed receiver is ignored
pub struct ChannelObserver(pub mpsc::UnboundedSender<StatusUpdate>);

impl StatusObserver for ChannelObserver {
    fn on_status(&self, update: &StatusUpdate) {
        let _ = self.0.send(update.clone());
    }
}

/// Discards updates
pub struct NoopObserver;

impl StatusObserver for NoopObserver {
    fn on_status(&self, _update: &StatusUpdate) {}
}

/// Drives the step machine of one operation
pub struct ProgressTracker<'a> {
    operation_id: Uuid,
    step: OperationStep,
    observer: &'a dyn StatusObserver,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(observer: &'a dyn StatusObserver) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            step: OperationStep::Idle,
            observer,
        }
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    pub fn step(&self) -> OperationStep {
        self.step
    }

    /// Move to `step` and notify the observer
    pub fn advance(
        &mut self,
        step: OperationStep,
        message: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        if !self.step.can_transition_to(step) {
            return Err(OrchestratorError::invalid_request(format!(
                "Invalid progress transition {:?} -> {:?}",
                self.step, step
            )));
        }
        self.step = step;
        let update = StatusUpdate {
            operation_id: self.operation_id,
            step,
            message: message.into(),
        };
        debug!("Operation {}: {:?} - {}", self.operation_id, step, update.message);
        self.observer.on_status(&update);
        Ok(())
    }

    /// Move to `Failed` unless already terminal
    pub fn fail(&mut self, message: impl Into<String>) {
        if !self.step.is_terminal() {
            let _ = self.advance(OperationStep::Failed, message);
        }
    }
}
