//! Wire envelopes exchanged between the UI, the controller and page actors.

use pilot_core_types::{LogEntry, Phase, PhaseResult, RunConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Commands submitted by the UI surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UiCommand {
    Start { config: RunConfig },
    Abort,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorAction {
    #[serde(rename = "runPhase")]
    RunPhase,
}

/// Command sent by the controller to the actor of one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseCommand {
    pub action: ActorAction,
    pub phase: Phase,
    pub params: RunConfig,
}

impl PhaseCommand {
    pub fn run(phase: Phase, config: RunConfig) -> Self {
        Self {
            action: ActorAction::RunPhase,
            phase,
            params: config,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Synchronous answer to a [`UiCommand`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            message: None,
        }
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

impl From<PhaseResult> for CommandResponse {
    fn from(result: PhaseResult) -> Self {
        if result.is_success() {
            Self::success_with(result.message)
        } else {
            Self::error(result.message)
        }
    }
}

/// Fire-and-forget events pushed to the UI surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiEvent {
    Log(LogEntry),
    RunFinished { message: String },
    RunAborted { reason: String },
    /// Fatal outcome that should get the user's attention.
    Alert { text: String },
}

pub type UiEventBus = broadcast::Sender<UiEvent>;

pub fn ui_event_bus(capacity: usize) -> (UiEventBus, broadcast::Receiver<UiEvent>) {
    broadcast::channel(capacity.max(1))
}

/// Publish without caring whether a UI is listening.
pub fn publish(bus: &UiEventBus, event: UiEvent) {
    let _ = bus.send(event);
}
