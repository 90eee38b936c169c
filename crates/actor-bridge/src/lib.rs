//! Transport between the run controller and the page actors.
//!
//! An actor lives inside one document. Establishing it opens a channel stamped
//! with the document generation; any navigation or reload replaces the
//! document, so the next invoke on that channel fails with
//! [`BridgeError::ChannelClosed`] until the controller re-establishes it.

pub mod protocol;

pub use protocol::{
    publish, ui_event_bus, ActorAction, CommandResponse, PhaseCommand, ResponseStatus, UiCommand,
    UiEvent, UiEventBus,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use page_actor::{ActorTiming, BookingActor, PageDom};
use pilot_core_types::{FrameId, Phase, PhaseResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Logical channel identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors surfaced by the bridge.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("no actor established in frame {0}")]
    NotEstablished(FrameId),
    #[error("frame {0} navigated away; actor must be re-established")]
    ChannelClosed(FrameId),
    #[error("frame {0} is unavailable")]
    FrameUnavailable(FrameId),
    #[error("actor did not answer within {0}ms")]
    Timeout(u64),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Document currently loaded in a frame.
#[derive(Clone)]
pub struct DocumentHandle {
    /// Bumped by the host on every load of the frame.
    pub generation: u64,
    pub dom: Arc<dyn PageDom>,
}

/// Host-side lookup from frame to its live document.
pub trait DomProvider: Send + Sync {
    fn document(&self, frame: &FrameId) -> Option<DocumentHandle>;
}

/// Events emitted by the bridge to observers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BridgeEvent {
    ChannelOpen {
        frame: FrameId,
        channel: ChannelId,
    },
    ChannelClosed {
        frame: FrameId,
        channel: ChannelId,
    },
    InvokeOk {
        frame: FrameId,
        phase: Phase,
    },
    InvokeFail {
        frame: FrameId,
        phase: Phase,
        error: String,
    },
}

#[async_trait]
pub trait ActorBridge: Send + Sync {
    /// Set up the actor in `frame`'s current document.
    async fn establish(&self, frame: &FrameId) -> Result<ChannelId, BridgeError>;

    /// Run one phase in `frame`. Phase-level failures come back as
    /// `Ok(PhaseResult)` with an error status; `Err` means the message could
    /// not be delivered or answered.
    async fn invoke(
        &self,
        frame: &FrameId,
        command: PhaseCommand,
    ) -> Result<PhaseResult, BridgeError>;

    fn detach(&self, frame: &FrameId);
}

#[derive(Clone, Debug)]
struct ChannelState {
    channel: ChannelId,
    generation: u64,
}

/// Bridge running actors in-process against documents exposed by a
/// [`DomProvider`].
pub struct InProcessBridge {
    provider: Arc<dyn DomProvider>,
    timing: ActorTiming,
    deadline: Duration,
    channels: DashMap<FrameId, ChannelState>,
    events: broadcast::Sender<BridgeEvent>,
}

impl InProcessBridge {
    pub fn new(provider: Arc<dyn DomProvider>, timing: ActorTiming, deadline: Duration) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(64);
        Arc::new(Self {
            provider,
            timing,
            deadline,
            channels: DashMap::new(),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub fn is_established(&self, frame: &FrameId) -> bool {
        self.channels.contains_key(frame)
    }

    fn close(&self, frame: &FrameId) {
        if let Some((frame, state)) = self.channels.remove(frame) {
            let _ = self.events.send(BridgeEvent::ChannelClosed {
                frame,
                channel: state.channel,
            });
        }
    }
}

#[async_trait]
impl ActorBridge for InProcessBridge {
    async fn establish(&self, frame: &FrameId) -> Result<ChannelId, BridgeError> {
        let document = self
            .provider
            .document(frame)
            .ok_or_else(|| BridgeError::FrameUnavailable(frame.clone()))?;

        self.close(frame);
        let channel = ChannelId::new();
        self.channels.insert(
            frame.clone(),
            ChannelState {
                channel,
                generation: document.generation,
            },
        );
        debug!(%frame, generation = document.generation, "actor established");
        let _ = self.events.send(BridgeEvent::ChannelOpen {
            frame: frame.clone(),
            channel,
        });
        Ok(channel)
    }

    async fn invoke(
        &self,
        frame: &FrameId,
        command: PhaseCommand,
    ) -> Result<PhaseResult, BridgeError> {
        let generation = self
            .channels
            .get(frame)
            .map(|entry| entry.value().generation)
            .ok_or_else(|| BridgeError::NotEstablished(frame.clone()))?;

        let Some(document) = self.provider.document(frame) else {
            self.close(frame);
            return Err(BridgeError::FrameUnavailable(frame.clone()));
        };
        if document.generation != generation {
            self.close(frame);
            return Err(BridgeError::ChannelClosed(frame.clone()));
        }

        let phase = command.phase;
        let actor = BookingActor::new(document.dom, self.timing);
        let result = timeout(self.deadline, actor.run_phase(phase, &command.params))
            .await
            .map_err(|_| BridgeError::Timeout(self.deadline.as_millis() as u64));

        let event = match &result {
            Ok(outcome) if outcome.is_success() => BridgeEvent::InvokeOk {
                frame: frame.clone(),
                phase,
            },
            Ok(outcome) => BridgeEvent::InvokeFail {
                frame: frame.clone(),
                phase,
                error: outcome.message.clone(),
            },
            Err(err) => {
                warn!(%frame, %phase, %err, "actor invoke failed");
                BridgeEvent::InvokeFail {
                    frame: frame.clone(),
                    phase,
                    error: err.to_string(),
                }
            }
        };
        let _ = self.events.send(event);
        result
    }

    fn detach(&self, frame: &FrameId) {
        self.close(frame);
    }
}
