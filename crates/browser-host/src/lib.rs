//! Browser-side port used by the run controller.
//!
//! The controller never talks to a browser directly; it asks a [`BrowserPort`]
//! for frame addresses, reloads or navigates frames, and listens to [`FrameEvent`]s. The
//! [`ScriptedBrowser`] implements the port in memory from page fixtures and is
//! what rehearsals and tests run against.

pub mod fixture;
pub mod scripted;

pub use fixture::{
    BookingFixture, ConfirmationFixture, FixtureError, PageFixture, ScenarioFixture,
};
pub use scripted::{HostAction, ScriptedBrowser, ScriptedPage};

use async_trait::async_trait;
use pilot_core_types::FrameId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Frame lifecycle notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameEvent {
    /// A document finished loading in `frame` (navigation, reload or new tab).
    NavigationComplete { frame: FrameId, url: String },
    /// The tab hosting `frame` was closed.
    Closed { frame: FrameId },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("frame {0} not found")]
    FrameNotFound(FrameId),
    #[error("no active frame")]
    NoActiveFrame,
}

#[async_trait]
pub trait BrowserPort: Send + Sync {
    async fn active_frame(&self) -> Result<FrameId, HostError>;

    async fn frame_url(&self, frame: &FrameId) -> Result<String, HostError>;

    /// Reload `frame` and resolve once the new document has loaded.
    async fn reload(&self, frame: &FrameId) -> Result<(), HostError>;

    /// Load `url` into `frame` and resolve once it has loaded.
    async fn navigate(&self, frame: &FrameId, url: &str) -> Result<(), HostError>;

    fn subscribe(&self) -> broadcast::Receiver<FrameEvent>;
}
