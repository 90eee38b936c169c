//! Run state owned by the controller task.

use pilot_core_types::{FrameId, Phase, RunConfig, RunId};
use serde::Serialize;

/// Where the run currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunPhase {
    Idle,
    AwaitingPhaseA,
    AwaitingNavigation,
    AwaitingPhaseB,
    AwaitingPhaseC,
    Completed,
    Aborted,
    /// Fatal failure with auto-refresh on: waiting for the next refresh cycle.
    AwaitingRefresh,
}

impl RunPhase {
    /// The awaiting state that runs `phase`.
    pub fn awaiting(phase: Phase) -> Self {
        match phase {
            Phase::A => RunPhase::AwaitingPhaseA,
            Phase::B => RunPhase::AwaitingPhaseB,
            Phase::C => RunPhase::AwaitingPhaseC,
        }
    }
}

/// Why a reload was issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReloadPurpose {
    Retry(Phase),
    Refresh,
}

/// The single thing an active run is waiting on. Every event that does not
/// answer the current suspension is discarded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Suspension {
    Actor { phase: Phase, frame: FrameId },
    Reload { frame: FrameId, purpose: ReloadPurpose },
    Navigation,
    RefreshTimer,
}

/// Snapshot of the controller's state.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: Option<RunId>,
    pub phase: RunPhase,
    /// Frame the next phase runs in. Changes after the booking page opens.
    pub target_frame: Option<FrameId>,
    /// Frame the run started in; phase A retries and refreshes happen here.
    pub base_frame: Option<FrameId>,
    /// Address the run started on. The base frame is brought back to it
    /// before phase A runs again.
    pub start_url: Option<String>,
    pub retry_count: u32,
    pub config: Option<RunConfig>,
    pub in_progress: bool,
    pub suspension: Option<Suspension>,
    /// A timer (navigation timeout or refresh) is armed.
    pub timer_armed: bool,
}

impl RunState {
    pub fn idle() -> Self {
        Self {
            run_id: None,
            phase: RunPhase::Idle,
            target_frame: None,
            base_frame: None,
            start_url: None,
            retry_count: 0,
            config: None,
            in_progress: false,
            suspension: None,
            timer_armed: false,
        }
    }

    /// True when an event tagged with `run` belongs to the live run.
    pub fn accepts(&self, run: RunId) -> bool {
        self.in_progress && self.run_id == Some(run)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::idle()
    }
}
