//! Run controller for the booking pilot.
//!
//! Sequences phase A (match and click), the wait for the booking page,
//! phase B (vehicle selection) and phase C (confirmation) across page loads.
//! Failures reload the relevant frame up to a bounded number of times; once
//! that budget is spent the run aborts, and with auto-refresh enabled a new
//! cycle starts after a randomized delay.
//!
//! ```text
//! Idle ─start─▶ AwaitingPhaseA ─ok─▶ AwaitingNavigation ─page─▶ AwaitingPhaseB ─ok─▶ AwaitingPhaseC ─ok─▶ Completed
//!                     │ fail (reload, retry)                          │ fail                  │ fail
//!                     └──────────── retries spent ─▶ Aborted ─auto-refresh─▶ AwaitingRefresh ─timer─▶ AwaitingPhaseA
//! ```

pub mod controller;
pub mod errors;
pub mod policy;
pub mod state;

pub use controller::{ControllerDeps, ControllerHandle, RunController};
pub use errors::{ControllerError, ControllerResult};
pub use policy::{ControllerPolicy, RetryDecision};
pub use state::{ReloadPurpose, RunPhase, RunState, Suspension};
