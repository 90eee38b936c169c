//! Controller error types

use actor_bridge::BridgeError;
use browser_host::HostError;
use pilot_core_types::RunConfigError;
use pilot_state_center::StoreError;
use site_gate::GateError;
use thiserror::Error;

/// Reasons a start or abort request is refused.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("No run in progress")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] RunConfigError),

    #[error("No allow-listed domain configured")]
    DomainUnset,

    #[error("Safety check failed: {0}")]
    SafetyViolation(#[from] GateError),

    #[error("Browser unavailable: {0}")]
    Host(#[from] HostError),

    #[error("Could not reach the page: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Settings unavailable: {0}")]
    Store(#[from] StoreError),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
