//! Booking pilot
//!
//! Library side of the `bookpilot` binary: configuration, wiring of the
//! controller around a browser, and the CLI commands. Exposed for
//! integration testing.

pub mod cli;
pub mod config;
pub mod pilot;

pub use config::PilotConfig;
pub use pilot::{open_store, Pilot};
