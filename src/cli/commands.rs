use clap::Subcommand;

use super::config::ConfigArgs;
use super::gate::GateArgs;
use super::logs::LogsArgs;
use super::rehearse::RehearseArgs;
use super::reset::ResetArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the booking automation against a scripted site
    Rehearse(RehearseArgs),

    /// Evaluate the safety gate for a frame address
    Gate(GateArgs),

    /// Show the persisted run log
    Logs(LogsArgs),

    /// Inspect configuration and stored settings
    Config(ConfigArgs),

    /// Clear a stuck in-progress flag
    Reset(ResetArgs),
}
