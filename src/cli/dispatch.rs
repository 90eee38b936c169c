use super::config::cmd_config;
use super::env::CliArgs;
use super::gate::cmd_gate;
use super::logs::cmd_logs;
use super::rehearse::cmd_rehearse;
use super::reset::cmd_reset;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Rehearse(args) => cmd_rehearse(args, ctx).await,
        Commands::Gate(args) => cmd_gate(args, ctx).await,
        Commands::Logs(args) => cmd_logs(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
        Commands::Reset(args) => cmd_reset(args, ctx).await,
    }
}
