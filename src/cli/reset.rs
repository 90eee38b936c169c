use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::cli::context::CliContext;
use crate::cli::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct ResetArgs {
    /// Also delete the stored log history
    #[arg(long)]
    pub logs: bool,
}

pub async fn cmd_reset(args: ResetArgs, ctx: &CliContext) -> Result<()> {
    let store = ctx.store()?;
    let was_running = store
        .run_in_progress()
        .context("Failed to read run flag")?;
    store
        .set_run_in_progress(false)
        .context("Failed to clear run flag")?;
    if args.logs {
        store
            .set_log_history(&[])
            .context("Failed to clear log history")?;
    }
    info!(was_running, logs = args.logs, "stored run state reset");

    if ctx.output() == OutputFormat::Human {
        if was_running {
            println!("Cleared a stale in-progress flag");
        } else {
            println!("No run was marked in progress");
        }
    }
    Ok(())
}
