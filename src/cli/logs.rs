use anyhow::{Context, Result};
use clap::Args;
use pilot_core_types::LogLevel;

use crate::cli::context::CliContext;
use crate::cli::output::{emit, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct LogsArgs {
    /// Only show the most recent N entries
    #[arg(short = 'n', long)]
    pub tail: Option<usize>,

    /// Delete the stored history instead of printing it
    #[arg(long)]
    pub clear: bool,
}

pub async fn cmd_logs(args: LogsArgs, ctx: &CliContext) -> Result<()> {
    let store = ctx.store()?;
    if args.clear {
        store
            .set_log_history(&[])
            .context("Failed to clear log history")?;
        if ctx.output() == OutputFormat::Human {
            println!("Log history cleared");
        }
        return Ok(());
    }

    let mut entries = store.log_history().context("Failed to read log history")?;
    if let Some(tail) = args.tail {
        let skip = entries.len().saturating_sub(tail);
        entries.drain(..skip);
    }

    emit(ctx.output(), &entries, || {
        if entries.is_empty() {
            return "No log entries".to_string();
        }
        entries
            .iter()
            .map(|entry| {
                let marker = match entry.level {
                    LogLevel::Info => ' ',
                    LogLevel::Error => '!',
                    LogLevel::Success => '+',
                };
                format!(
                    "{} {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    marker,
                    entry.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}
