use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actor_bridge::UiEvent;
use anyhow::{bail, Context, Result};
use browser_host::{ScenarioFixture, ScriptedBrowser};
use chrono::NaiveDate;
use clap::Args;
use pilot_core_types::{LogLevel, RunConfig};
use run_controller::ControllerHandle;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::cli::context::CliContext;
use crate::cli::output::{emit, OutputFormat};
use crate::pilot::Pilot;

#[derive(Args, Clone, Debug)]
pub struct RehearseArgs {
    /// Scenario file (YAML or JSON) describing the booking site
    #[arg(short, long, value_name = "FILE")]
    pub scenario: PathBuf,

    /// Booking date (YYYY-MM-DD); saved form defaults are used when absent
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Last acceptable date, making the search a range
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Days of slack around a single date
    #[arg(long)]
    pub tolerance: Option<u32>,

    /// Accepted vehicle class (repeatable)
    #[arg(long = "class", value_name = "CLASS")]
    pub classes: Vec<String>,

    /// Minimum payout for a class (repeatable)
    #[arg(long = "min-price", value_name = "CLASS=AMOUNT", value_parser = parse_min_price)]
    pub min_prices: Vec<(String, f64)>,

    /// Stop after opening the booking page without choosing a vehicle
    #[arg(long)]
    pub skip_vehicle: bool,

    /// Do not press the final confirmation
    #[arg(long)]
    pub skip_confirm: bool,

    /// Keep retrying with periodic page refreshes after fatal failures
    #[arg(long)]
    pub auto_refresh: bool,

    /// Log destructive actions instead of performing them
    #[arg(long)]
    pub dry_run: bool,

    /// Simulated page load time
    #[arg(long, default_value = "300ms", value_parser = humantime::parse_duration)]
    pub load_delay: Duration,

    /// Delay between a click and the page it opens
    #[arg(long, default_value = "150ms", value_parser = humantime::parse_duration)]
    pub nav_delay: Duration,
}

fn parse_min_price(raw: &str) -> Result<(String, f64), String> {
    let (class, amount) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected CLASS=AMOUNT, got '{raw}'"))?;
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|err| format!("invalid amount in '{raw}': {err}"))?;
    Ok((class.trim().to_string(), amount))
}

/// Merge command-line values over saved form defaults.
pub fn build_run_config(args: &RehearseArgs, defaults: Option<RunConfig>) -> Result<RunConfig> {
    let mut config = match (args.date, defaults) {
        (Some(date), Some(mut saved)) => {
            saved.date = date;
            saved
        }
        (Some(date), None) => RunConfig::new(date, Vec::new()),
        (None, Some(saved)) => saved,
        (None, None) => bail!("No --date given and no saved form defaults"),
    };

    if !args.classes.is_empty() {
        config.vehicle_classes = args.classes.clone();
    }
    if args.end_date.is_some() {
        config.end_date = args.end_date;
    }
    if let Some(tolerance) = args.tolerance {
        config.tolerance_days = tolerance;
    }
    for (class, amount) in &args.min_prices {
        config.min_prices.insert(class.clone(), *amount);
    }
    if args.skip_vehicle {
        config.phases.select_vehicle = false;
    }
    if args.skip_confirm {
        config.phases.confirm = false;
    }
    config.auto_refresh |= args.auto_refresh;
    config.dry_run |= args.dry_run;
    Ok(config)
}

pub async fn cmd_rehearse(args: RehearseArgs, ctx: &CliContext) -> Result<()> {
    let scenario = ScenarioFixture::load(&args.scenario)
        .with_context(|| format!("Failed to load scenario {}", args.scenario.display()))?;
    let (browser, frame) =
        ScriptedBrowser::from_scenario(&scenario, args.load_delay, args.nav_delay);
    info!(%frame, url = %scenario.start_url, "scripted site opened");

    let store = ctx.store()?;
    let saved = store
        .form_defaults()
        .context("Failed to read saved form defaults")?
        .or_else(|| ctx.config().form_defaults.clone());
    let run_config = build_run_config(&args, saved)?;

    let mut pilot = Pilot::launch(ctx.config(), store, Arc::new(browser))?;
    let response = pilot.handle.start(run_config.clone()).await;
    if !response.is_success() {
        pilot.shutdown().await;
        bail!(
            "Start refused: {}",
            response.message.unwrap_or_else(|| "unknown reason".into())
        );
    }
    if let Err(err) = pilot.store.set_form_defaults(&run_config) {
        warn!(%err, "failed to save form defaults");
    }

    let outcome = follow_run(&pilot.handle, &mut pilot.events, ctx.output()).await;
    pilot.shutdown().await;
    match outcome? {
        RunOutcome::Finished => Ok(()),
        RunOutcome::Aborted(reason) => bail!("Run aborted: {reason}"),
    }
}

enum RunOutcome {
    Finished,
    Aborted(String),
}

/// Print UI events until the run is over. Ctrl-C aborts the run.
async fn follow_run(
    handle: &ControllerHandle,
    events: &mut broadcast::Receiver<UiEvent>,
    format: OutputFormat,
) -> Result<RunOutcome> {
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let response = handle.abort().await;
                info!(?response, "abort requested from terminal");
            }
            event = events.recv() => match event {
                Ok(event) => {
                    render(&event, format)?;
                    match event {
                        UiEvent::RunFinished { .. } => return Ok(RunOutcome::Finished),
                        UiEvent::RunAborted { reason } => {
                            // With auto-refresh the run stays in progress.
                            let active = handle
                                .snapshot()
                                .await
                                .map(|state| state.in_progress)
                                .unwrap_or(false);
                            if !active {
                                return Ok(RunOutcome::Aborted(reason));
                            }
                        }
                        UiEvent::Log(_) | UiEvent::Alert { .. } => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => {
                    return Ok(RunOutcome::Aborted("event stream closed".to_string()))
                }
            }
        }
    }
}

fn render(event: &UiEvent, format: OutputFormat) -> Result<()> {
    emit(format, event, || match event {
        UiEvent::Log(entry) => {
            let tag = match entry.level {
                LogLevel::Info => "info",
                LogLevel::Error => "error",
                LogLevel::Success => "ok",
            };
            format!(
                "{} [{:>5}] {}",
                entry.timestamp.format("%H:%M:%S"),
                tag,
                entry.text
            )
        }
        UiEvent::RunFinished { message } => format!("== finished: {message}"),
        UiEvent::RunAborted { reason } => format!("== aborted: {reason}"),
        UiEvent::Alert { text } => format!("!! {text}"),
    })
}
