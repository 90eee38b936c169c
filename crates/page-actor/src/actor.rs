//! Phase execution against one frame's DOM.

use std::sync::Arc;
use std::time::Duration;

use pilot_core_types::{Phase, PhaseResult, RunConfig};
use tokio::time::sleep;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::dom::{LayoutBox, PageDom};
use crate::errors::PhaseFailure;
use crate::matching::{evaluate_card, option_matches, CardVerdict};

/// Fixed latency accommodations used by the vehicle-selection phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActorTiming {
    /// Wait before touching a freshly navigated page.
    pub render_settle: Duration,
    /// Wait after opening the selector while its options populate.
    pub options_settle: Duration,
}

impl Default for ActorTiming {
    fn default() -> Self {
        Self {
            render_settle: Duration::from_millis(1000),
            options_settle: Duration::from_millis(500),
        }
    }
}

impl ActorTiming {
    pub fn immediate() -> Self {
        Self {
            render_settle: Duration::ZERO,
            options_settle: Duration::ZERO,
        }
    }
}

/// Executes one phase per call and keeps no memory between calls.
#[derive(Clone)]
pub struct BookingActor {
    dom: Arc<dyn PageDom>,
    timing: ActorTiming,
}

impl BookingActor {
    pub fn new(dom: Arc<dyn PageDom>, timing: ActorTiming) -> Self {
        Self { dom, timing }
    }

    /// Run `phase` and answer exactly once. DOM faults and panics inside the
    /// phase come back as failure results. Dropping the returned future
    /// aborts the phase, so nothing touches the page after a caller gives up.
    pub async fn run_phase(&self, phase: Phase, config: &RunConfig) -> PhaseResult {
        let dom = self.dom.clone();
        let timing = self.timing;
        let config = config.clone();

        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            match phase {
                Phase::A => match_and_click(dom.as_ref(), &config).await,
                Phase::B => select_vehicle(dom.as_ref(), &config, timing).await,
                Phase::C => confirm(dom.as_ref(), &config).await,
            }
        }));

        match task.await {
            Ok(Ok(message)) => {
                info!(%phase, %message, "phase succeeded");
                PhaseResult::success(message)
            }
            Ok(Err(failure)) => {
                warn!(%phase, %failure, "phase failed");
                PhaseResult::failure(failure.to_string())
            }
            Err(join_err) => {
                warn!(%phase, error = %join_err, "phase task aborted");
                PhaseResult::failure(format!("{phase} aborted unexpectedly: {join_err}"))
            }
        }
    }
}

async fn match_and_click(dom: &dyn PageDom, config: &RunConfig) -> Result<String, PhaseFailure> {
    let cards = dom.booking_cards().await?;
    let visible = cards.iter().filter(|card| card.layout.is_rendered()).count();
    if visible == 0 {
        return Err(PhaseFailure::NoBookingElements);
    }

    for card in &cards {
        let verdict = evaluate_card(card, config);
        if verdict == CardVerdict::Hidden {
            continue;
        }
        if !verdict.is_accepted() {
            debug!(index = card.index, ?verdict, "booking skipped");
            continue;
        }

        let summary = format!(
            "booking #{} ({}, {})",
            card.index,
            card.date_text.as_deref().unwrap_or_default().trim(),
            card.class_label.as_deref().unwrap_or_default().trim()
        );
        if config.dry_run {
            info!(index = card.index, "dry run: booking click simulated");
            return Ok(format!("[dry run] would click {summary}"));
        }
        dom.click_booking(card.index).await?;
        return Ok(format!("Clicked {summary}"));
    }

    Err(PhaseFailure::NoMatchingBooking { inspected: visible })
}

async fn select_vehicle(
    dom: &dyn PageDom,
    config: &RunConfig,
    timing: ActorTiming,
) -> Result<String, PhaseFailure> {
    if config.dry_run {
        info!("dry run: vehicle selection simulated");
        return Ok(format!(
            "[dry run] would select a vehicle matching {}",
            config.vehicle_classes.join(" / ")
        ));
    }
    sleep(timing.render_settle).await;
    dom.open_vehicle_selector().await?;
    sleep(timing.options_settle).await;

    let outcome = pick_vehicle(dom, config).await;
    // Closed on every path, including failures.
    if let Err(err) = dom.close_vehicle_selector().await {
        debug!(%err, "closing vehicle selector failed");
    }
    outcome
}

async fn pick_vehicle(dom: &dyn PageDom, config: &RunConfig) -> Result<String, PhaseFailure> {
    let options = dom.vehicle_options().await?;
    if options.is_empty() {
        return Err(PhaseFailure::SelectorEmpty);
    }

    let Some((index, label)) = options
        .iter()
        .enumerate()
        .find(|(_, text)| option_matches(text, config))
    else {
        return Err(PhaseFailure::NoMatchingVehicle(options.join(", ")));
    };

    dom.choose_vehicle_option(index).await?;
    dom.notify_vehicle_change().await?;
    Ok(format!("Selected vehicle '{label}'"))
}

async fn confirm(dom: &dyn PageDom, config: &RunConfig) -> Result<String, PhaseFailure> {
    let control = dom.confirmation_control().await?;
    if config.dry_run {
        return rehearse_confirmation(dom, control).await;
    }
    let control = control.ok_or(PhaseFailure::ConfirmationMissing)?;
    if !control.is_rendered() {
        return Err(PhaseFailure::ConfirmationNotRendered);
    }
    if let Some(banner) = dom.visible_error_banner().await? {
        return Err(PhaseFailure::ErrorBannerVisible(banner));
    }
    dom.click_confirmation().await?;
    Ok("Pressed confirmation".to_string())
}

/// Dry-run confirmation: inspect the page, skip the click. A visible banner
/// still fails; a missing control is only reported, since the booking page
/// may never have been opened.
async fn rehearse_confirmation(
    dom: &dyn PageDom,
    control: Option<LayoutBox>,
) -> Result<String, PhaseFailure> {
    if let Some(banner) = dom.visible_error_banner().await? {
        return Err(PhaseFailure::ErrorBannerVisible(banner));
    }
    let control = match control {
        Some(layout) if layout.is_rendered() => "ready",
        Some(_) => "not rendered",
        None => "not found",
    };
    info!(control, "dry run: confirmation click simulated");
    Ok(format!("[dry run] would press confirmation (control {control})"))
}
