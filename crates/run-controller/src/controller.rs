//! The run controller task.
//!
//! One task owns [`RunState`] and handles one [`ControllerEvent`] at a time,
//! either to completion or to its next [`Suspension`]. Slow work (actor
//! invocations, reloads, timers) runs in spawned tasks that post their
//! outcome back to the queue tagged with the run id, so a late answer for an
//! aborted or superseded run is simply dropped.

use std::sync::Arc;
use std::time::Duration;

use actor_bridge::{
    publish, ActorBridge, BridgeError, CommandResponse, PhaseCommand, UiCommand, UiEvent,
    UiEventBus,
};
use browser_host::{BrowserPort, FrameEvent, HostError};
use pilot_core_types::{FrameId, Phase, PhaseResult, RunConfig, RunId};
use pilot_state_center::{PilotStore, RunLog};
use site_gate::SiteGate;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ControllerError, ControllerResult};
use crate::policy::{ControllerPolicy, RetryDecision};
use crate::state::{ReloadPurpose, RunPhase, RunState, Suspension};

/// Collaborators the controller drives.
pub struct ControllerDeps {
    pub browser: Arc<dyn BrowserPort>,
    pub bridge: Arc<dyn ActorBridge>,
    pub gate: Arc<SiteGate>,
    pub store: PilotStore,
    pub log: Arc<RunLog>,
    pub bus: UiEventBus,
}

enum ControllerEvent {
    Command {
        command: UiCommand,
        reply: oneshot::Sender<CommandResponse>,
    },
    Snapshot {
        reply: oneshot::Sender<RunState>,
    },
    Frame(FrameEvent),
    PhaseOutcome {
        run: RunId,
        phase: Phase,
        frame: FrameId,
        outcome: Result<PhaseResult, BridgeError>,
    },
    ReloadDone {
        run: RunId,
        frame: FrameId,
        purpose: ReloadPurpose,
        outcome: Result<(), HostError>,
    },
    NavigationTimeout {
        run: RunId,
    },
    RefreshDue {
        run: RunId,
    },
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AbortKind {
    User,
    Exhausted,
    FrameLost,
}

/// Cloneable front door used by the UI surface.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl ControllerHandle {
    /// Submit a UI command and wait for its synchronous answer.
    pub async fn submit(&self, command: UiCommand) -> CommandResponse {
        let (reply, answer) = oneshot::channel();
        if self
            .events
            .send(ControllerEvent::Command { command, reply })
            .is_err()
        {
            return CommandResponse::error("Run controller is not running");
        }
        answer
            .await
            .unwrap_or_else(|_| CommandResponse::error("Run controller stopped before answering"))
    }

    pub async fn start(&self, config: RunConfig) -> CommandResponse {
        self.submit(UiCommand::Start { config }).await
    }

    pub async fn abort(&self) -> CommandResponse {
        self.submit(UiCommand::Abort).await
    }

    /// Current state, or `None` once the controller has stopped.
    pub async fn snapshot(&self) -> Option<RunState> {
        let (reply, answer) = oneshot::channel();
        self.events.send(ControllerEvent::Snapshot { reply }).ok()?;
        answer.await.ok()
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(ControllerEvent::Shutdown);
    }
}

pub struct RunController {
    deps: ControllerDeps,
    policy: ControllerPolicy,
    state: RunState,
    run_token: CancellationToken,
    timer: Option<CancellationToken>,
    /// Booking page that finished loading while phase A was still answering.
    early_navigation: Option<FrameId>,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl RunController {
    /// Reconcile persisted state and start the controller task.
    pub fn spawn(
        deps: ControllerDeps,
        policy: ControllerPolicy,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (events, queue) = mpsc::unbounded_channel();
        forward_frame_events(deps.browser.subscribe(), events.clone());

        let mut controller = Self {
            deps,
            policy,
            state: RunState::idle(),
            run_token: CancellationToken::new(),
            timer: None,
            early_navigation: None,
            events: events.clone(),
        };
        controller.reconcile();
        let task = tokio::spawn(controller.run(queue));
        (ControllerHandle { events }, task)
    }

    /// A persisted in-progress flag with no live run behind it is stale.
    fn reconcile(&mut self) {
        match self.deps.store.run_in_progress() {
            Ok(true) => {
                warn!("stale in-progress flag found at startup");
                self.deps
                    .log
                    .info("Previous run did not finish; cleared its in-progress flag");
                self.persist_flag(false);
            }
            Ok(false) => {}
            Err(err) => warn!(%err, "could not read in-progress flag"),
        }
    }

    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<ControllerEvent>) {
        info!(max_retries = self.policy.max_retries, "run controller ready");
        while let Some(event) = queue.recv().await {
            if matches!(event, ControllerEvent::Shutdown) {
                break;
            }
            self.handle(event).await;
        }
        self.run_token.cancel();
        self.disarm_timer();
        debug!("run controller stopped");
    }

    async fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Command { command, reply } => {
                let response = self.handle_command(command).await;
                let _ = reply.send(response);
            }
            ControllerEvent::Snapshot { reply } => {
                let _ = reply.send(self.state.clone());
            }
            ControllerEvent::Frame(FrameEvent::NavigationComplete { frame, url }) => {
                self.on_navigation(frame, url).await
            }
            ControllerEvent::Frame(FrameEvent::Closed { frame }) => self.on_frame_closed(frame),
            ControllerEvent::PhaseOutcome {
                run,
                phase,
                frame,
                outcome,
            } => self.on_phase_outcome(run, phase, frame, outcome).await,
            ControllerEvent::ReloadDone {
                run,
                frame,
                purpose,
                outcome,
            } => self.on_reload_done(run, frame, purpose, outcome).await,
            ControllerEvent::NavigationTimeout { run } => self.on_navigation_timeout(run),
            ControllerEvent::RefreshDue { run } => self.on_refresh_due(run),
            ControllerEvent::Shutdown => {}
        }
    }

    async fn handle_command(&mut self, command: UiCommand) -> CommandResponse {
        match command {
            UiCommand::Start { config } => match self.start(config).await {
                Ok(()) => CommandResponse::success_with("Run started"),
                Err(err) => {
                    warn!(%err, "start refused");
                    self.deps.log.error(format!("Start refused: {err}"));
                    CommandResponse::error(err.to_string())
                }
            },
            UiCommand::Abort => match self.abort() {
                Ok(()) => CommandResponse::success_with("Run aborted"),
                Err(err) => CommandResponse::error(err.to_string()),
            },
        }
    }

    async fn start(&mut self, config: RunConfig) -> ControllerResult<()> {
        if self.state.in_progress {
            return Err(ControllerError::AlreadyRunning);
        }
        config.validate()?;

        let domain = self
            .deps
            .store
            .allow_listed_domain()?
            .ok_or(ControllerError::DomainUnset)?;
        self.deps.gate.set_domain(Some(domain));

        let frame = self.deps.browser.active_frame().await?;
        let url = self.deps.browser.frame_url(&frame).await?;
        self.deps.gate.check_domain(&url)?;
        self.deps.bridge.establish(&frame).await?;

        let run = RunId::new();
        self.run_token = CancellationToken::new();
        self.early_navigation = None;
        self.state = RunState {
            run_id: Some(run),
            target_frame: Some(frame.clone()),
            base_frame: Some(frame.clone()),
            start_url: Some(url.clone()),
            config: Some(config.clone()),
            in_progress: true,
            ..RunState::idle()
        };
        info!(%run, %frame, %url, dry_run = config.dry_run, "run started");
        let mode = if config.dry_run { " (dry run)" } else { "" };
        self.deps.log.info(format!("Run started on {url}{mode}"));
        self.dispatch(Phase::A, frame);
        Ok(())
    }

    fn abort(&mut self) -> ControllerResult<()> {
        if !self.state.in_progress {
            return Err(ControllerError::NotRunning);
        }
        self.abort_run("Stopped by user".to_string(), AbortKind::User);
        Ok(())
    }

    /// Send `phase` to the actor in `frame` and suspend until it answers.
    fn dispatch(&mut self, phase: Phase, frame: FrameId) {
        let (Some(run), Some(config)) = (self.state.run_id, self.state.config.clone()) else {
            return;
        };
        self.enter(RunPhase::awaiting(phase));
        self.state.suspension = Some(Suspension::Actor {
            phase,
            frame: frame.clone(),
        });
        self.deps.log.info(format!("Running {phase}"));

        let bridge = self.deps.bridge.clone();
        let token = self.run_token.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let target = frame.clone();
            tokio::select! {
                _ = token.cancelled() => debug!(%run, %phase, "phase invocation cancelled"),
                outcome = bridge.invoke(&target, PhaseCommand::run(phase, config)) => {
                    let _ = events.send(ControllerEvent::PhaseOutcome { run, phase, frame, outcome });
                }
            }
        });
    }

    /// Reload `frame` and suspend until the load finishes.
    fn reload(&mut self, frame: FrameId, purpose: ReloadPurpose) {
        let Some(run) = self.state.run_id else {
            return;
        };
        self.state.suspension = Some(Suspension::Reload {
            frame: frame.clone(),
            purpose,
        });
        let start_url = match purpose {
            ReloadPurpose::Retry(Phase::A) | ReloadPurpose::Refresh => {
                self.state.start_url.clone()
            }
            ReloadPurpose::Retry(Phase::B | Phase::C) => None,
        };

        let browser = self.deps.browser.clone();
        let token = self.run_token.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let target = frame.clone();
            tokio::select! {
                _ = token.cancelled() => debug!(%run, "reload cancelled"),
                outcome = reload_or_return(browser.as_ref(), &target, start_url.as_deref()) => {
                    let _ = events.send(ControllerEvent::ReloadDone { run, frame, purpose, outcome });
                }
            }
        });
    }

    async fn on_phase_outcome(
        &mut self,
        run: RunId,
        phase: Phase,
        frame: FrameId,
        outcome: Result<PhaseResult, BridgeError>,
    ) {
        let expected = Suspension::Actor {
            phase,
            frame: frame.clone(),
        };
        if !self.state.accepts(run) || self.state.suspension.as_ref() != Some(&expected) {
            debug!(%run, %phase, %frame, "discarding stale phase response");
            return;
        }
        self.state.suspension = None;

        match outcome {
            Ok(result) if result.is_success() => {
                self.deps
                    .log
                    .success(format!("{phase} succeeded: {}", result.message));
                self.advance(phase, frame).await;
            }
            Ok(result) => {
                self.deps
                    .log
                    .error(format!("{phase} failed: {}", result.message));
                self.retry_or_fail(phase, result.message);
            }
            Err(err) => {
                self.deps
                    .log
                    .error(format!("{phase} got no answer from the page: {err}"));
                self.retry_or_fail(phase, err.to_string());
            }
        }
    }

    async fn advance(&mut self, phase: Phase, frame: FrameId) {
        let Some(config) = self.state.config.clone() else {
            return;
        };
        match phase {
            Phase::A => {
                self.enter(RunPhase::AwaitingNavigation);
                if config.dry_run {
                    self.deps
                        .log
                        .info("[dry run] navigation to the booking page simulated");
                    self.on_booking_page(frame).await;
                    return;
                }
                let Some(run) = self.state.run_id else {
                    return;
                };
                self.state.suspension = Some(Suspension::Navigation);
                self.arm_timer(
                    self.policy.navigation_timeout,
                    ControllerEvent::NavigationTimeout { run },
                );
                if let Some(opened) = self.early_navigation.take() {
                    debug!(frame = %opened, "booking page loaded before phase A answered");
                    self.on_booking_page(opened).await;
                }
            }
            Phase::B if config.phases.confirm => self.dispatch(Phase::C, frame),
            Phase::B => self.complete("Vehicle selected; confirmation skipped".to_string()),
            Phase::C => self.complete("Booking confirmed".to_string()),
        }
    }

    async fn on_navigation(&mut self, frame: FrameId, url: String) {
        if !self.state.in_progress {
            return;
        }
        let phase_a_pending = matches!(
            self.state.suspension,
            Some(Suspension::Actor {
                phase: Phase::A,
                ..
            })
        );
        let awaiting_page = self.state.suspension == Some(Suspension::Navigation);
        if !phase_a_pending && !awaiting_page {
            debug!(%frame, %url, "navigation ignored");
            return;
        }
        if !self.deps.gate.check_navigation_pattern(&url).is_match() {
            debug!(%frame, %url, "navigation does not lead to the booking page");
            return;
        }
        if phase_a_pending {
            self.early_navigation = Some(frame);
            return;
        }
        self.deps.log.info(format!("Booking page opened: {url}"));
        self.on_booking_page(frame).await;
    }

    /// The booking page is loaded in `frame`: target it and run what is left.
    async fn on_booking_page(&mut self, frame: FrameId) {
        let Some(config) = self.state.config.clone() else {
            return;
        };
        self.disarm_timer();
        self.early_navigation = None;
        self.state.suspension = None;
        self.state.target_frame = Some(frame.clone());

        let next = if config.phases.select_vehicle {
            Phase::B
        } else if config.phases.confirm {
            Phase::C
        } else {
            self.complete("Booking page opened; remaining phases skipped".to_string());
            return;
        };

        if let Err(err) = self.deps.bridge.establish(&frame).await {
            self.deps
                .log
                .error(format!("Could not reach the booking page: {err}"));
            self.enter(RunPhase::awaiting(next));
            self.retry_or_fail(next, err.to_string());
            return;
        }
        self.dispatch(next, frame);
    }

    fn retry_or_fail(&mut self, phase: Phase, reason: String) {
        match self.policy.decide(self.state.retry_count) {
            RetryDecision::GiveUp => {
                let reason = format!(
                    "{phase} failed after {} retries: {reason}",
                    self.policy.max_retries
                );
                self.abort_run(reason, AbortKind::Exhausted);
            }
            RetryDecision::Reload { attempt } => {
                let frame = match phase {
                    Phase::A => self.state.base_frame.clone(),
                    Phase::B | Phase::C => self.state.target_frame.clone(),
                };
                let Some(frame) = frame else {
                    self.abort_run("No frame left to reload".to_string(), AbortKind::FrameLost);
                    return;
                };
                self.state.retry_count = attempt;
                let page = if phase == Phase::A { "the start page" } else { "the page" };
                self.deps.log.info(format!(
                    "Retrying {phase} (attempt {attempt} of {}): reloading {page}",
                    self.policy.max_retries
                ));
                self.enter(RunPhase::awaiting(phase));
                self.reload(frame, ReloadPurpose::Retry(phase));
            }
        }
    }

    async fn on_reload_done(
        &mut self,
        run: RunId,
        frame: FrameId,
        purpose: ReloadPurpose,
        outcome: Result<(), HostError>,
    ) {
        let expected = Suspension::Reload {
            frame: frame.clone(),
            purpose,
        };
        if !self.state.accepts(run) || self.state.suspension.as_ref() != Some(&expected) {
            debug!(%run, %frame, "discarding stale reload completion");
            return;
        }
        self.state.suspension = None;

        if let Err(err) = outcome {
            self.abort_run(format!("Frame unreachable: {err}"), AbortKind::FrameLost);
            return;
        }

        let phase = match purpose {
            ReloadPurpose::Retry(phase) => phase,
            ReloadPurpose::Refresh => {
                self.state.retry_count = 0;
                self.deps.log.info("Page refreshed; starting a new attempt");
                Phase::A
            }
        };

        if phase == Phase::A {
            self.state.target_frame = Some(frame.clone());
            self.early_navigation = None;
            if let Err(err) = self.recheck_domain(&frame).await {
                self.abort_run(err.to_string(), AbortKind::FrameLost);
                return;
            }
        }

        if let Err(err) = self.deps.bridge.establish(&frame).await {
            self.deps
                .log
                .error(format!("Could not reach the page after reload: {err}"));
            self.retry_or_fail(phase, err.to_string());
            return;
        }
        self.dispatch(phase, frame);
    }

    async fn recheck_domain(&self, frame: &FrameId) -> ControllerResult<()> {
        let url = self.deps.browser.frame_url(frame).await?;
        self.deps.gate.check_domain(&url)?;
        Ok(())
    }

    fn on_navigation_timeout(&mut self, run: RunId) {
        if !self.state.accepts(run) || self.state.suspension != Some(Suspension::Navigation) {
            return;
        }
        self.timer = None;
        self.state.timer_armed = false;
        self.state.suspension = None;
        self.deps.log.error(format!(
            "Booking page did not open within {}",
            humantime::format_duration(self.policy.navigation_timeout)
        ));
        self.retry_or_fail(Phase::A, "booking page did not open".to_string());
    }

    fn on_frame_closed(&mut self, frame: FrameId) {
        self.deps.bridge.detach(&frame);
        if self.early_navigation.as_ref() == Some(&frame) {
            self.early_navigation = None;
        }
        if !self.state.in_progress {
            return;
        }
        let tracked = self.state.target_frame.as_ref() == Some(&frame)
            || self.state.base_frame.as_ref() == Some(&frame);
        if tracked {
            self.abort_run(format!("Tracked frame {frame} was closed"), AbortKind::FrameLost);
        }
    }

    fn abort_run(&mut self, reason: String, kind: AbortKind) {
        self.run_token.cancel();
        self.early_navigation = None;
        self.state.suspension = None;
        self.enter(RunPhase::Aborted);
        warn!(run = ?self.state.run_id, ?kind, %reason, "run aborted");
        self.deps.log.error(format!("Run aborted: {reason}"));
        publish(
            &self.deps.bus,
            UiEvent::RunAborted {
                reason: reason.clone(),
            },
        );
        if kind != AbortKind::User {
            publish(
                &self.deps.bus,
                UiEvent::Alert {
                    text: format!("Booking run stopped: {reason}"),
                },
            );
        }

        let auto_refresh = self
            .state
            .config
            .as_ref()
            .is_some_and(|config| config.auto_refresh);
        if kind == AbortKind::Exhausted && auto_refresh {
            self.schedule_refresh();
        } else {
            self.finish();
        }
    }

    /// Park the run until the next refresh. Each cycle gets a fresh run id so
    /// nothing issued before the failure can reach it.
    fn schedule_refresh(&mut self) {
        if self.state.run_id.is_none() {
            self.finish();
            return;
        }
        let run = RunId::new();
        info!(previous = ?self.state.run_id, %run, "new refresh cycle");
        self.state.run_id = Some(run);
        self.run_token = CancellationToken::new();
        self.enter(RunPhase::AwaitingRefresh);
        self.state.suspension = Some(Suspension::RefreshTimer);
        let delay = self.policy.refresh_delay();
        self.deps.log.info(format!(
            "Auto-refresh in {}",
            humantime::format_duration(delay)
        ));
        self.arm_timer(delay, ControllerEvent::RefreshDue { run });
    }

    fn on_refresh_due(&mut self, run: RunId) {
        if !self.state.accepts(run) || self.state.suspension != Some(Suspension::RefreshTimer) {
            return;
        }
        self.timer = None;
        self.state.timer_armed = false;
        let Some(frame) = self.state.base_frame.clone() else {
            self.abort_run("Base frame is gone".to_string(), AbortKind::FrameLost);
            return;
        };
        info!(%run, %frame, "auto-refresh returning base frame to the start page");
        self.reload(frame, ReloadPurpose::Refresh);
    }

    fn complete(&mut self, message: String) {
        self.run_token.cancel();
        self.state.suspension = None;
        self.enter(RunPhase::Completed);
        info!(run = ?self.state.run_id, %message, "run completed");
        self.deps.log.success(format!("Run finished: {message}"));
        publish(&self.deps.bus, UiEvent::RunFinished { message });
        self.finish();
    }

    /// Back to idle: nothing pending, flag cleared.
    fn finish(&mut self) {
        self.run_token.cancel();
        self.disarm_timer();
        self.early_navigation = None;
        self.state = RunState::idle();
        self.persist_flag(false);
    }

    fn enter(&mut self, next: RunPhase) {
        if self.state.phase != next {
            debug!(from = ?self.state.phase, to = ?next, "run transition");
        }
        self.state.phase = next;
        self.disarm_timer();
        self.persist_flag(self.state.in_progress);
    }

    fn arm_timer(&mut self, delay: Duration, event: ControllerEvent) {
        self.disarm_timer();
        let token = self.run_token.child_token();
        self.timer = Some(token.clone());
        self.state.timer_armed = true;

        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(delay) => {
                    let _ = events.send(event);
                }
            }
        });
    }

    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.state.timer_armed = false;
    }

    fn persist_flag(&self, in_progress: bool) {
        if let Err(err) = self.deps.store.set_run_in_progress(in_progress) {
            warn!(%err, "failed to persist in-progress flag");
        }
    }
}

fn forward_frame_events(
    mut frames: broadcast::Receiver<FrameEvent>,
    events: mpsc::UnboundedSender<ControllerEvent>,
) {
    tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(event) => {
                    if events.send(ControllerEvent::Frame(event)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "frame events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Reload `frame`, or load `start_url` into it when it has moved elsewhere.
async fn reload_or_return(
    browser: &dyn BrowserPort,
    frame: &FrameId,
    start_url: Option<&str>,
) -> Result<(), HostError> {
    if let Some(url) = start_url {
        if browser.frame_url(frame).await? != url {
            return browser.navigate(frame, url).await;
        }
    }
    browser.reload(frame).await
}
