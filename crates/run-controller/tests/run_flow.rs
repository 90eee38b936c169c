use std::sync::Arc;
use std::time::Duration;

use actor_bridge::{
    ui_event_bus, ActorBridge, BridgeError, ChannelId, InProcessBridge, PhaseCommand, UiEvent,
};
use async_trait::async_trait;
use browser_host::{
    BookingFixture, ConfirmationFixture, HostAction, PageFixture, ScriptedBrowser,
};
use chrono::NaiveDate;
use page_actor::ActorTiming;
use pilot_core_types::{FrameId, PhaseResult, RunConfig};
use pilot_state_center::{PilotStore, RunLog};
use run_controller::{
    ControllerDeps, ControllerHandle, ControllerPolicy, RunController, RunPhase, RunState,
};
use site_gate::SiteGate;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

const DOMAIN: &str = "rides.example.com";
const LIST: &str = "https://rides.example.com/driver/list";
const BOOKING: &str = "https://rides.example.com/booking/new/42";

fn list_page(class: &str, href: Option<&str>, new_tab: bool) -> PageFixture {
    PageFixture {
        bookings: vec![BookingFixture {
            date: "2025-06-01".into(),
            vehicle_class: class.into(),
            payout: Some("$80".into()),
            href: href.map(str::to_string),
            new_tab,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn booking_page(options: &[&str]) -> PageFixture {
    PageFixture {
        vehicle_options: options.iter().map(|o| o.to_string()).collect(),
        confirmation: ConfirmationFixture::Visible,
        ..Default::default()
    }
}

fn config() -> RunConfig {
    RunConfig::new(
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        vec!["Sedan".into()],
    )
}

fn fast_policy(max_retries: u32) -> ControllerPolicy {
    ControllerPolicy {
        max_retries,
        refresh_min: Duration::from_secs(20),
        refresh_max: Duration::from_secs(20),
        ..ControllerPolicy::default()
    }
}

/// Delays every phase invocation, standing in for a slow page.
struct SlowBridge {
    inner: Arc<InProcessBridge>,
    delay: Duration,
}

#[async_trait]
impl ActorBridge for SlowBridge {
    async fn establish(&self, frame: &FrameId) -> Result<ChannelId, BridgeError> {
        self.inner.establish(frame).await
    }

    async fn invoke(
        &self,
        frame: &FrameId,
        command: PhaseCommand,
    ) -> Result<PhaseResult, BridgeError> {
        sleep(self.delay).await;
        self.inner.invoke(frame, command).await
    }

    fn detach(&self, frame: &FrameId) {
        self.inner.detach(frame)
    }
}

struct Harness {
    browser: ScriptedBrowser,
    base: FrameId,
    store: PilotStore,
    log: Arc<RunLog>,
    handle: ControllerHandle,
    events: broadcast::Receiver<UiEvent>,
}

struct Setup {
    store: PilotStore,
    policy: ControllerPolicy,
    invoke_delay: Option<Duration>,
    timing: ActorTiming,
}

impl Default for Setup {
    fn default() -> Self {
        let store = PilotStore::in_memory();
        store.set_allow_listed_domain(Some(DOMAIN)).unwrap();
        Self {
            store,
            policy: fast_policy(3),
            invoke_delay: None,
            timing: ActorTiming::immediate(),
        }
    }
}

fn harness(list: PageFixture, booking: PageFixture, setup: Setup) -> Harness {
    let browser = ScriptedBrowser::new(Duration::from_millis(200), Duration::from_millis(50));
    browser.set_route(LIST, list);
    browser.set_route(BOOKING, booking);
    let base = browser.open_frame(LIST);

    let (bus, events) = ui_event_bus(1024);
    let log = Arc::new(RunLog::new(setup.store.clone(), bus.clone()));
    let inner = InProcessBridge::new(
        Arc::new(browser.clone()),
        setup.timing,
        Duration::from_secs(20),
    );
    let bridge: Arc<dyn ActorBridge> = match setup.invoke_delay {
        Some(delay) => Arc::new(SlowBridge { inner, delay }),
        None => inner,
    };

    let deps = ControllerDeps {
        browser: Arc::new(browser.clone()),
        bridge,
        gate: Arc::new(SiteGate::new(None)),
        store: setup.store.clone(),
        log: log.clone(),
        bus,
    };
    let (handle, _task) = RunController::spawn(deps, setup.policy);
    Harness {
        browser,
        base,
        store: setup.store,
        log,
        handle,
        events,
    }
}

impl Harness {
    /// Events up to and including the next finish or abort.
    async fn until_outcome(&mut self) -> (Vec<UiEvent>, UiEvent) {
        let mut seen = Vec::new();
        loop {
            let event = timeout(Duration::from_secs(3600), self.events.recv())
                .await
                .expect("run never reached an outcome")
                .expect("event bus closed");
            match event {
                UiEvent::RunFinished { .. } | UiEvent::RunAborted { .. } => {
                    return (seen, event)
                }
                other => seen.push(other),
            }
        }
    }

    async fn state(&self) -> RunState {
        self.handle.snapshot().await.expect("controller stopped")
    }

    async fn wait_for(&self, phase: RunPhase) -> RunState {
        for _ in 0..1000 {
            let state = self.state().await;
            if state.phase == phase {
                return state;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("controller never reached {phase:?}");
    }

    fn drained(&mut self) -> Vec<UiEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn logged(&self, needle: &str) -> bool {
        self.log
            .entries()
            .iter()
            .any(|entry| entry.text.contains(needle))
    }
}

fn has_alert(events: &[UiEvent]) -> bool {
    events
        .iter()
        .any(|event| matches!(event, UiEvent::Alert { .. }))
}

fn clicks(journal: &[HostAction]) -> usize {
    journal
        .iter()
        .filter(|action| matches!(action, HostAction::ClickBooking { .. }))
        .count()
}

#[tokio::test(start_paused = true)]
async fn runs_all_three_phases_in_the_same_tab() {
    let mut h = harness(
        list_page("Sedan", Some(BOOKING), false),
        booking_page(&["Compact", "Sedan XL"]),
        Setup::default(),
    );

    let response = h.handle.start(config()).await;
    assert!(response.is_success(), "{response:?}");
    assert!(h.store.run_in_progress().unwrap());

    let (_, outcome) = h.until_outcome().await;
    assert_eq!(
        outcome,
        UiEvent::RunFinished {
            message: "Booking confirmed".into()
        }
    );
    assert_eq!(
        h.browser.journal(),
        vec![
            HostAction::ClickBooking {
                frame: h.base.clone(),
                index: 0
            },
            HostAction::ChooseVehicle {
                frame: h.base.clone(),
                index: 1
            },
            HostAction::VehicleChange {
                frame: h.base.clone()
            },
            HostAction::Confirm {
                frame: h.base.clone()
            },
        ]
    );

    let state = h.state().await;
    assert_eq!(state.phase, RunPhase::Idle);
    assert!(!state.in_progress);
    assert!(!state.timer_armed);
    assert!(!h.store.run_in_progress().unwrap());
}

#[tokio::test(start_paused = true)]
async fn follows_the_booking_page_into_a_new_tab() {
    let mut h = harness(
        list_page("Sedan", Some(BOOKING), true),
        booking_page(&["Sedan"]),
        Setup::default(),
    );

    assert!(h.handle.start(config()).await.is_success());
    let (_, outcome) = h.until_outcome().await;
    assert!(matches!(outcome, UiEvent::RunFinished { .. }));

    let frames = h.browser.frames();
    assert_eq!(frames.len(), 2);
    let booking_tab = frames[1].clone();
    assert_ne!(booking_tab, h.base);
    assert!(h.browser.journal().contains(&HostAction::Confirm {
        frame: booking_tab
    }));
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_and_leaves_run_untouched() {
    let h = harness(
        list_page("Sedan", None, false),
        booking_page(&["Sedan"]),
        Setup::default(),
    );

    assert!(h.handle.start(config()).await.is_success());
    let before = h.state().await;

    let response = h.handle.start(config()).await;
    assert!(!response.is_success());
    assert_eq!(
        response.message.as_deref(),
        Some("A run is already in progress")
    );
    let after = h.state().await;
    assert_eq!(after.run_id, before.run_id);
    assert!(after.in_progress);

    assert!(h.handle.abort().await.is_success());
    let again = h.handle.abort().await;
    assert_eq!(again.message.as_deref(), Some("No run in progress"));
}

#[tokio::test(start_paused = true)]
async fn abort_cancels_navigation_timer() {
    let mut h = harness(
        list_page("Sedan", None, false),
        booking_page(&["Sedan"]),
        Setup::default(),
    );

    assert!(h.handle.start(config()).await.is_success());
    let waiting = h.wait_for(RunPhase::AwaitingNavigation).await;
    assert!(waiting.timer_armed);

    assert!(h.handle.abort().await.is_success());
    let (seen, outcome) = h.until_outcome().await;
    assert_eq!(
        outcome,
        UiEvent::RunAborted {
            reason: "Stopped by user".into()
        }
    );
    assert!(!has_alert(&seen));

    let state = h.state().await;
    assert_eq!(state.phase, RunPhase::Idle);
    assert!(!state.timer_armed);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.browser.reload_count(&h.base), 0);
    assert_eq!(clicks(&h.browser.journal()), 1);
    assert!(!has_alert(&h.drained()));
    assert!(!h.store.run_in_progress().unwrap());
}

#[tokio::test(start_paused = true)]
async fn in_flight_phase_is_dropped_after_abort() {
    let mut h = harness(
        list_page("Sedan", Some(BOOKING), false),
        booking_page(&["Sedan"]),
        Setup {
            invoke_delay: Some(Duration::from_secs(5)),
            ..Setup::default()
        },
    );

    assert!(h.handle.start(config()).await.is_success());
    assert!(h.handle.abort().await.is_success());
    let (_, outcome) = h.until_outcome().await;
    assert!(matches!(outcome, UiEvent::RunAborted { .. }));

    sleep(Duration::from_secs(60)).await;
    assert!(h.browser.journal().is_empty());
    assert!(!h
        .drained()
        .iter()
        .any(|event| matches!(event, UiEvent::RunFinished { .. })));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_abort_with_alert() {
    let mut h = harness(
        list_page("Van", Some(BOOKING), false),
        booking_page(&["Sedan"]),
        Setup::default(),
    );

    assert!(h.handle.start(config()).await.is_success());
    let (seen, outcome) = h.until_outcome().await;
    match outcome {
        UiEvent::RunAborted { reason } => {
            assert!(reason.contains("failed after 3 retries"), "{reason}");
            assert!(reason.contains("No booking matched"), "{reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    // The alert follows the abort event.
    let rest = h.drained();
    assert!(has_alert(&rest) || has_alert(&seen));

    assert_eq!(h.browser.reload_count(&h.base), 3);
    assert!(h.logged("Retrying phase A"));
    assert_eq!(h.state().await.phase, RunPhase::Idle);
    assert!(!h.store.run_in_progress().unwrap());
}

#[tokio::test(start_paused = true)]
async fn missing_booking_page_counts_as_phase_a_failure() {
    let mut h = harness(
        list_page("Sedan", None, false),
        booking_page(&["Sedan"]),
        Setup {
            policy: fast_policy(1),
            ..Setup::default()
        },
    );

    assert!(h.handle.start(config()).await.is_success());
    let (_, outcome) = h.until_outcome().await;
    match outcome {
        UiEvent::RunAborted { reason } => {
            assert!(reason.contains("booking page did not open"), "{reason}")
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.browser.reload_count(&h.base), 1);
    assert_eq!(clicks(&h.browser.journal()), 2);
    assert!(h.logged("did not open within 30s"));
}

#[tokio::test(start_paused = true)]
async fn empty_list_is_retried_by_reloading_the_base_frame() {
    let mut h = harness(
        PageFixture::default(),
        booking_page(&["Sedan"]),
        Setup {
            policy: fast_policy(1),
            ..Setup::default()
        },
    );

    assert!(h.handle.start(config()).await.is_success());
    let (_, outcome) = h.until_outcome().await;
    assert!(matches!(outcome, UiEvent::RunAborted { .. }));
    assert!(h.logged("No booking elements found"));
    assert!(h.logged("Retrying phase A (booking match) (attempt 1 of 1)"));
    assert_eq!(h.browser.reload_count(&h.base), 1);
}

#[tokio::test(start_paused = true)]
async fn phase_b_retries_reload_the_booking_tab() {
    let mut h = harness(
        list_page("Sedan", Some(BOOKING), true),
        booking_page(&["Compact", "Van"]),
        Setup {
            policy: fast_policy(2),
            ..Setup::default()
        },
    );

    assert!(h.handle.start(config()).await.is_success());
    let (_, outcome) = h.until_outcome().await;
    match outcome {
        UiEvent::RunAborted { reason } => assert!(reason.starts_with("phase B"), "{reason}"),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let booking_tab = h.browser.frames()[1].clone();
    assert_eq!(h.browser.reload_count(&booking_tab), 2);
    assert_eq!(h.browser.reload_count(&h.base), 0);
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_starts_a_fresh_cycle() {
    let mut config = config();
    config.auto_refresh = true;
    let mut h = harness(
        list_page("Van", Some(BOOKING), false),
        booking_page(&["Sedan"]),
        Setup {
            policy: fast_policy(1),
            ..Setup::default()
        },
    );

    assert!(h.handle.start(config).await.is_success());
    let first = h.state().await.run_id;
    let (_, outcome) = h.until_outcome().await;
    assert!(matches!(outcome, UiEvent::RunAborted { .. }));

    let waiting = h.state().await;
    assert_eq!(waiting.phase, RunPhase::AwaitingRefresh);
    assert!(waiting.run_id.is_some());
    assert_ne!(waiting.run_id, first);
    assert!(waiting.in_progress);
    assert!(waiting.timer_armed);
    assert!(h.store.run_in_progress().unwrap());
    assert!(has_alert(&h.drained()));

    // A matching booking shows up before the refresh fires.
    h.browser
        .set_route(LIST, list_page("Sedan", Some(BOOKING), false));

    let (_, outcome) = h.until_outcome().await;
    assert!(matches!(outcome, UiEvent::RunFinished { .. }), "{outcome:?}");
    assert_eq!(h.browser.reload_count(&h.base), 2);
    assert!(h.logged("Auto-refresh in 20s"));
    assert!(!h.store.run_in_progress().unwrap());
}

#[tokio::test(start_paused = true)]
async fn refresh_brings_a_same_tab_run_back_to_the_list() {
    let mut config = config();
    config.auto_refresh = true;
    let mut h = harness(
        list_page("Sedan", Some(BOOKING), false),
        booking_page(&["Truck"]),
        Setup {
            policy: fast_policy(1),
            ..Setup::default()
        },
    );

    assert!(h.handle.start(config).await.is_success());
    let (_, outcome) = h.until_outcome().await;
    match outcome {
        UiEvent::RunAborted { reason } => assert!(reason.starts_with("phase B"), "{reason}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.state().await.phase, RunPhase::AwaitingRefresh);

    // The booking page now offers a sedan; the next cycle has to find the
    // card on the list again to get there.
    h.browser.set_route(BOOKING, booking_page(&["Sedan"]));
    let (_, outcome) = h.until_outcome().await;
    assert!(matches!(outcome, UiEvent::RunFinished { .. }), "{outcome:?}");

    let journal = h.browser.journal();
    assert!(journal.contains(&HostAction::Navigate {
        frame: h.base.clone(),
        url: LIST.into()
    }));
    assert_eq!(clicks(&journal), 2);
    assert!(!h.logged("No booking elements found"));
}

#[tokio::test(start_paused = true)]
async fn phase_a_retry_returns_to_the_start_page() {
    const DETAILS: &str = "https://rides.example.com/driver/details/9";
    let mut h = harness(
        list_page("Sedan", Some(DETAILS), false),
        booking_page(&["Sedan"]),
        Setup {
            policy: fast_policy(1),
            ..Setup::default()
        },
    );

    assert!(h.handle.start(config()).await.is_success());
    let (_, outcome) = h.until_outcome().await;
    match outcome {
        UiEvent::RunAborted { reason } => {
            assert!(reason.contains("booking page did not open"), "{reason}")
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let journal = h.browser.journal();
    assert!(journal.contains(&HostAction::Navigate {
        frame: h.base.clone(),
        url: LIST.into()
    }));
    assert_eq!(clicks(&journal), 2);
    assert_eq!(h.browser.reload_count(&h.base), 0);
    assert!(h.logged("reloading the start page"));
}

#[tokio::test(start_paused = true)]
async fn abort_stops_a_settling_phase_before_it_touches_the_page() {
    let mut h = harness(
        list_page("Sedan", Some(BOOKING), false),
        booking_page(&["Sedan"]),
        Setup {
            timing: ActorTiming::default(),
            ..Setup::default()
        },
    );

    assert!(h.handle.start(config()).await.is_success());
    h.wait_for(RunPhase::AwaitingPhaseB).await;
    assert!(h.handle.abort().await.is_success());
    let (_, outcome) = h.until_outcome().await;
    assert!(matches!(outcome, UiEvent::RunAborted { .. }));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(
        h.browser.journal(),
        vec![HostAction::ClickBooking {
            frame: h.base.clone(),
            index: 0
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn abort_while_waiting_for_refresh_cancels_it() {
    let mut config = config();
    config.auto_refresh = true;
    let mut h = harness(
        list_page("Van", Some(BOOKING), false),
        booking_page(&["Sedan"]),
        Setup {
            policy: fast_policy(1),
            ..Setup::default()
        },
    );

    assert!(h.handle.start(config).await.is_success());
    h.until_outcome().await;
    assert_eq!(h.state().await.phase, RunPhase::AwaitingRefresh);

    assert!(h.handle.abort().await.is_success());
    let state = h.state().await;
    assert_eq!(state.phase, RunPhase::Idle);
    assert!(!state.timer_armed);

    sleep(Duration::from_secs(300)).await;
    assert_eq!(h.browser.reload_count(&h.base), 1);
    assert!(!h.store.run_in_progress().unwrap());
}

#[tokio::test(start_paused = true)]
async fn closing_the_tracked_tab_aborts_without_refresh() {
    let mut config = config();
    config.auto_refresh = true;
    let mut h = harness(
        list_page("Sedan", None, false),
        booking_page(&["Sedan"]),
        Setup::default(),
    );

    assert!(h.handle.start(config).await.is_success());
    h.wait_for(RunPhase::AwaitingNavigation).await;
    h.browser.close_frame(&h.base);

    let (_, outcome) = h.until_outcome().await;
    match outcome {
        UiEvent::RunAborted { reason } => assert!(reason.contains("was closed"), "{reason}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(has_alert(&h.drained()));
    assert_eq!(h.state().await.phase, RunPhase::Idle);
    assert!(!h.store.run_in_progress().unwrap());

    sleep(Duration::from_secs(120)).await;
    assert_eq!(clicks(&h.browser.journal()), 1);
    assert_eq!(h.browser.reload_count(&h.base), 0);
}

#[tokio::test(start_paused = true)]
async fn dry_run_touches_nothing() {
    let mut config = config();
    config.dry_run = true;
    let mut h = harness(
        list_page("Sedan", Some(BOOKING), false),
        booking_page(&["Sedan"]),
        Setup::default(),
    );

    assert!(h.handle.start(config).await.is_success());
    let (_, outcome) = h.until_outcome().await;
    assert!(matches!(outcome, UiEvent::RunFinished { .. }));
    assert!(h.browser.journal().is_empty());
    assert!(h.logged("[dry run] would click booking #0"));
    assert!(h.logged("[dry run] would press confirmation"));
}

#[tokio::test(start_paused = true)]
async fn disabled_phases_are_skipped() {
    let mut config = config();
    config.phases.select_vehicle = false;
    let mut h = harness(
        list_page("Sedan", Some(BOOKING), false),
        booking_page(&["Sedan"]),
        Setup::default(),
    );

    assert!(h.handle.start(config.clone()).await.is_success());
    h.until_outcome().await;
    let journal = h.browser.journal();
    assert!(journal.contains(&HostAction::Confirm {
        frame: h.base.clone()
    }));
    assert!(!journal
        .iter()
        .any(|action| matches!(action, HostAction::ChooseVehicle { .. })));

    // The first tab now shows the booking page; start over from a fresh list.
    config.phases.confirm = false;
    let second = h.browser.open_frame(LIST);
    assert!(h.handle.start(config).await.is_success());
    let (_, outcome) = h.until_outcome().await;
    assert_eq!(
        outcome,
        UiEvent::RunFinished {
            message: "Booking page opened; remaining phases skipped".into()
        }
    );
    assert!(h.browser.journal().contains(&HostAction::ClickBooking {
        frame: second,
        index: 0
    }));
}

#[tokio::test(start_paused = true)]
async fn refused_starts_touch_nothing() {
    let store = PilotStore::in_memory();
    let h = harness(
        list_page("Sedan", Some(BOOKING), false),
        booking_page(&["Sedan"]),
        Setup {
            store: store.clone(),
            ..Setup::default()
        },
    );

    let response = h.handle.start(config()).await;
    assert_eq!(
        response.message.as_deref(),
        Some("No allow-listed domain configured")
    );

    store.set_allow_listed_domain(Some("elsewhere.test")).unwrap();
    let response = h.handle.start(config()).await;
    assert!(response
        .message
        .as_deref()
        .unwrap_or_default()
        .starts_with("Safety check failed"));

    store.set_allow_listed_domain(Some(DOMAIN)).unwrap();
    let mut invalid = config();
    invalid.vehicle_classes.clear();
    let response = h.handle.start(invalid).await;
    assert!(response
        .message
        .as_deref()
        .unwrap_or_default()
        .starts_with("Invalid configuration"));

    sleep(Duration::from_secs(5)).await;
    assert!(h.browser.journal().is_empty());
    assert!(!h.store.run_in_progress().unwrap());
    assert_eq!(h.state().await.phase, RunPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn stale_in_progress_flag_is_reset_on_startup() {
    let setup = Setup::default();
    setup.store.set_run_in_progress(true).unwrap();
    let h = harness(
        list_page("Sedan", None, false),
        booking_page(&["Sedan"]),
        setup,
    );

    assert!(!h.store.run_in_progress().unwrap());
    assert!(h.logged("Previous run did not finish"));
    assert!(!h.state().await.in_progress);
}
