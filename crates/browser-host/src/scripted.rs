//! Scripted in-memory browser.
//!
//! Frames hold an address and a document built from the [`PageFixture`]
//! registered for that address. Every load bumps the frame's document
//! generation, so documents handed out earlier start answering with
//! [`DomError::Detached`], the same way a real navigation destroys injected
//! scripts.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use actor_bridge::{DocumentHandle, DomProvider};
use async_trait::async_trait;
use page_actor::{BookingCard, DomError, LayoutBox, PageDom};
use parking_lot::Mutex;
use pilot_core_types::FrameId;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::debug;

use crate::fixture::{ConfirmationFixture, PageFixture, ScenarioFixture};
use crate::{BrowserPort, FrameEvent, HostError};

/// Side effects performed on the scripted pages, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostAction {
    ClickBooking { frame: FrameId, index: usize },
    ChooseVehicle { frame: FrameId, index: usize },
    VehicleChange { frame: FrameId },
    Confirm { frame: FrameId },
    Reload { frame: FrameId },
    Navigate { frame: FrameId, url: String },
}

struct FrameSlot {
    url: String,
    generation: u64,
    page: Arc<ScriptedPage>,
}

#[derive(Default)]
struct HostState {
    routes: HashMap<String, PageFixture>,
    frames: HashMap<FrameId, FrameSlot>,
    order: Vec<FrameId>,
    active: Option<FrameId>,
    next_generation: u64,
    journal: Vec<HostAction>,
}

struct HostShared {
    state: Mutex<HostState>,
    events: broadcast::Sender<FrameEvent>,
    load_delay: Duration,
    nav_delay: Duration,
}

impl HostShared {
    /// Replace the document of `frame` with the page served at `url`.
    fn load(self: &Arc<Self>, frame: &FrameId, url: &str) -> Result<(), HostError> {
        {
            let mut state = self.state.lock();
            if !state.frames.contains_key(frame) {
                return Err(HostError::FrameNotFound(frame.clone()));
            }
            state.next_generation += 1;
            let generation = state.next_generation;
            let fixture = state.routes.get(url).cloned().unwrap_or_default();
            let page = Arc::new(ScriptedPage::new(
                Arc::downgrade(self),
                frame.clone(),
                generation,
                fixture,
            ));
            if let Some(slot) = state.frames.get_mut(frame) {
                slot.url = url.to_string();
                slot.generation = generation;
                slot.page = page;
            }
        }
        debug!(%frame, url, "frame loaded");
        let _ = self.events.send(FrameEvent::NavigationComplete {
            frame: frame.clone(),
            url: url.to_string(),
        });
        Ok(())
    }

    fn open(self: &Arc<Self>, url: &str) -> FrameId {
        let frame = FrameId::new();
        {
            let mut state = self.state.lock();
            let placeholder = Arc::new(ScriptedPage::new(
                Arc::downgrade(self),
                frame.clone(),
                0,
                PageFixture::default(),
            ));
            state.frames.insert(
                frame.clone(),
                FrameSlot {
                    url: String::new(),
                    generation: 0,
                    page: placeholder,
                },
            );
            state.order.push(frame.clone());
            state.active = Some(frame.clone());
        }
        // The slot was inserted above, so loading cannot miss it.
        let _ = self.load(&frame, url);
        frame
    }

    fn is_current(&self, frame: &FrameId, generation: u64) -> bool {
        self.state
            .lock()
            .frames
            .get(frame)
            .map(|slot| slot.generation == generation)
            .unwrap_or(false)
    }

    fn record(&self, action: HostAction) {
        self.state.lock().journal.push(action);
    }

    /// Navigate after the host's navigation delay, like a click that loads a
    /// new page once the current event handler has returned.
    fn navigate_later(self: &Arc<Self>, from: FrameId, url: String, new_tab: bool) {
        let shared = self.clone();
        tokio::spawn(async move {
            sleep(shared.nav_delay).await;
            if new_tab {
                shared.open(&url);
            } else if let Err(err) = shared.load(&from, &url) {
                debug!(%err, "navigation target frame vanished");
            }
        });
    }
}

/// Scripted browser implementing [`BrowserPort`] and [`DomProvider`].
#[derive(Clone)]
pub struct ScriptedBrowser {
    shared: Arc<HostShared>,
}

impl ScriptedBrowser {
    pub fn new(load_delay: Duration, nav_delay: Duration) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            shared: Arc::new(HostShared {
                state: Mutex::new(HostState::default()),
                events,
                load_delay,
                nav_delay,
            }),
        }
    }

    /// Build a host from a scenario and open its start page in a first tab.
    pub fn from_scenario(
        scenario: &ScenarioFixture,
        load_delay: Duration,
        nav_delay: Duration,
    ) -> (Self, FrameId) {
        let browser = Self::new(load_delay, nav_delay);
        for (url, fixture) in &scenario.routes {
            browser.set_route(url, fixture.clone());
        }
        let frame = browser.open_frame(&scenario.start_url);
        (browser, frame)
    }

    /// Serve `fixture` at `url` from the next load on.
    pub fn set_route(&self, url: &str, fixture: PageFixture) {
        self.shared
            .state
            .lock()
            .routes
            .insert(url.to_string(), fixture);
    }

    pub fn open_frame(&self, url: &str) -> FrameId {
        self.shared.open(url)
    }

    pub fn close_frame(&self, frame: &FrameId) {
        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.frames.remove(frame).is_some();
            state.order.retain(|f| f != frame);
            if state.active.as_ref() == Some(frame) {
                state.active = state.order.last().cloned();
            }
            removed
        };
        if removed {
            let _ = self.shared.events.send(FrameEvent::Closed {
                frame: frame.clone(),
            });
        }
    }

    pub fn activate(&self, frame: &FrameId) -> Result<(), HostError> {
        let mut state = self.shared.state.lock();
        if !state.frames.contains_key(frame) {
            return Err(HostError::FrameNotFound(frame.clone()));
        }
        state.active = Some(frame.clone());
        Ok(())
    }

    pub fn frames(&self) -> Vec<FrameId> {
        self.shared.state.lock().order.clone()
    }

    pub fn journal(&self) -> Vec<HostAction> {
        self.shared.state.lock().journal.clone()
    }

    pub fn reload_count(&self, frame: &FrameId) -> usize {
        self.journal()
            .iter()
            .filter(|action| matches!(action, HostAction::Reload { frame: f } if f == frame))
            .count()
    }
}

#[async_trait]
impl BrowserPort for ScriptedBrowser {
    async fn active_frame(&self) -> Result<FrameId, HostError> {
        self.shared
            .state
            .lock()
            .active
            .clone()
            .ok_or(HostError::NoActiveFrame)
    }

    async fn frame_url(&self, frame: &FrameId) -> Result<String, HostError> {
        self.shared
            .state
            .lock()
            .frames
            .get(frame)
            .map(|slot| slot.url.clone())
            .ok_or_else(|| HostError::FrameNotFound(frame.clone()))
    }

    async fn reload(&self, frame: &FrameId) -> Result<(), HostError> {
        let url = self.frame_url(frame).await?;
        self.shared.record(HostAction::Reload {
            frame: frame.clone(),
        });
        sleep(self.shared.load_delay).await;
        self.shared.load(frame, &url)
    }

    async fn navigate(&self, frame: &FrameId, url: &str) -> Result<(), HostError> {
        self.frame_url(frame).await?;
        self.shared.record(HostAction::Navigate {
            frame: frame.clone(),
            url: url.to_string(),
        });
        sleep(self.shared.load_delay).await;
        self.shared.load(frame, url)
    }

    fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.shared.events.subscribe()
    }
}

impl DomProvider for ScriptedBrowser {
    fn document(&self, frame: &FrameId) -> Option<DocumentHandle> {
        let state = self.shared.state.lock();
        let slot = state.frames.get(frame)?;
        Some(DocumentHandle {
            generation: slot.generation,
            dom: slot.page.clone(),
        })
    }
}

/// Document built from a [`PageFixture`].
pub struct ScriptedPage {
    host: Weak<HostShared>,
    frame: FrameId,
    generation: u64,
    fixture: PageFixture,
    selector_open: Mutex<bool>,
}

impl ScriptedPage {
    fn new(host: Weak<HostShared>, frame: FrameId, generation: u64, fixture: PageFixture) -> Self {
        Self {
            host,
            frame,
            generation,
            fixture,
            selector_open: Mutex::new(false),
        }
    }

    fn live_host(&self) -> Result<Arc<HostShared>, DomError> {
        let host = self
            .host
            .upgrade()
            .ok_or_else(|| DomError::Detached("browser shut down".into()))?;
        if !host.is_current(&self.frame, self.generation) {
            return Err(DomError::Detached(format!(
                "frame {} no longer shows this document",
                self.frame
            )));
        }
        Ok(host)
    }
}

#[async_trait]
impl PageDom for ScriptedPage {
    async fn booking_cards(&self) -> Result<Vec<BookingCard>, DomError> {
        self.live_host()?;
        Ok(self
            .fixture
            .bookings
            .iter()
            .enumerate()
            .map(|(index, booking)| BookingCard {
                index,
                layout: if booking.hidden {
                    LayoutBox::default()
                } else {
                    LayoutBox::new(320.0, 96.0)
                },
                date_text: Some(booking.date.clone()),
                class_label: Some(booking.vehicle_class.clone()),
                payout_text: booking.payout.clone(),
            })
            .collect())
    }

    async fn click_booking(&self, index: usize) -> Result<(), DomError> {
        let host = self.live_host()?;
        let booking = self
            .fixture
            .bookings
            .get(index)
            .ok_or_else(|| DomError::ElementMissing(format!("booking #{index}")))?;
        host.record(HostAction::ClickBooking {
            frame: self.frame.clone(),
            index,
        });
        if let Some(href) = &booking.href {
            host.navigate_later(self.frame.clone(), href.clone(), booking.new_tab);
        }
        Ok(())
    }

    async fn open_vehicle_selector(&self) -> Result<(), DomError> {
        self.live_host()?;
        if self.fixture.vehicle_options.is_empty() {
            return Err(DomError::ElementMissing("vehicle selector".into()));
        }
        *self.selector_open.lock() = true;
        Ok(())
    }

    async fn vehicle_options(&self) -> Result<Vec<String>, DomError> {
        self.live_host()?;
        if *self.selector_open.lock() {
            Ok(self.fixture.vehicle_options.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn choose_vehicle_option(&self, index: usize) -> Result<(), DomError> {
        let host = self.live_host()?;
        if index >= self.fixture.vehicle_options.len() {
            return Err(DomError::ElementMissing(format!("vehicle option #{index}")));
        }
        host.record(HostAction::ChooseVehicle {
            frame: self.frame.clone(),
            index,
        });
        Ok(())
    }

    async fn notify_vehicle_change(&self) -> Result<(), DomError> {
        let host = self.live_host()?;
        host.record(HostAction::VehicleChange {
            frame: self.frame.clone(),
        });
        Ok(())
    }

    async fn close_vehicle_selector(&self) -> Result<(), DomError> {
        *self.selector_open.lock() = false;
        Ok(())
    }

    async fn confirmation_control(&self) -> Result<Option<LayoutBox>, DomError> {
        self.live_host()?;
        Ok(match self.fixture.confirmation {
            ConfirmationFixture::Absent => None,
            ConfirmationFixture::Hidden => Some(LayoutBox::default()),
            ConfirmationFixture::Visible => Some(LayoutBox::new(160.0, 44.0)),
        })
    }

    async fn visible_error_banner(&self) -> Result<Option<String>, DomError> {
        self.live_host()?;
        Ok(self.fixture.error_banner.clone())
    }

    async fn click_confirmation(&self) -> Result<(), DomError> {
        let host = self.live_host()?;
        if self.fixture.confirmation != ConfirmationFixture::Visible {
            return Err(DomError::NotRendered("confirmation control".into()));
        }
        host.record(HostAction::Confirm {
            frame: self.frame.clone(),
        });
        if let Some(href) = &self.fixture.confirm_href {
            host.navigate_later(self.frame.clone(), href.clone(), false);
        }
        Ok(())
    }
}
