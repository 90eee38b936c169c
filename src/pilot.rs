//! Wiring of store, log, gate, bridge and controller around one browser.

use std::sync::Arc;

use actor_bridge::{ui_event_bus, DomProvider, InProcessBridge, UiEvent};
use anyhow::{Context, Result};
use browser_host::BrowserPort;
use pilot_state_center::{FileKvStore, PilotStore, RunLog};
use run_controller::{ControllerDeps, ControllerHandle, RunController};
use site_gate::SiteGate;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::PilotConfig;

const UI_EVENT_CAPACITY: usize = 1024;

/// Open the settings store named by the configuration.
pub fn open_store(config: &PilotConfig) -> Result<PilotStore> {
    let kv = FileKvStore::open(&config.store_path).with_context(|| {
        format!(
            "Failed to open settings store at {}",
            config.store_path.display()
        )
    })?;
    Ok(PilotStore::new(kv))
}

/// A running controller and the handles the CLI talks to.
pub struct Pilot {
    pub handle: ControllerHandle,
    pub store: PilotStore,
    pub log: Arc<RunLog>,
    pub gate: Arc<SiteGate>,
    /// UI event stream. Only one consumer is expected.
    pub events: broadcast::Receiver<UiEvent>,
    task: JoinHandle<()>,
}

impl Pilot {
    /// Start the controller against `browser`. A domain from the
    /// configuration replaces the stored one.
    pub fn launch<B>(config: &PilotConfig, store: PilotStore, browser: Arc<B>) -> Result<Self>
    where
        B: BrowserPort + DomProvider + 'static,
    {
        if let Some(domain) = config.allow_listed_domain.as_deref() {
            store
                .set_allow_listed_domain(Some(domain))
                .context("Failed to store allow-listed domain")?;
        }
        let domain = store
            .allow_listed_domain()
            .context("Failed to read allow-listed domain")?;

        let (bus, events) = ui_event_bus(UI_EVENT_CAPACITY);
        let log = Arc::new(RunLog::new(store.clone(), bus.clone()));
        let gate = Arc::new(SiteGate::new(domain.clone()));
        let bridge = InProcessBridge::new(
            browser.clone(),
            (&config.actor).into(),
            config.phase_deadline,
        );

        let deps = ControllerDeps {
            browser,
            bridge,
            gate: gate.clone(),
            store: store.clone(),
            log: log.clone(),
            bus,
        };
        let (handle, task) = RunController::spawn(deps, config.controller.clone());
        info!(domain = ?domain, "pilot launched");

        Ok(Self {
            handle,
            store,
            log,
            gate,
            events,
            task,
        })
    }

    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(err) = self.task.await {
            debug!(%err, "controller task ended abnormally");
        }
    }
}
