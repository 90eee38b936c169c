//! Bounded run log shared by the controller and the UI.

use std::collections::VecDeque;

use actor_bridge::{publish, UiEvent, UiEventBus};
use parking_lot::Mutex;
use pilot_core_types::{LogEntry, LogLevel};
use tracing::{error, info, warn};

use crate::store::PilotStore;

/// Number of log entries kept in memory and in the store.
pub const LOG_CAPACITY: usize = 100;

/// FIFO ring dropping the oldest entry once full.
#[derive(Debug, Clone)]
pub struct LogRing {
    capacity: usize,
    data: VecDeque<LogEntry>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::new(),
        }
    }

    pub fn from_entries(capacity: usize, entries: Vec<LogEntry>) -> Self {
        let mut ring = Self::new(capacity);
        for entry in entries {
            ring.push(entry);
        }
        ring
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.data.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Log sink: keeps the ring, persists it, pushes `log` events to the UI and
/// mirrors every line to `tracing`.
pub struct RunLog {
    ring: Mutex<LogRing>,
    store: PilotStore,
    bus: UiEventBus,
}

impl RunLog {
    pub fn new(store: PilotStore, bus: UiEventBus) -> Self {
        let history = store.log_history().unwrap_or_else(|err| {
            warn!(%err, "discarding unreadable log history");
            Vec::new()
        });
        Self {
            ring: Mutex::new(LogRing::from_entries(LOG_CAPACITY, history)),
            store,
            bus,
        }
    }

    pub fn record(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Error => error!(target: "run-log", "{}", entry.text),
            LogLevel::Info | LogLevel::Success => info!(target: "run-log", "{}", entry.text),
        }

        let snapshot = {
            let mut ring = self.ring.lock();
            ring.push(entry.clone());
            ring.snapshot()
        };
        if let Err(err) = self.store.set_log_history(&snapshot) {
            warn!(%err, "failed to persist log history");
        }
        publish(&self.bus, UiEvent::Log(entry));
    }

    pub fn info(&self, text: impl Into<String>) {
        self.record(LogEntry::info(text));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.record(LogEntry::error(text));
    }

    pub fn success(&self, text: impl Into<String>) {
        self.record(LogEntry::success(text));
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.ring.lock().snapshot()
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
        if let Err(err) = self.store.set_log_history(&[]) {
            warn!(%err, "failed to clear log history");
        }
    }
}
