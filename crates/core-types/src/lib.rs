//! Shared primitives for the booking pilot.
//!
//! Everything that crosses a crate boundary lives here: frame and run
//! identifiers, the per-run configuration, the phase vocabulary spoken between
//! controller and page actor, and the log record shape consumed by the UI.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a browser tab/frame hosting the target site.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub String);

impl FrameId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for FrameId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for FrameId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one automation run. Regenerated on every start so that
/// responses belonging to an earlier run can be told apart.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One discrete step of the booking workflow.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Match a booking card and click it.
    A,
    /// Choose the vehicle on the post-click page.
    B,
    /// Press the final confirmation control.
    C,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::A => "booking match",
            Phase::B => "vehicle selection",
            Phase::C => "final confirmation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Phase::A => "A",
            Phase::B => "B",
            Phase::C => "C",
        };
        write!(f, "phase {} ({})", tag, self.label())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Success,
    Error,
}

/// Outcome reported by the page actor for a single phase.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub status: PhaseStatus,
    pub message: String,
}

impl PhaseResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: PhaseStatus::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: PhaseStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PhaseStatus::Success
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
    Success,
}

/// A user-facing log line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub level: LogLevel,
}

impl LogEntry {
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
            level,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, text)
    }
}

/// Which phases after the initial click are performed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseToggles {
    #[serde(default = "enabled")]
    pub select_vehicle: bool,
    #[serde(default = "enabled")]
    pub confirm: bool,
}

fn enabled() -> bool {
    true
}

impl Default for PhaseToggles {
    fn default() -> Self {
        Self {
            select_vehicle: true,
            confirm: true,
        }
    }
}

/// Immutable input of one run, submitted by the UI with the start command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub tolerance_days: u32,
    pub vehicle_classes: Vec<String>,
    /// Minimum payout per vehicle class, keyed by class label.
    #[serde(default)]
    pub min_prices: BTreeMap<String, f64>,
    #[serde(default)]
    pub phases: PhaseToggles,
    #[serde(default)]
    pub auto_refresh: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum RunConfigError {
    #[error("at least one vehicle class is required")]
    NoVehicleClass,
    #[error("vehicle class labels must not be blank")]
    BlankVehicleClass,
    #[error("end date {end} is before start date {start}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error("minimum price for '{class}' must be a non-negative number")]
    InvalidMinPrice { class: String },
}

impl RunConfig {
    pub fn new(date: NaiveDate, vehicle_classes: Vec<String>) -> Self {
        Self {
            date,
            end_date: None,
            tolerance_days: 0,
            vehicle_classes,
            min_prices: BTreeMap::new(),
            phases: PhaseToggles::default(),
            auto_refresh: false,
            dry_run: false,
        }
    }

    pub fn validate(&self) -> Result<(), RunConfigError> {
        if self.vehicle_classes.is_empty() {
            return Err(RunConfigError::NoVehicleClass);
        }
        if self.vehicle_classes.iter().any(|c| c.trim().is_empty()) {
            return Err(RunConfigError::BlankVehicleClass);
        }
        if let Some(end) = self.end_date {
            if end < self.date {
                return Err(RunConfigError::InvertedRange {
                    start: self.date,
                    end,
                });
            }
        }
        for (class, price) in &self.min_prices {
            if !price.is_finite() || *price < 0.0 {
                return Err(RunConfigError::InvalidMinPrice {
                    class: class.clone(),
                });
            }
        }
        Ok(())
    }

    /// Inclusive date window accepted by the booking matcher.
    pub fn date_window(&self) -> (NaiveDate, NaiveDate) {
        let slack = Duration::days(i64::from(self.tolerance_days));
        let start = self
            .date
            .checked_sub_signed(slack)
            .unwrap_or(NaiveDate::MIN);
        let end = self
            .end_date
            .unwrap_or(self.date)
            .checked_add_signed(slack)
            .unwrap_or(NaiveDate::MAX);
        (start, end)
    }

    /// Minimum price configured for a class, compared case-insensitively.
    pub fn min_price_for(&self, class: &str) -> Option<f64> {
        let class = class.trim();
        self.min_prices
            .iter()
            .find(|(label, _)| label.trim().eq_ignore_ascii_case(class))
            .map(|(_, price)| *price)
    }
}
