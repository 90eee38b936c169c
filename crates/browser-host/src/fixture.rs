//! Page fixtures describing the booking site for the scripted host.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFixture {
    pub date: String,
    pub vehicle_class: String,
    #[serde(default)]
    pub payout: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    /// Address loaded when the card is clicked.
    #[serde(default)]
    pub href: Option<String>,
    /// Open `href` in a new tab instead of the clicked one.
    #[serde(default)]
    pub new_tab: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationFixture {
    #[default]
    Absent,
    Hidden,
    Visible,
}

/// Content of one page of the booking site.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFixture {
    #[serde(default)]
    pub bookings: Vec<BookingFixture>,
    #[serde(default)]
    pub vehicle_options: Vec<String>,
    #[serde(default)]
    pub confirmation: ConfirmationFixture,
    #[serde(default)]
    pub error_banner: Option<String>,
    /// Address loaded after the confirmation click.
    #[serde(default)]
    pub confirm_href: Option<String>,
}

/// A whole rehearsal scenario: where the first tab starts and which page each
/// address serves.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioFixture {
    pub start_url: String,
    #[serde(default)]
    pub routes: BTreeMap<String, PageFixture>,
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scenario: {0}")]
    Parse(String),
}

impl ScenarioFixture {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::parse(&raw)
    }

    /// Accepts JSON or YAML.
    pub fn parse(raw: &str) -> Result<Self, FixtureError> {
        match serde_json::from_str(raw) {
            Ok(scenario) => Ok(scenario),
            Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
                FixtureError::Parse(format!("json error: {json_err}; yaml error: {yaml_err}"))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_scenario() {
        let raw = r#"
startUrl: https://rides.example.com/list
routes:
  https://rides.example.com/list:
    bookings:
      - date: "2025-06-01"
        vehicleClass: Sedan
        payout: "$80"
        href: https://rides.example.com/booking/new/1
  https://rides.example.com/booking/new/1:
    vehicleOptions: [Compact, Sedan]
    confirmation: visible
"#;
        let scenario = ScenarioFixture::parse(raw).unwrap();
        assert_eq!(scenario.start_url, "https://rides.example.com/list");
        let list = &scenario.routes["https://rides.example.com/list"];
        assert_eq!(list.bookings.len(), 1);
        assert!(!list.bookings[0].hidden);
        let booking = &scenario.routes["https://rides.example.com/booking/new/1"];
        assert_eq!(booking.confirmation, ConfirmationFixture::Visible);
        assert_eq!(booking.vehicle_options, vec!["Compact", "Sedan"]);
    }

    #[test]
    fn reports_both_parse_errors() {
        let err = ScenarioFixture::parse("startUrl: [").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("json error"));
        assert!(message.contains("yaml error"));
    }
}
