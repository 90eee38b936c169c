//! Pilot configuration file.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use page_actor::ActorTiming;
use pilot_core_types::RunConfig;
use run_controller::policy::duration_str;
use run_controller::ControllerPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

/// Environment variable overriding the allow-listed domain.
pub const DOMAIN_ENV: &str = "BOOKPILOT_DOMAIN";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    /// Domain automation is allowed on. Written to the settings store at
    /// startup when present.
    pub allow_listed_domain: Option<String>,
    /// JSON file holding settings, log history and the in-progress flag.
    pub store_path: PathBuf,
    pub controller: ControllerPolicy,
    pub actor: ActorSettings,
    /// Upper bound for one actor round-trip.
    #[serde(with = "duration_str")]
    pub phase_deadline: Duration,
    /// Run configuration used when the command line does not give one.
    pub form_defaults: Option<RunConfig>,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            allow_listed_domain: None,
            store_path: default_store_path(),
            controller: ControllerPolicy::default(),
            actor: ActorSettings::default(),
            phase_deadline: Duration::from_secs(20),
            form_defaults: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorSettings {
    #[serde(with = "duration_str")]
    pub render_settle: Duration,
    #[serde(with = "duration_str")]
    pub options_settle: Duration,
}

impl Default for ActorSettings {
    fn default() -> Self {
        let timing = ActorTiming::default();
        Self {
            render_settle: timing.render_settle,
            options_settle: timing.options_settle,
        }
    }
}

impl From<&ActorSettings> for ActorTiming {
    fn from(settings: &ActorSettings) -> Self {
        ActorTiming {
            render_settle: settings.render_settle,
            options_settle: settings.options_settle,
        }
    }
}

impl PilotConfig {
    /// Apply `BOOKPILOT_DOMAIN` on top of the file contents.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(domain) = env::var(DOMAIN_ENV) {
            let domain = domain.trim();
            if !domain.is_empty() {
                info!(domain, "allow-listed domain taken from {}", DOMAIN_ENV);
                self.allow_listed_domain = Some(domain.to_string());
            }
        }
    }
}

impl PilotConfig {
    /// Value under a dotted key such as `controller.max_retries`.
    pub fn value_at(&self, key: &str) -> Result<JsonValue> {
        let doc = serde_json::to_value(self)?;
        doc.pointer(&key_pointer(key)?)
            .cloned()
            .with_context(|| format!("{key} is not a configuration key"))
    }

    /// Copy of this configuration with one existing key replaced. `raw` is
    /// read as JSON when it parses and as a plain string otherwise, then the
    /// whole document is checked against the typed schema.
    pub fn with_value(&self, key: &str, raw: &str) -> Result<PilotConfig> {
        let mut doc = serde_json::to_value(self)?;
        let pointer = key_pointer(key)?;
        let (parent, field) = pointer.rsplit_once('/').unwrap_or(("", pointer.as_str()));
        let Some(JsonValue::Object(section)) = doc.pointer_mut(parent) else {
            bail!("{key} is not a configuration key");
        };
        let Some(slot) = section.get_mut(field) else {
            bail!("{key} is not a configuration key");
        };
        *slot = serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()));
        serde_json::from_value(doc)
            .with_context(|| format!("{raw} is not a valid value for {key}"))
    }

    /// Reject saved form defaults that could never start a run.
    pub fn validate(&self) -> Result<()> {
        if let Some(defaults) = &self.form_defaults {
            defaults.validate().context("form_defaults")?;
        }
        Ok(())
    }
}

fn key_pointer(key: &str) -> Result<String> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty() || segment.contains(['/', '~'])) {
        bail!("malformed configuration key '{key}'");
    }
    Ok(format!("/{}", segments.join("/")))
}

fn default_store_path() -> PathBuf {
    match dirs::data_dir() {
        Some(mut path) => {
            path.push("bookpilot");
            path.push("state.json");
            path
        }
        None => PathBuf::from(".bookpilot/state.json"),
    }
}
