//! Retry and refresh policy

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Limits and timers governing one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerPolicy {
    /// Reloads allowed per run before a failing phase becomes fatal.
    pub max_retries: u32,
    /// How long to wait for the booking page after phase A clicked a card.
    #[serde(with = "duration_str")]
    pub navigation_timeout: Duration,
    #[serde(with = "duration_str")]
    pub refresh_min: Duration,
    #[serde(with = "duration_str")]
    pub refresh_max: Duration,
}

impl Default for ControllerPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            navigation_timeout: Duration::from_secs(30),
            refresh_min: Duration::from_secs(20),
            refresh_max: Duration::from_secs(40),
        }
    }
}

/// What to do after a phase failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reload the frame; `attempt` is the new retry count.
    Reload { attempt: u32 },
    GiveUp,
}

impl ControllerPolicy {
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count >= self.max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Reload {
                attempt: retry_count + 1,
            }
        }
    }

    /// Pick the next auto-refresh delay uniformly from the configured window.
    pub fn refresh_delay(&self) -> Duration {
        let (low, high) = self.refresh_window();
        if low == high {
            return low;
        }
        let millis = rand::thread_rng().gen_range(low.as_millis()..=high.as_millis());
        Duration::from_millis(millis as u64)
    }

    fn refresh_window(&self) -> (Duration, Duration) {
        if self.refresh_min > self.refresh_max {
            warn!(
                min = ?self.refresh_min,
                max = ?self.refresh_max,
                "refresh window inverted; using the minimum as a fixed delay"
            );
            return (self.refresh_min, self.refresh_min);
        }
        (self.refresh_min, self.refresh_max)
    }
}

/// Durations written the human way: `30s`, `1m 30s`.
pub mod duration_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(de::Error::custom)
    }
}
