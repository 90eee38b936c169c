//! Safety gate for page automation.
//!
//! No actor is established and no DOM action happens unless the frame address
//! passes one of the two predicates below. The predicates are pure; [`SiteGate`]
//! wraps them with an audit channel so every decision is observable.

use std::time::SystemTime;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

/// Literal path prefix of the page reached after clicking a booking.
pub const NEW_BOOKING_PATH: &str = "/booking/new";

/// Reasons a frame address is refused.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateError {
    #[error("no allow-listed domain configured")]
    DomainUnset,
    #[error("{url} is not on allow-listed domain {domain}")]
    DomainMismatch { url: String, domain: String },
    #[error("invalid frame address {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("host '{host}' does not equal allow-listed domain {domain}")]
    HostMismatch { host: String, domain: String },
    #[error("path '{0}' is not the new-booking page")]
    PathMismatch(String),
}

/// Outcome of [`check_domain`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainDecision {
    Allow,
    Deny(GateError),
}

impl DomainDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, DomainDecision::Allow)
    }

    pub fn into_result(self) -> Result<(), GateError> {
        match self {
            DomainDecision::Allow => Ok(()),
            DomainDecision::Deny(err) => Err(err),
        }
    }
}

/// Outcome of [`check_navigation_pattern`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternMatch {
    Matches,
    NoMatch(GateError),
}

impl PatternMatch {
    pub fn is_match(&self) -> bool {
        matches!(self, PatternMatch::Matches)
    }
}

/// Substring check used before the first actor establishment of a run.
/// Fails closed when the domain is unset or blank.
pub fn check_domain(frame_url: &str, allow_listed_domain: Option<&str>) -> DomainDecision {
    let Some(domain) = normalized_domain(allow_listed_domain) else {
        return DomainDecision::Deny(GateError::DomainUnset);
    };
    if frame_url.contains(domain) {
        DomainDecision::Allow
    } else {
        DomainDecision::Deny(GateError::DomainMismatch {
            url: frame_url.to_string(),
            domain: domain.to_string(),
        })
    }
}

/// Path-anchored check for the post-click page: `http(s)://<domain>/booking/new...`.
pub fn check_navigation_pattern(frame_url: &str, allow_listed_domain: Option<&str>) -> PatternMatch {
    let Some(domain) = normalized_domain(allow_listed_domain) else {
        return PatternMatch::NoMatch(GateError::DomainUnset);
    };

    let parsed = match Url::parse(frame_url) {
        Ok(url) => url,
        Err(err) => {
            return PatternMatch::NoMatch(GateError::InvalidUrl {
                url: frame_url.to_string(),
                reason: err.to_string(),
            })
        }
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return PatternMatch::NoMatch(GateError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    let host = parsed.host_str().unwrap_or_default();
    if !host.eq_ignore_ascii_case(domain) {
        return PatternMatch::NoMatch(GateError::HostMismatch {
            host: host.to_string(),
            domain: domain.to_string(),
        });
    }

    let path = parsed.path();
    let on_booking_page = path
        .strip_prefix(NEW_BOOKING_PATH)
        .map(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(false);
    if !on_booking_page {
        return PatternMatch::NoMatch(GateError::PathMismatch(path.to_string()));
    }

    PatternMatch::Matches
}

fn normalized_domain(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|domain| !domain.is_empty())
}

/// Which predicate produced an audit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateCheck {
    Domain,
    NavigationPattern,
}

/// Record emitted for every gate decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateAudit {
    pub check: GateCheck,
    pub url: String,
    pub allowed: bool,
    pub reason: Option<String>,
    pub timestamp: SystemTime,
}

/// Gate bound to the user's allow-listed domain. The domain is re-read from
/// settings at the start of every run.
pub struct SiteGate {
    domain: RwLock<Option<String>>,
    events: broadcast::Sender<GateAudit>,
}

impl SiteGate {
    pub fn new(domain: Option<String>) -> Self {
        let (events, _rx) = broadcast::channel(64);
        Self {
            domain: RwLock::new(domain),
            events,
        }
    }

    pub fn domain(&self) -> Option<String> {
        self.domain.read().clone()
    }

    pub fn set_domain(&self, domain: Option<String>) {
        debug!(target: "site-gate", ?domain, "allow-listed domain updated");
        *self.domain.write() = domain;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GateAudit> {
        self.events.subscribe()
    }

    pub fn check_domain(&self, frame_url: &str) -> Result<(), GateError> {
        let decision = check_domain(frame_url, self.domain.read().as_deref());
        let reason = match &decision {
            DomainDecision::Allow => None,
            DomainDecision::Deny(err) => Some(err.to_string()),
        };
        self.publish(GateCheck::Domain, frame_url, reason);
        decision.into_result()
    }

    pub fn check_navigation_pattern(&self, frame_url: &str) -> PatternMatch {
        let decision = check_navigation_pattern(frame_url, self.domain.read().as_deref());
        let reason = match &decision {
            PatternMatch::Matches => None,
            PatternMatch::NoMatch(err) => Some(err.to_string()),
        };
        self.publish(GateCheck::NavigationPattern, frame_url, reason);
        decision
    }

    fn publish(&self, check: GateCheck, url: &str, reason: Option<String>) {
        match &reason {
            None => debug!(target: "site-gate", ?check, url, "gate allowed"),
            Some(reason) if check == GateCheck::Domain => {
                warn!(target: "site-gate", url, %reason, "gate denied")
            }
            Some(reason) => debug!(target: "site-gate", url, %reason, "navigation did not match"),
        }
        let audit = GateAudit {
            check,
            url: url.to_string(),
            allowed: reason.is_none(),
            reason,
            timestamp: SystemTime::now(),
        };
        // No subscribers is fine; audits are best-effort observations.
        let _ = self.events.send(audit);
    }
}
