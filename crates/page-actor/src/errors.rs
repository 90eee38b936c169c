//! Error types for DOM access

use thiserror::Error;

/// Faults raised while touching the page DOM.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    /// Expected element is absent from the document
    #[error("Element not found: {0}")]
    ElementMissing(String),

    /// Element exists but has no layout box
    #[error("Element not rendered: {0}")]
    NotRendered(String),

    /// The document was replaced by a navigation or reload
    #[error("Document detached: {0}")]
    Detached(String),

    /// Internal error raised by the DOM host
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a phase answers with a failure result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PhaseFailure {
    #[error("No booking elements found")]
    NoBookingElements,

    #[error("No booking matched the configured date window and vehicle classes ({inspected} visible bookings inspected)")]
    NoMatchingBooking { inspected: usize },

    #[error("Vehicle selector has no options")]
    SelectorEmpty,

    #[error("No vehicle option matches the configured classes (options: {0})")]
    NoMatchingVehicle(String),

    #[error("Confirmation control not found")]
    ConfirmationMissing,

    #[error("Confirmation control is not rendered")]
    ConfirmationNotRendered,

    #[error("Page shows an error: {0}")]
    ErrorBannerVisible(String),

    #[error(transparent)]
    Dom(#[from] DomError),
}
