//! DOM port of the booking page.
//!
//! The actor is hard-wired to one page layout, so the port speaks in terms of
//! that layout (booking cards, the vehicle selector, the confirmation control)
//! instead of generic selectors. Hosts implement it on top of whatever drives
//! the real document.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DomError;

/// Rendered size of an element. A zero box means the element is hidden.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutBox {
    pub width: f64,
    pub height: f64,
}

impl LayoutBox {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_rendered(&self) -> bool {
        self.width > 0.0 || self.height > 0.0
    }
}

/// Text extracted from one booking card, in document order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingCard {
    pub index: usize,
    pub layout: LayoutBox,
    pub date_text: Option<String>,
    pub class_label: Option<String>,
    pub payout_text: Option<String>,
}

#[async_trait]
pub trait PageDom: Send + Sync {
    /// All booking cards currently in the document, hidden ones included.
    async fn booking_cards(&self) -> Result<Vec<BookingCard>, DomError>;

    /// Invoke the click affordance of the card at `index`.
    async fn click_booking(&self, index: usize) -> Result<(), DomError>;

    async fn open_vehicle_selector(&self) -> Result<(), DomError>;

    /// Option labels of the vehicle selector, in order. Empty until the
    /// selector has been opened and populated.
    async fn vehicle_options(&self) -> Result<Vec<String>, DomError>;

    async fn choose_vehicle_option(&self, index: usize) -> Result<(), DomError>;

    /// Fire the selector's change notification.
    async fn notify_vehicle_change(&self) -> Result<(), DomError>;

    async fn close_vehicle_selector(&self) -> Result<(), DomError>;

    /// Layout of the confirmation control, `None` when absent.
    async fn confirmation_control(&self) -> Result<Option<LayoutBox>, DomError>;

    /// Text of a visible error banner, `None` when no banner is shown.
    async fn visible_error_banner(&self) -> Result<Option<String>, DomError>;

    async fn click_confirmation(&self) -> Result<(), DomError>;
}
