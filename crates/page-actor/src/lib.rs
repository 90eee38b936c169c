//! Page actor for the booking workflow.
//!
//! The actor runs against one frame's document through the [`PageDom`] port
//! and performs exactly one phase per invocation:
//!
//! * phase A: find the first visible booking card matching the run config and
//!   click it,
//! * phase B: pick the matching vehicle in the selector,
//! * phase C: press the confirmation control when no error banner is visible.
//!
//! In dry-run mode phase A still inspects and matches the cards but only logs
//! the click; phases B and C are logged simulations that never touch the page.
//! Each reports a synthesized success.

pub mod actor;
pub mod dom;
pub mod errors;
pub mod matching;

pub use actor::{ActorTiming, BookingActor};
pub use dom::{BookingCard, LayoutBox, PageDom};
pub use errors::{DomError, PhaseFailure};
