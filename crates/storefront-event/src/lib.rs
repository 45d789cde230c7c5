//! Canonical storefront user-event model.
//!
//! This crate defines the unit of work carried by the tracking pipeline:
//!
//! - [`Event`]: an immutable, validated user interaction (page view, search,
//!   cart mutation, purchase) bound to a visitor and a page load.
//! - [`EventInput`]: the raw inputs a UI action hands to the tracker.
//! - [`EventRecord`]: the flat camelCase wire shape exchanged between the
//!   client queue and the forwarder.
//!
//! Construction from UI inputs only checks what the pipeline cannot work
//! without (known type, visitor id, required payload fields). Decoding an
//! [`EventRecord`] runs the full schema check used by the forwarder.
//!
//! Pure types: no I/O, no async.

mod error;
mod input;
mod record;
mod types;

pub use error::{EventResult, InvalidEvent};
pub use input::EventInput;
pub use record::{EventRecord, ATTEMPT_HEADER};
pub use types::{
    Event, EventPayload, EventType, PageContext, ProductDetail, ProductRef, PurchaseTransaction,
    DEFAULT_CURRENCY_CODE,
};
