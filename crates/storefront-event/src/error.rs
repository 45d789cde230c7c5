//! Validation error for malformed events.

use crate::EventType;
use thiserror::Error;

/// A malformed event. Never retried; surfaced as a 400 by the forwarder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidEvent {
    /// No event type was supplied.
    #[error("Missing event type")]
    MissingEventType,

    /// The event type is not one of the recognized variants.
    #[error("Unrecognized event type: {0}")]
    UnknownEventType(String),

    /// The visitor id is absent or blank.
    #[error("Missing visitor id")]
    MissingVisitorId,

    /// A field required by the event type is absent.
    #[error("{event_type} event requires {field}")]
    MissingField {
        event_type: EventType,
        field: &'static str,
    },

    /// A field was supplied that the event type does not carry.
    #[error("{field} is not allowed on {event_type} events")]
    ShapeMismatch {
        event_type: EventType,
        field: &'static str,
    },

    /// A field is present but its value is out of range.
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Result type alias using InvalidEvent.
pub type EventResult<T> = Result<T, InvalidEvent>;
