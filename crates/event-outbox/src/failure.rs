//! Reporting of events the queue gave up on.

use storefront_event::Event;
use tracing::error;

/// Why an event left the queue without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rejected by the forwarder (invalid or permanent upstream failure).
    Permanent,
    /// Every allowed attempt failed transiently.
    Exhausted,
    /// The transport never became ready; the queue stopped dispatching.
    Unavailable,
}

/// A delivery failure handed to the observability collaborator.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub kind: FailureKind,
    /// The dropped event. `None` for queue-level failures.
    pub event: Option<Event>,
    /// Submissions made for this event.
    pub attempts: u32,
    pub reason: String,
}

/// Receives failures. Must not block; it runs on the dispatch task.
pub trait FailureSink: Send + Sync {
    fn record(&self, failure: DeliveryFailure);
}

/// Default sink: one structured error log line per failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn record(&self, failure: DeliveryFailure) {
        match &failure.event {
            Some(event) => error!(
                kind = ?failure.kind,
                event_type = %event.event_type(),
                visitor_id = %event.visitor_id(),
                page_view_id = %event.page_view_id(),
                attempts = failure.attempts,
                reason = %failure.reason,
                "Tracking event dropped"
            ),
            None => error!(
                kind = ?failure.kind,
                reason = %failure.reason,
                "Tracking queue stopped dispatching"
            ),
        }
    }
}
