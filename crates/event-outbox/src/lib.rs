//! Client-side tracking outbox.
//!
//! This crate provides:
//! - DispatchQueue: page-scoped FIFO with exactly one submission in flight,
//!   bounded retry with exponential backoff, and drop-oldest capacity
//! - PageTracker: owns the page identity and the queue for one page load
//! - HttpIngressTransport: submits single events to the forwarder
//! - HttpBeacon: fire-and-forget bulk flush used when the page is torn down
//!
//! # Core Invariants
//!
//! 1. **One In-Flight**: a queue never has two submissions outstanding, so the
//!    forwarder sees a page's events in enqueue order
//! 2. **Invisible Failures**: delivery failures go to a [`FailureSink`], never
//!    to the caller of `track`/`enqueue`
//! 3. **Bounded Unload**: teardown hands the remaining entries to the beacon in
//!    one call and never waits for an answer
//!
//! ```text
//! UI action -> PageTracker::track -> DispatchQueue -> IngressTransport -> forwarder
//!                                         |
//!                             unload() or drop -> UnloadBeacon (one batch)
//! ```

mod beacon;
mod error;
mod failure;
mod queue;
mod tracker;
mod transport;

#[cfg(test)]
mod tests;

pub use beacon::{HttpBeacon, UnloadBatch, UnloadBeacon, UnloadReport};
pub use error::{DeliveryError, OutboxError, OutboxResult};
pub use failure::{DeliveryFailure, FailureKind, FailureSink, TracingFailureSink};
pub use queue::{
    DispatchParts, DispatchQueue, DispatchState, EnqueueOutcome, QueueConfig, QueueEntry,
    QueueStatus,
};
pub use storefront_event::ATTEMPT_HEADER;
pub use tracker::PageTracker;
pub use transport::{classify_status, HttpIngressTransport, IngressTransport, TransportConfig};
