//! Page-scoped dispatch queue.
//!
//! The queue holds entries in FIFO order and a single worker task drains it,
//! one submission at a time. Retries go back to the head of the queue so the
//! ordering seen by the forwarder never changes.

use crate::beacon::{UnloadBatch, UnloadBeacon, UnloadReport};
use crate::failure::{DeliveryFailure, FailureKind, FailureSink, TracingFailureSink};
use crate::transport::IngressTransport;
use crate::DeliveryError;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use storefront_event::Event;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of queued entries. The oldest is evicted past this.
    pub capacity: usize,
    /// Maximum number of submissions per entry.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// Upper bound on the retry delay.
    pub backoff_max: Duration,
    /// How long to wait for the transport to become ready.
    pub readiness_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
            readiness_timeout: Duration::from_secs(10),
        }
    }
}

impl QueueConfig {
    /// Delay before retrying an entry that has failed `attempts` times.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }

    fn effective_capacity(&self) -> usize {
        self.capacity.max(1)
    }

    fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// An event plus its delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub event: Event,
    /// Submissions made so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_failure: Option<String>,
}

impl QueueEntry {
    fn new(event: Event) -> Self {
        Self {
            event,
            attempts: 0,
            enqueued_at: Utc::now(),
            last_failure: None,
        }
    }
}

/// Result of [`DispatchQueue::enqueue`].
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    Queued,
    /// The queue was at capacity and its oldest entry was evicted.
    QueueFull { dropped: Event },
}

/// Where the dispatch worker currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Sending,
    BackingOff,
    /// The transport never became ready. Nothing more will be sent.
    Unavailable,
}

/// Snapshot of a queue, published after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub state: DispatchState,
    pub pending: usize,
    pub in_flight: bool,
    pub delivered: u64,
    pub failed: u64,
}

impl QueueStatus {
    /// True once there is nothing left the worker will do on its own.
    pub fn is_settled(&self) -> bool {
        match self.state {
            DispatchState::Unavailable => true,
            DispatchState::Idle => self.pending == 0 && !self.in_flight,
            DispatchState::Sending | DispatchState::BackingOff => false,
        }
    }
}

/// Collaborators of a queue.
pub struct DispatchParts {
    pub transport: Arc<dyn IngressTransport>,
    pub beacon: Arc<dyn UnloadBeacon>,
    pub failures: Arc<dyn FailureSink>,
    /// Resolves when the transport is usable. Awaited once before the first send.
    pub readiness: Option<BoxFuture<'static, ()>>,
}

impl DispatchParts {
    pub fn new(transport: Arc<dyn IngressTransport>, beacon: Arc<dyn UnloadBeacon>) -> Self {
        Self {
            transport,
            beacon,
            failures: Arc::new(TracingFailureSink),
            readiness: None,
        }
    }

    pub fn with_failures(mut self, failures: Arc<dyn FailureSink>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_readiness<F>(mut self, readiness: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.readiness = Some(Box::pin(readiness));
        self
    }
}

struct Inner {
    entries: VecDeque<QueueEntry>,
    state: DispatchState,
    in_flight: bool,
    delivered: u64,
    failed: u64,
    closed: bool,
}

struct Shared {
    config: QueueConfig,
    inner: Mutex<Inner>,
    wake: Notify,
    status: watch::Sender<QueueStatus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the current state. Called with the lock held.
    fn publish(&self, inner: &Inner) {
        self.status.send_replace(QueueStatus {
            state: inner.state,
            pending: inner.entries.len(),
            in_flight: inner.in_flight,
            delivered: inner.delivered,
            failed: inner.failed,
        });
    }

    fn take_head(&self) -> Option<QueueEntry> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        let entry = inner.entries.pop_front()?;
        inner.in_flight = true;
        inner.state = DispatchState::Sending;
        self.publish(&inner);
        Some(entry)
    }

    fn settle(&self, delivered: bool) {
        let mut inner = self.lock();
        inner.in_flight = false;
        inner.state = DispatchState::Idle;
        if delivered {
            inner.delivered += 1;
        } else {
            inner.failed += 1;
        }
        self.publish(&inner);
    }

    /// Put a failed entry back at the head. Returns false if the queue closed meanwhile.
    fn requeue(&self, entry: QueueEntry) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.entries.push_front(entry);
        inner.in_flight = false;
        inner.state = DispatchState::BackingOff;
        self.publish(&inner);
        true
    }

    fn mark_unavailable(&self) -> usize {
        let mut inner = self.lock();
        inner.state = DispatchState::Unavailable;
        self.publish(&inner);
        inner.entries.len()
    }
}

/// FIFO queue with exactly one submission in flight.
///
/// Created per page load and consumed by [`DispatchQueue::unload`].
pub struct DispatchQueue {
    shared: Arc<Shared>,
    beacon: Arc<dyn UnloadBeacon>,
    worker: JoinHandle<()>,
}

impl DispatchQueue {
    /// Start a queue and its dispatch worker on the current tokio runtime.
    pub fn start(config: QueueConfig, parts: DispatchParts) -> Self {
        let (status, _) = watch::channel(QueueStatus {
            state: DispatchState::Idle,
            pending: 0,
            in_flight: false,
            delivered: 0,
            failed: 0,
        });

        let shared = Arc::new(Shared {
            config,
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                state: DispatchState::Idle,
                in_flight: false,
                delivered: 0,
                failed: 0,
                closed: false,
            }),
            wake: Notify::new(),
            status,
        });

        let worker = tokio::spawn(run_worker(
            shared.clone(),
            parts.transport,
            parts.failures,
            parts.readiness,
        ));

        Self {
            shared,
            beacon: parts.beacon,
            worker,
        }
    }

    /// Append an event. Never blocks and never fails.
    pub fn enqueue(&self, event: Event) -> EnqueueOutcome {
        let capacity = self.shared.config.effective_capacity();
        let mut dropped = None;
        {
            let mut inner = self.shared.lock();
            if inner.entries.len() >= capacity {
                dropped = inner.entries.pop_front();
            }
            inner.entries.push_back(QueueEntry::new(event));
            self.shared.publish(&inner);
        }
        self.shared.wake.notify_one();

        match dropped {
            Some(entry) => {
                warn!(
                    capacity = capacity,
                    event_type = %entry.event.event_type(),
                    page_view_id = %entry.event.page_view_id(),
                    "Tracking queue full, dropped oldest event"
                );
                EnqueueOutcome::QueueFull {
                    dropped: entry.event,
                }
            }
            None => EnqueueOutcome::Queued,
        }
    }

    pub fn status(&self) -> QueueStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.shared.status.subscribe()
    }

    /// Wait until the queue is drained and idle, or unavailable.
    pub async fn wait_idle(&self) -> QueueStatus {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(QueueStatus::is_settled).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        settled
    }

    /// Flush everything still queued through the unload beacon.
    ///
    /// Cancels the in-flight submission, if any. Never blocks and never panics.
    pub fn unload(mut self) -> UnloadReport {
        self.flush_remaining()
    }

    /// Stop the worker and hand the remaining entries to the beacon. Only the
    /// first call flushes; later calls report nothing.
    fn flush_remaining(&mut self) -> UnloadReport {
        self.worker.abort();

        let entries: Vec<QueueEntry> = {
            let mut inner = self.shared.lock();
            if inner.closed {
                return UnloadReport {
                    flushed: 0,
                    handed_off: false,
                };
            }
            inner.closed = true;
            inner.in_flight = false;
            let drained = inner.entries.drain(..).collect();
            self.shared.publish(&inner);
            drained
        };

        if entries.is_empty() {
            debug!("Unload with empty tracking queue");
            return UnloadReport {
                flushed: 0,
                handed_off: false,
            };
        }

        let batch = UnloadBatch::from_entries(&entries);
        let flushed = batch.len();
        let beacon = self.beacon.clone();
        let handed_off = match catch_unwind(AssertUnwindSafe(|| beacon.send(batch))) {
            Ok(accepted) => accepted,
            Err(_) => {
                warn!(count = flushed, "Unload beacon panicked");
                false
            }
        };

        info!(
            count = flushed,
            handed_off = handed_off,
            "Flushed tracking queue on unload"
        );

        UnloadReport {
            flushed,
            handed_off,
        }
    }
}

/// Dropping the queue is a teardown too: whatever is left goes to the beacon.
impl Drop for DispatchQueue {
    fn drop(&mut self) {
        let report = self.flush_remaining();
        if report.flushed > 0 {
            debug!(
                count = report.flushed,
                "Tracking queue dropped without explicit unload"
            );
        }
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    transport: Arc<dyn IngressTransport>,
    failures: Arc<dyn FailureSink>,
    readiness: Option<BoxFuture<'static, ()>>,
) {
    let config = shared.config.clone();

    if let Some(ready) = readiness {
        if tokio::time::timeout(config.readiness_timeout, ready)
            .await
            .is_err()
        {
            let pending = shared.mark_unavailable();
            warn!(
                timeout_ms = config.readiness_timeout.as_millis() as u64,
                pending = pending,
                "Ingress transport not ready, tracking queue unavailable"
            );
            failures.record(DeliveryFailure {
                kind: FailureKind::Unavailable,
                event: None,
                attempts: 0,
                reason: format!(
                    "transport not ready after {:?}",
                    config.readiness_timeout
                ),
            });
            return;
        }
    }

    let max_attempts = config.effective_max_attempts();

    loop {
        let mut entry = match shared.take_head() {
            Some(entry) => entry,
            None => {
                if shared.lock().closed {
                    return;
                }
                shared.wake.notified().await;
                continue;
            }
        };

        entry.attempts += 1;
        let result = transport.submit(&entry.event, entry.attempts).await;

        match result {
            Ok(()) => {
                debug!(
                    event_type = %entry.event.event_type(),
                    attempts = entry.attempts,
                    "Event delivered"
                );
                shared.settle(true);
            }
            Err(DeliveryError::Transient(reason)) if entry.attempts < max_attempts => {
                let delay = config.backoff_delay(entry.attempts);
                warn!(
                    event_type = %entry.event.event_type(),
                    attempts = entry.attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Transient delivery failure, backing off"
                );
                entry.last_failure = Some(reason);
                if !shared.requeue(entry) {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                let kind = if err.is_retryable() {
                    FailureKind::Exhausted
                } else {
                    FailureKind::Permanent
                };
                let attempts = entry.attempts;
                shared.settle(false);
                failures.record(DeliveryFailure {
                    kind,
                    event: Some(entry.event),
                    attempts,
                    reason: err.to_string(),
                });
            }
        }
    }
}
