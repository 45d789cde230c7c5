//! Per-page-load tracker.

use crate::{DispatchParts, DispatchQueue, EnqueueOutcome, QueueConfig, UnloadReport};
use chrono::Utc;
use storefront_event::{Event, EventInput, EventResult, PageContext};
use tracing::debug;

/// Owns the page identity and the dispatch queue for one page load.
///
/// There is no global tracker. The interaction surface creates one when the
/// page loads and calls [`PageTracker::unload`] when it goes away.
pub struct PageTracker {
    page: PageContext,
    queue: DispatchQueue,
}

impl PageTracker {
    /// Start tracking a page for `visitor_id`.
    pub fn new(visitor_id: Option<String>, config: QueueConfig, parts: DispatchParts) -> Self {
        Self::with_page(PageContext::new(visitor_id), config, parts)
    }

    pub fn with_page(page: PageContext, config: QueueConfig, parts: DispatchParts) -> Self {
        debug!(page_view_id = %page.page_view_id, "Page tracker started");
        Self {
            page,
            queue: DispatchQueue::start(config, parts),
        }
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Build an event from UI input and queue it.
    ///
    /// Only construction can fail; delivery problems never reach the caller.
    pub fn track(&self, input: EventInput) -> EventResult<EnqueueOutcome> {
        let event = Event::from_input(input, &self.page, Utc::now())?;
        Ok(self.queue.enqueue(event))
    }

    /// Tear down the page, flushing what is left through the unload beacon.
    pub fn unload(self) -> UnloadReport {
        debug!(page_view_id = %self.page.page_view_id, "Page tracker unloading");
        self.queue.unload()
    }
}
