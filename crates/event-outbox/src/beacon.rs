//! Unload fallback: one fire-and-forget batch when the page goes away.

use crate::QueueEntry;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use storefront_event::EventRecord;
use tracing::{debug, warn};

/// The remaining entries of a queue, in queue order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnloadBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_view_id: Option<String>,
    pub events: Vec<EventRecord>,
}

impl UnloadBatch {
    pub(crate) fn from_entries(entries: &[QueueEntry]) -> Self {
        Self {
            page_view_id: entries
                .first()
                .map(|entry| entry.event.page_view_id().to_string()),
            events: entries
                .iter()
                .map(|entry| EventRecord::from(&entry.event))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// What happened at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnloadReport {
    /// Entries that were still queued.
    pub flushed: usize,
    /// Whether the beacon accepted the batch. Says nothing about delivery.
    pub handed_off: bool,
}

/// Non-blocking, no-acknowledgement transport for the unload batch.
///
/// `send` must return promptly and must not wait for the network.
pub trait UnloadBeacon: Send + Sync {
    /// Hand off the batch. Returns `false` if it could not even be started.
    fn send(&self, batch: UnloadBatch) -> bool;
}

/// Beacon posting the batch to the forwarder on a detached task.
#[derive(Clone)]
pub struct HttpBeacon {
    client: Client,
    url: String,
}

impl HttpBeacon {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl UnloadBeacon for HttpBeacon {
    fn send(&self, batch: UnloadBatch) -> bool {
        let count = batch.len();
        let body = match serde_json::to_vec(&batch) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, count = count, "Failed to serialize unload batch");
                return false;
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(count = count, "No runtime available for unload beacon");
                return false;
            }
        };

        let request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let url = self.url.clone();

        // Detached: nobody observes the outcome.
        runtime.spawn(async move {
            match request.send().await {
                Ok(response) => debug!(
                    url = %url,
                    status = %response.status(),
                    count = count,
                    "Unload beacon delivered"
                ),
                Err(e) => debug!(url = %url, error = %e, "Unload beacon failed"),
            }
        });

        true
    }
}
