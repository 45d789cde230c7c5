//! Validate, enrich, relay.

use crate::enrich::{EnrichedEvent, RequestContext};
use crate::error::{ForwarderError, ForwarderResult};
use crate::ingestion::UserEventWriter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storefront_event::{Event, EventRecord};
use tracing::{debug, error, info, warn};

/// Per-event outcome reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressStatus {
    Delivered,
    Invalid,
    Retryable,
    Rejected,
    Error,
}

/// Body of every `POST /v1/events` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressResponse {
    pub status: IngressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngressResponse {
    pub fn delivered() -> Self {
        Self {
            status: IngressStatus::Delivered,
            error: None,
        }
    }
}

/// Body of `POST /v1/events/batch`. Accepts what the unload beacon sends.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default)]
    pub page_view_id: Option<String>,
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryResult {
    pub index: usize,
    pub status: IngressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub delivered: usize,
    pub failed: usize,
    pub results: Vec<EntryResult>,
}

/// The forwarding pipeline. Stateless apart from the writer it relays to.
pub struct Forwarder {
    writer: Arc<dyn UserEventWriter>,
    max_batch_events: usize,
}

impl Forwarder {
    pub fn new(writer: Arc<dyn UserEventWriter>, max_batch_events: usize) -> Self {
        Self {
            writer,
            max_batch_events,
        }
    }

    /// Validate one record, enrich it from the request and relay it.
    pub async fn forward_one(
        &self,
        record: EventRecord,
        context: &RequestContext,
    ) -> ForwarderResult<()> {
        let event = match Event::try_from(record) {
            Ok(event) => event,
            Err(e) => {
                info!(error = %e, "Rejected invalid event");
                return Err(e.into());
            }
        };

        let event_type = event.event_type();
        let visitor_id = event.visitor_id().to_string();
        let user_event = EnrichedEvent::new(event, context.clone()).to_user_event();

        match self.writer.write(&user_event).await {
            Ok(()) => {
                debug!(
                    event_type = %event_type,
                    visitor_id = %visitor_id,
                    "Event relayed"
                );
                Ok(())
            }
            Err(ForwarderError::PermanentDelivery { status, message }) => {
                error!(
                    event_type = %event_type,
                    visitor_id = %visitor_id,
                    status = status,
                    detail = %message,
                    "Ingestion API rejected event"
                );
                Err(ForwarderError::PermanentDelivery { status, message })
            }
            Err(e) => {
                warn!(
                    event_type = %event_type,
                    visitor_id = %visitor_id,
                    error = %e,
                    "Event relay failed, client may retry"
                );
                Err(e)
            }
        }
    }

    /// Relay every entry of a batch independently, in order.
    ///
    /// One bad entry never fails the others. Only an oversized batch is
    /// refused as a whole.
    pub async fn forward_batch(
        &self,
        batch: BatchRequest,
        context: &RequestContext,
    ) -> ForwarderResult<BatchResponse> {
        let len = batch.events.len();
        if len > self.max_batch_events {
            warn!(len = len, max = self.max_batch_events, "Batch too large");
            return Err(ForwarderError::BatchTooLarge {
                len,
                max: self.max_batch_events,
            });
        }

        let mut results = Vec::with_capacity(len);
        for (index, record) in batch.events.into_iter().enumerate() {
            let result = match self.forward_one(record, context).await {
                Ok(()) => EntryResult {
                    index,
                    status: IngressStatus::Delivered,
                    error: None,
                },
                Err(e) => EntryResult {
                    index,
                    status: e.ingress_status(),
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
        }

        let delivered = results
            .iter()
            .filter(|r| r.status == IngressStatus::Delivered)
            .count();
        let response = BatchResponse {
            delivered,
            failed: len - delivered,
            results,
        };

        info!(
            page_view_id = batch.page_view_id.as_deref().unwrap_or("-"),
            delivered = response.delivered,
            failed = response.failed,
            "Batch relayed"
        );
        Ok(response)
    }
}
