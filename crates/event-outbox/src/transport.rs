//! Ingress transport: one event per request to the forwarder.

use crate::{DeliveryError, HttpBeacon, OutboxError, OutboxResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use storefront_event::{Event, EventRecord, ATTEMPT_HEADER};
use tracing::debug;

/// Submits a single event and reports how it went.
#[async_trait]
pub trait IngressTransport: Send + Sync {
    /// Submit `event`. `attempt` starts at 1 and grows with each retry.
    async fn submit(&self, event: &Event, attempt: u32) -> Result<(), DeliveryError>;
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL of the forwarder (e.g. `https://shop.example.com/track`).
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// URL of the single-event ingress.
    pub fn events_url(&self) -> String {
        format!("{}/v1/events", self.base_url.trim_end_matches('/'))
    }

    /// URL of the batch ingress used by the unload beacon.
    pub fn batch_url(&self) -> String {
        format!("{}/v1/events/batch", self.base_url.trim_end_matches('/'))
    }
}

/// HTTP transport posting [`EventRecord`] JSON to the forwarder.
#[derive(Clone)]
pub struct HttpIngressTransport {
    config: TransportConfig,
    client: Client,
}

impl HttpIngressTransport {
    /// Create a new transport. The base URL must be absolute http(s).
    pub fn new(config: TransportConfig) -> OutboxResult<Self> {
        let base = config.base_url.trim();
        let has_host = base
            .strip_prefix("https://")
            .or_else(|| base.strip_prefix("http://"))
            .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'));
        if !has_host {
            return Err(OutboxError::Config(format!(
                "forwarder base URL must be absolute http(s), got {:?}",
                config.base_url
            )));
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// A beacon that shares this transport's client and forwarder.
    pub fn beacon(&self) -> HttpBeacon {
        HttpBeacon::new(self.client.clone(), self.config.batch_url())
    }
}

#[async_trait]
impl IngressTransport for HttpIngressTransport {
    async fn submit(&self, event: &Event, attempt: u32) -> Result<(), DeliveryError> {
        let url = self.config.events_url();
        debug!(
            url = %url,
            event_type = %event.event_type(),
            attempt = attempt,
            "Submitting event"
        );

        let response = self
            .client
            .post(&url)
            .header(ATTEMPT_HEADER, attempt.to_string())
            .json(&EventRecord::from(event))
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

/// Map a non-success forwarder status onto the delivery taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> DeliveryError {
    let detail = format!("HTTP {}: {}", status, body);
    match status {
        StatusCode::BAD_REQUEST => DeliveryError::Invalid(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            DeliveryError::Transient(detail)
        }
        s if s.is_server_error() => DeliveryError::Transient(detail),
        _ => DeliveryError::Permanent(detail),
    }
}
