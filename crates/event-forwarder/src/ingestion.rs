//! Egress to the Retail ingestion API.

use crate::config::RetailTarget;
use crate::credentials::CredentialProvider;
use crate::enrich::UserEvent;
use crate::error::{ForwarderError, ForwarderResult};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const USER_PROJECT_HEADER: &str = "x-goog-user-project";

/// Writes one user event to the ingestion API.
#[async_trait]
pub trait UserEventWriter: Send + Sync {
    async fn write(&self, event: &UserEvent) -> ForwarderResult<()>;
}

/// `userEvents:write` client authenticated with the ambient credential.
pub struct IngestionClient {
    client: Client,
    write_url: String,
    billing_project: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl IngestionClient {
    pub fn new(
        target: &RetailTarget,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> ForwarderResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            write_url: target.user_events_write_url(),
            billing_project: target.billing_project.clone(),
            credentials,
        })
    }

    async fn post(&self, event: &UserEvent) -> ForwarderResult<Response> {
        let token = self.credentials.access_token().await?;
        self.client
            .post(&self.write_url)
            .bearer_auth(token)
            .header(USER_PROJECT_HEADER, &self.billing_project)
            .json(event)
            .send()
            .await
            .map_err(|e| ForwarderError::TransientDelivery(e.to_string()))
    }
}

#[async_trait]
impl UserEventWriter for IngestionClient {
    async fn write(&self, event: &UserEvent) -> ForwarderResult<()> {
        let mut response = self.post(event).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(event_type = %event.event_type, "Access token rejected, refreshing");
            self.credentials.invalidate().await;
            response = self.post(event).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                warn!("Access token rejected after refresh");
                return Err(ForwarderError::TransientDelivery(
                    "ingestion API rejected a freshly issued token".to_string(),
                ));
            }
        }

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

/// Map a non-success ingestion API status onto the forwarder's taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> ForwarderError {
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        ForwarderError::TransientDelivery(format!("HTTP {}: {}", status, body))
    } else {
        ForwarderError::PermanentDelivery {
            status: status.as_u16(),
            message: body,
        }
    }
}
