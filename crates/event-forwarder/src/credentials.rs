//! Access tokens for the ingestion API.
//!
//! In a deployment the token comes from the ambient service identity via the
//! metadata server. Tokens are cached and refreshed shortly before expiry.

use crate::config::CredentialSource;
use crate::error::{ForwarderError, ForwarderResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Refresh this long before the token actually expires.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Supplies bearer tokens for egress calls.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A token valid for at least the refresh margin.
    async fn access_token(&self) -> ForwarderResult<String>;

    /// Drop any cached token, e.g. after the API answered 401.
    async fn invalidate(&self);
}

/// Build the provider named by the configuration.
pub fn from_source(
    source: &CredentialSource,
    timeout: Duration,
) -> ForwarderResult<Arc<dyn CredentialProvider>> {
    Ok(match source {
        CredentialSource::Static { token } => Arc::new(StaticCredentials::new(token.clone())),
        CredentialSource::MetadataServer { token_url } => {
            Arc::new(MetadataServerCredentials::new(token_url.clone(), timeout)?)
        }
    })
}

/// Fixed token, for local development against a real or fake API.
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self) -> ForwarderResult<String> {
        Ok(self.token.clone())
    }

    async fn invalidate(&self) {
        debug!("Static credentials cannot be refreshed");
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Tokens from the metadata server of the deployment's service identity.
pub struct MetadataServerCredentials {
    client: Client,
    token_url: String,
    cache: RwLock<Option<CachedToken>>,
}

impl MetadataServerCredentials {
    pub fn new(token_url: impl Into<String>, timeout: Duration) -> ForwarderResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            cache: RwLock::new(None),
        })
    }

    async fn fetch(&self) -> ForwarderResult<CachedToken> {
        let response = self
            .client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ForwarderError::Credential(format!("metadata server: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForwarderError::Credential(format!(
                "metadata server returned HTTP {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ForwarderError::Credential(format!("metadata token response: {}", e)))?;

        if token.access_token.is_empty() {
            return Err(ForwarderError::Credential(
                "metadata server returned an empty token".to_string(),
            ));
        }

        info!(expires_in = token.expires_in, "Fetched access token");
        Ok(CachedToken {
            token: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in.clamp(0, 86_400)),
        })
    }
}

#[async_trait]
impl CredentialProvider for MetadataServerCredentials {
    async fn access_token(&self) -> ForwarderResult<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(Utc::now())) {
                return Ok(cached.token.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(Utc::now())) {
            return Ok(cached.token.clone());
        }

        match self.fetch().await {
            Ok(fresh) => {
                let token = fresh.token.clone();
                *cache = Some(fresh);
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh access token");
                Err(e)
            }
        }
    }

    async fn invalidate(&self) {
        debug!("Invalidating cached access token");
        *self.cache.write().await = None;
    }
}
