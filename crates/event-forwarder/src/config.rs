//! Configuration for the forwarder.

use crate::error::{ForwarderError, ForwarderResult};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_API_BASE: &str = "https://retail.googleapis.com/v2";
const DEFAULT_PROJECT_ID: &str = "partarch-ecommerce-demo";
const DEFAULT_LOCATION: &str = "global";
const DEFAULT_CATALOG_ID: &str = "default_catalog";
const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where the ingestion API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetailTarget {
    pub api_base: String,
    pub project_id: String,
    pub location: String,
    pub catalog_id: String,
    /// Project billed for the calls (`x-goog-user-project`).
    pub billing_project: String,
}

impl RetailTarget {
    /// `.../projects/{p}/locations/{l}/catalogs/{c}/userEvents:write`
    pub fn user_events_write_url(&self) -> String {
        format!(
            "{}/projects/{}/locations/{}/catalogs/{}/userEvents:write",
            self.api_base.trim_end_matches('/'),
            self.project_id,
            self.location,
            self.catalog_id
        )
    }
}

/// How the forwarder obtains access tokens.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// The deployment's ambient service identity.
    MetadataServer { token_url: String },
    /// A fixed token for local development.
    Static { token: String },
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MetadataServer { token_url } => f
                .debug_struct("MetadataServer")
                .field("token_url", token_url)
                .finish(),
            Self::Static { .. } => f.debug_struct("Static").finish_non_exhaustive(),
        }
    }
}

/// Forwarder configuration.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Address the ingress listens on
    pub listen_addr: SocketAddr,

    /// Ingestion API target
    pub retail: RetailTarget,

    /// Token source
    pub credentials: CredentialSource,

    /// Header set by the trusted front proxy with the signed-in user id
    pub user_id_header: Option<String>,

    /// Proxies in front of the forwarder that append to `X-Forwarded-For`
    pub trusted_proxy_hops: usize,

    /// Timeout for calls to the ingestion API and metadata server
    pub upstream_timeout: Duration,

    /// Largest accepted unload batch
    pub max_batch_events: usize,

    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl ForwarderConfig {
    /// Build the configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FORWARDER_LISTEN_ADDR` | `0.0.0.0:8080` |
    /// | `RETAIL_API_BASE` | `https://retail.googleapis.com/v2` |
    /// | `RETAIL_PROJECT_ID` | `partarch-ecommerce-demo` |
    /// | `RETAIL_LOCATION` | `global` |
    /// | `RETAIL_CATALOG_ID` | `default_catalog` |
    /// | `RETAIL_BILLING_PROJECT` | the project id |
    /// | `FORWARDER_ACCESS_TOKEN` | unset: use the metadata server |
    /// | `FORWARDER_METADATA_TOKEN_URL` | GCE metadata token endpoint |
    /// | `FORWARDER_USER_ID_HEADER` | unset |
    /// | `FORWARDER_TRUSTED_PROXY_HOPS` | `0` (ignore `X-Forwarded-For`) |
    /// | `FORWARDER_UPSTREAM_TIMEOUT_SECS` | `10` |
    /// | `FORWARDER_MAX_BATCH_EVENTS` | `500` |
    /// | `FORWARDER_MAX_BODY_BYTES` | `1048576` |
    pub fn from_env() -> ForwarderResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ForwarderConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> ForwarderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_addr = get("FORWARDER_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr: SocketAddr = listen_addr.parse().map_err(|e| {
            ForwarderError::Config(format!("FORWARDER_LISTEN_ADDR {:?}: {}", listen_addr, e))
        })?;

        let project_id = get("RETAIL_PROJECT_ID").unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string());
        let retail = RetailTarget {
            api_base: get("RETAIL_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            billing_project: get("RETAIL_BILLING_PROJECT").unwrap_or_else(|| project_id.clone()),
            project_id,
            location: get("RETAIL_LOCATION").unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            catalog_id: get("RETAIL_CATALOG_ID").unwrap_or_else(|| DEFAULT_CATALOG_ID.to_string()),
        };

        let credentials = match get("FORWARDER_ACCESS_TOKEN") {
            Some(token) => CredentialSource::Static { token },
            None => CredentialSource::MetadataServer {
                token_url: get("FORWARDER_METADATA_TOKEN_URL")
                    .unwrap_or_else(|| DEFAULT_METADATA_TOKEN_URL.to_string()),
            },
        };

        let upstream_timeout_secs: u64 = parse_or(&get, "FORWARDER_UPSTREAM_TIMEOUT_SECS", 10)?;

        let config = Self {
            listen_addr,
            retail,
            credentials,
            user_id_header: get("FORWARDER_USER_ID_HEADER"),
            trusted_proxy_hops: parse_or(&get, "FORWARDER_TRUSTED_PROXY_HOPS", 0)?,
            upstream_timeout: Duration::from_secs(upstream_timeout_secs),
            max_batch_events: parse_or(&get, "FORWARDER_MAX_BATCH_EVENTS", 500)?,
            max_body_bytes: parse_or(&get, "FORWARDER_MAX_BODY_BYTES", 1024 * 1024)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the forwarder cannot run with.
    pub fn validate(&self) -> ForwarderResult<()> {
        check_url("RETAIL_API_BASE", &self.retail.api_base)?;
        if let CredentialSource::MetadataServer { token_url } = &self.credentials {
            check_url("FORWARDER_METADATA_TOKEN_URL", token_url)?;
        }

        for (name, value) in [
            ("RETAIL_PROJECT_ID", &self.retail.project_id),
            ("RETAIL_LOCATION", &self.retail.location),
            ("RETAIL_CATALOG_ID", &self.retail.catalog_id),
        ] {
            if value.contains('/') {
                return Err(ForwarderError::Config(format!(
                    "{} must be a single path segment, got {:?}",
                    name, value
                )));
            }
        }

        if let Some(header) = &self.user_id_header {
            axum::http::HeaderName::try_from(header.as_str()).map_err(|e| {
                ForwarderError::Config(format!("FORWARDER_USER_ID_HEADER {:?}: {}", header, e))
            })?;
        }

        if self.max_batch_events == 0 {
            return Err(ForwarderError::Config(
                "FORWARDER_MAX_BATCH_EVENTS must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn user_events_write_url(&self) -> String {
        self.retail.user_events_write_url()
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> ForwarderResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ForwarderError::Config(format!("{} {:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn check_url(name: &str, value: &str) -> ForwarderResult<()> {
    let url = Url::parse(value)
        .map_err(|e| ForwarderError::Config(format!("{} {:?}: {}", name, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ForwarderError::Config(format!(
            "{} must be http(s), got scheme {:?}",
            name, other
        ))),
    }
}
