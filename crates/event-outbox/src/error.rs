//! Outbox error types.

use thiserror::Error;

/// Outcome of a failed submission, as seen by the dispatch loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The forwarder rejected the event as malformed. Never retried.
    #[error("Event rejected as invalid: {0}")]
    Invalid(String),

    /// The forwarder or ingestion API refused the event for good. Never retried.
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),

    /// Network error, timeout or 5xx. Retried with backoff.
    #[error("Transient delivery failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    /// Whether the dispatch loop should try this entry again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Outbox setup error.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
