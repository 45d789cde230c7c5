//! Error types for the forwarder.

use crate::forwarder::IngressStatus;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use storefront_event::InvalidEvent;
use thiserror::Error;

/// Forwarder error type.
#[derive(Error, Debug)]
pub enum ForwarderError {
    /// The submitted event failed validation. Never retried.
    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] InvalidEvent),

    /// Request body was not valid JSON for the endpoint.
    #[error("Malformed request body: {0}")]
    Json(#[from] serde_json::Error),

    /// Request body exceeds the configured byte limit.
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The upload broke off before the body was complete. The caller may retry.
    #[error("Request body interrupted: {0}")]
    BodyInterrupted(String),

    /// Batch exceeds the configured event limit.
    #[error("Batch of {len} events exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },

    /// Network error, timeout or 5xx from the ingestion API. The caller may retry.
    #[error("Ingestion API temporarily unavailable: {0}")]
    TransientDelivery(String),

    /// The ingestion API refused the event. Detail is logged, not returned.
    #[error("Ingestion API rejected event with HTTP {status}")]
    PermanentDelivery { status: u16, message: String },

    /// No usable access token.
    #[error("Credential error: {0}")]
    Credential(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (listener, log file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForwarderError {
    /// Ingress outcome reported to the client for this error.
    pub fn ingress_status(&self) -> IngressStatus {
        match self {
            Self::InvalidEvent(_)
            | Self::Json(_)
            | Self::BatchTooLarge { .. } => IngressStatus::Invalid,
            Self::TransientDelivery(_)
            | Self::BodyInterrupted(_)
            | Self::Credential(_)
            | Self::Http(_) => IngressStatus::Retryable,
            Self::PermanentDelivery { .. } | Self::BodyTooLarge { .. } => IngressStatus::Rejected,
            Self::Config(_) | Self::Io(_) => IngressStatus::Error,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BatchTooLarge { .. } | Self::BodyTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            _ => match self.ingress_status() {
                IngressStatus::Delivered => StatusCode::OK,
                IngressStatus::Invalid => StatusCode::BAD_REQUEST,
                IngressStatus::Retryable => StatusCode::SERVICE_UNAVAILABLE,
                IngressStatus::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
                IngressStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ForwarderError {
    fn into_response(self) -> Response {
        let body = crate::forwarder::IngressResponse {
            status: self.ingress_status(),
            error: Some(self.to_string()),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Result type for forwarder operations.
pub type ForwarderResult<T> = Result<T, ForwarderError>;
