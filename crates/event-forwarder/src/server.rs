//! HTTP ingress.

use crate::config::ForwarderConfig;
use crate::credentials;
use crate::enrich::{EnrichmentPolicy, RequestContext};
use crate::error::{ForwarderError, ForwarderResult};
use crate::forwarder::{BatchRequest, BatchResponse, Forwarder, IngressResponse};
use crate::ingestion::{IngestionClient, UserEventWriter};
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, HeaderName};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use storefront_event::{EventRecord, ATTEMPT_HEADER};
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

pub const EVENTS_ENDPOINT: &str = "/v1/events";
pub const BATCH_ENDPOINT: &str = "/v1/events/batch";
pub const HEALTH_ENDPOINT: &str = "/healthz";

/// Shared state of the ingress handlers.
#[derive(Clone)]
pub struct AppState {
    forwarder: Arc<Forwarder>,
    enrichment: EnrichmentPolicy,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        forwarder: Arc<Forwarder>,
        enrichment: EnrichmentPolicy,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            forwarder,
            enrichment,
            max_body_bytes,
        }
    }

    /// Wire the production pipeline: ambient credentials, ingestion client.
    pub fn from_config(config: &ForwarderConfig) -> ForwarderResult<Self> {
        let credentials = credentials::from_source(&config.credentials, config.upstream_timeout)?;
        let writer: Arc<dyn UserEventWriter> = Arc::new(IngestionClient::new(
            &config.retail,
            credentials,
            config.upstream_timeout,
        )?);
        Self::with_writer(config, writer)
    }

    /// Same as [`AppState::from_config`] with a caller-supplied egress sink.
    pub fn with_writer(
        config: &ForwarderConfig,
        writer: Arc<dyn UserEventWriter>,
    ) -> ForwarderResult<Self> {
        let user_id_header = config
            .user_id_header
            .as_deref()
            .map(HeaderName::try_from)
            .transpose()
            .map_err(|e| ForwarderError::Config(format!("user id header: {}", e)))?;

        let enrichment = EnrichmentPolicy {
            user_id_header,
            trusted_proxy_hops: config.trusted_proxy_hops,
        };

        Ok(Self::new(
            Arc::new(Forwarder::new(writer, config.max_batch_events)),
            enrichment,
            config.max_body_bytes,
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(EVENTS_ENDPOINT, post(ingest_event))
        .route(BATCH_ENDPOINT, post(ingest_batch))
        .route(HEALTH_ENDPOINT, get(healthz))
        .with_state(state)
}

/// Serve the ingress on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> ForwarderResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "Forwarder listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

struct Ingress {
    context: RequestContext,
    attempt: Option<u32>,
    body: Bytes,
}

/// Split the request into its enrichment context and raw body.
///
/// The body is decoded by hand so beacons that send `text/plain` are accepted
/// and decode failures get the same JSON error shape as everything else.
async fn read_ingress(state: &AppState, request: Request) -> ForwarderResult<Ingress> {
    let (parts, body) = request.into_parts();

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let context = RequestContext::from_parts(&parts.headers, peer, &state.enrichment);
    let attempt = parts
        .headers
        .get(ATTEMPT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let body = read_body(body, &parts.headers, state.max_body_bytes).await?;

    Ok(Ingress {
        context,
        attempt,
        body,
    })
}

/// Collect at most `limit` bytes of `body`.
///
/// An oversized body is refused outright. A body that breaks off mid-upload
/// is reported separately so the page retries it.
async fn read_body(body: Body, headers: &HeaderMap, limit: usize) -> ForwarderResult<Bytes> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(ForwarderError::BodyTooLarge { limit });
    }

    let mut stream = body.into_data_stream();
    let mut buf = Vec::with_capacity(declared.map_or(0, |len| len as usize));
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ForwarderError::BodyInterrupted(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(ForwarderError::BodyTooLarge { limit });
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buf))
}

async fn ingest_event(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<IngressResponse>, ForwarderError> {
    let span = info_span!("ingest_event", request_id = %Uuid::new_v4());
    async move {
        let ingress = read_ingress(&state, request).await?;
        let record: EventRecord = serde_json::from_slice(&ingress.body)?;
        debug!(
            event_type = record.event_type.as_deref().unwrap_or("-"),
            attempt = ?ingress.attempt,
            "Event received"
        );

        state
            .forwarder
            .forward_one(record, &ingress.context)
            .await?;
        Ok::<_, ForwarderError>(Json(IngressResponse::delivered()))
    }
    .instrument(span)
    .await
}

async fn ingest_batch(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<BatchResponse>, ForwarderError> {
    let span = info_span!("ingest_batch", request_id = %Uuid::new_v4());
    async move {
        let ingress = read_ingress(&state, request).await?;
        let batch: BatchRequest = serde_json::from_slice(&ingress.body)?;
        debug!(count = batch.events.len(), "Batch received");

        let response = state
            .forwarder
            .forward_batch(batch, &ingress.context)
            .await?;
        Ok::<_, ForwarderError>(Json(response))
    }
    .instrument(span)
    .await
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::tests::{search_record, RecordingWriter};
    use crate::forwarder::IngressStatus;
    use reqwest::StatusCode;

    const BODY_LIMIT: usize = 4 * 1024;

    struct TestServer {
        base: String,
        writer: Arc<RecordingWriter>,
        client: reqwest::Client,
    }

    async fn start(enrichment: EnrichmentPolicy) -> TestServer {
        let writer = Arc::new(RecordingWriter::default());
        let state = AppState::new(
            Arc::new(Forwarder::new(writer.clone(), 5)),
            enrichment,
            BODY_LIMIT,
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state, std::future::pending()));

        TestServer {
            base: format!("http://{}", addr),
            writer,
            client: reqwest::Client::new(),
        }
    }

    impl TestServer {
        async fn post(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
            self.client
                .post(format!("{}{}", self.base, path))
                .json(body)
                .send()
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_healthz() {
        let server = start(EnrichmentPolicy::default()).await;
        let response = server
            .client
            .get(format!("{}{}", server.base, HEALTH_ENDPOINT))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_delivered_event() {
        let server = start(EnrichmentPolicy::default()).await;
        let record = serde_json::to_value(search_record("weber")).unwrap();

        let response = server.post(EVENTS_ENDPOINT, &record).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: IngressResponse = response.json().await.unwrap();
        assert_eq!(body, IngressResponse::delivered());

        let written = server.writer.written();
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0].user_info.as_ref().unwrap().ip_address.as_deref(),
            Some("127.0.0.1")
        );
    }

    #[tokio::test]
    async fn test_invalid_event_is_400() {
        let server = start(EnrichmentPolicy::default()).await;
        let response = server
            .post(
                EVENTS_ENDPOINT,
                &serde_json::json!({"eventType": "search", "pageViewId": "pv-1", "searchQuery": "weber"}),
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: IngressResponse = response.json().await.unwrap();
        assert_eq!(body.status, IngressStatus::Invalid);
        assert!(server.writer.written().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let server = start(EnrichmentPolicy::default()).await;
        let response = server
            .client
            .post(format!("{}{}", server.base, EVENTS_ENDPOINT))
            .body("{not json")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: IngressResponse = response.json().await.unwrap();
        assert_eq!(body.status, IngressStatus::Invalid);
    }

    #[tokio::test]
    async fn test_upstream_failures_map_to_status_codes() {
        let server = start(EnrichmentPolicy::default()).await;
        let record = serde_json::to_value(search_record("weber")).unwrap();

        server
            .writer
            .fail_next(ForwarderError::TransientDelivery("HTTP 503".into()));
        let response = server.post(EVENTS_ENDPOINT, &record).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        server.writer.fail_next(ForwarderError::PermanentDelivery {
            status: 400,
            message: "bad catalog".into(),
        });
        let response = server.post(EVENTS_ENDPOINT, &record).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: IngressResponse = response.json().await.unwrap();
        assert_eq!(body.status, IngressStatus::Rejected);
        assert!(!body.error.unwrap_or_default().contains("bad catalog"));
    }

    #[tokio::test]
    async fn test_client_supplied_enrichment_is_overridden() {
        let server = start(EnrichmentPolicy {
            user_id_header: Some(HeaderName::from_static("x-authenticated-user")),
            trusted_proxy_hops: 0,
        })
        .await;
        let record = serde_json::json!({
            "eventType": "home-page-view",
            "visitorId": "visitor-1",
            "pageViewId": "pv-1",
            "uri": "https://evil.example.com",
            "userInfo": {"userId": "someone-else", "ipAddress": "1.2.3.4"}
        });

        let response = server
            .client
            .post(format!("{}{}", server.base, EVENTS_ENDPOINT))
            .header("referer", "https://shop.example.com/")
            .header("user-agent", "test-agent")
            .header("x-forwarded-for", "198.51.100.4")
            .header("x-authenticated-user", "user-42")
            .json(&record)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let written = server.writer.written();
        let user_info = written[0].user_info.clone().unwrap();
        assert_eq!(written[0].uri.as_deref(), Some("https://shop.example.com/"));
        assert_eq!(user_info.user_id.as_deref(), Some("user-42"));
        // No trusted proxy in front, so the forwarded chain is the client's word.
        assert_eq!(user_info.ip_address.as_deref(), Some("127.0.0.1"));
        assert_eq!(user_info.user_agent.as_deref(), Some("test-agent"));
        assert!(!user_info.direct_user_request);
    }

    #[tokio::test]
    async fn test_batch_endpoint_accepts_text_plain_beacon() {
        let server = start(EnrichmentPolicy::default()).await;
        let batch = serde_json::json!({
            "pageViewId": "pv-1",
            "events": [
                serde_json::to_value(search_record("a")).unwrap(),
                {"eventType": "search", "visitorId": "visitor-1", "pageViewId": "pv-1"},
                serde_json::to_value(search_record("c")).unwrap(),
            ]
        });

        let response = server
            .client
            .post(format!("{}{}", server.base, BATCH_ENDPOINT))
            .header("content-type", "text/plain;charset=UTF-8")
            .body(batch.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: BatchResponse = response.json().await.unwrap();
        assert_eq!(body.delivered, 2);
        assert_eq!(body.failed, 1);
        assert_eq!(body.results[1].status, IngressStatus::Invalid);
    }

    #[tokio::test]
    async fn test_oversized_batch_is_413() {
        let server = start(EnrichmentPolicy::default()).await;
        let events: Vec<_> = (0..6)
            .map(|i| serde_json::to_value(search_record(&format!("q{}", i))).unwrap())
            .collect();

        let response = server
            .post(BATCH_ENDPOINT, &serde_json::json!({ "events": events }))
            .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(server.writer.written().is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_for_honoured_behind_trusted_proxy() {
        let server = start(EnrichmentPolicy {
            user_id_header: None,
            trusted_proxy_hops: 1,
        })
        .await;
        let record = serde_json::to_value(search_record("weber")).unwrap();

        let response = server
            .client
            .post(format!("{}{}", server.base, EVENTS_ENDPOINT))
            .header("x-forwarded-for", "6.6.6.6, 198.51.100.4")
            .json(&record)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let written = server.writer.written();
        let user_info = written[0].user_info.clone().unwrap();
        assert_eq!(user_info.ip_address.as_deref(), Some("198.51.100.4"));
    }

    #[tokio::test]
    async fn test_body_over_limit_is_413() {
        let server = start(EnrichmentPolicy::default()).await;
        let response = server
            .client
            .post(format!("{}{}", server.base, EVENTS_ENDPOINT))
            .body(vec![b' '; 16 * 1024])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: IngressResponse = response.json().await.unwrap();
        assert_eq!(body.status, IngressStatus::Rejected);
    }

    fn streamed(chunks: Vec<Result<Vec<u8>, std::io::Error>>) -> Body {
        Body::from_stream(futures_util::stream::iter(
            chunks.into_iter().map(|chunk| chunk.map(Bytes::from)),
        ))
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit_without_length() {
        let body = streamed(vec![Ok(vec![b' '; 3 * 1024]), Ok(vec![b' '; 3 * 1024])]);
        let result = read_body(body, &HeaderMap::new(), BODY_LIMIT).await;
        assert!(matches!(
            result,
            Err(ForwarderError::BodyTooLarge { limit: BODY_LIMIT })
        ));
    }

    #[tokio::test]
    async fn test_interrupted_body_is_retryable() {
        let body = streamed(vec![
            Ok(b"{\"eventType\":".to_vec()),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
        ]);
        let err = read_body(body, &HeaderMap::new(), BODY_LIMIT)
            .await
            .unwrap_err();

        assert!(matches!(err, ForwarderError::BodyInterrupted(_)));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.ingress_status(), IngressStatus::Retryable);
    }

    #[tokio::test]
    async fn test_body_within_limit_is_collected() {
        let body = streamed(vec![Ok(b"{\"a\":".to_vec()), Ok(b"1}".to_vec())]);
        let bytes = read_body(body, &HeaderMap::new(), BODY_LIMIT).await.unwrap();
        assert_eq!(&bytes[..], b"{\"a\":1}");
    }
}
