//! End-to-end: page tracker -> forwarder -> fake Retail API.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use event_forwarder::{
    AppState, ForwarderConfig, IngestionClient, StaticCredentials, UserEventWriter,
};
use event_outbox::{
    DispatchParts, HttpIngressTransport, PageTracker, QueueConfig, TransportConfig,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storefront_event::EventInput;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct FakeRetail {
    responses: Arc<Mutex<VecDeque<StatusCode>>>,
    received: Arc<Mutex<Vec<(HeaderMap, serde_json::Value)>>>,
}

impl FakeRetail {
    fn answer_next(&self, status: StatusCode) {
        self.responses.lock().unwrap().push_back(status);
    }

    fn events(&self) -> Vec<serde_json::Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    async fn wait_for(&self, count: usize) -> Vec<serde_json::Value> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let events = self.events();
                if events.len() >= count {
                    return events;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("upstream never received the expected events")
    }
}

async fn write_user_event(
    State(retail): State<FakeRetail>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    retail.received.lock().unwrap().push((headers, body));
    retail
        .responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StatusCode::OK)
}

async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

struct Pipeline {
    retail: FakeRetail,
    forwarder_url: String,
}

async fn pipeline() -> Pipeline {
    let retail = FakeRetail::default();
    let retail_base = spawn(
        Router::new()
            .route(
                "/v2/projects/{project}/locations/{location}/catalogs/{catalog}/{method}",
                post(write_user_event),
            )
            .with_state(retail.clone()),
    )
    .await;

    let vars: HashMap<&str, String> = HashMap::from([
        ("RETAIL_API_BASE", format!("{}/v2", retail_base)),
        ("RETAIL_PROJECT_ID", "shop".to_string()),
        ("FORWARDER_ACCESS_TOKEN", "ya29.test".to_string()),
    ]);
    let config = ForwarderConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();

    let writer: Arc<dyn UserEventWriter> = Arc::new(
        IngestionClient::new(
            &config.retail,
            Arc::new(StaticCredentials::new("ya29.test")),
            Duration::from_secs(5),
        )
        .unwrap(),
    );
    let state = AppState::with_writer(&config, writer).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(event_forwarder::serve(
        listener,
        state,
        std::future::pending(),
    ));

    Pipeline {
        retail,
        forwarder_url: format!("http://{}", addr),
    }
}

fn tracker(forwarder_url: &str) -> PageTracker {
    let transport = HttpIngressTransport::new(TransportConfig {
        base_url: forwarder_url.to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let beacon = transport.beacon();
    let config = QueueConfig {
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
        ..Default::default()
    };
    PageTracker::new(
        Some("visitor-1".to_string()),
        config,
        DispatchParts::new(Arc::new(transport), Arc::new(beacon)),
    )
}

#[tokio::test]
async fn search_event_reaches_ingestion_api() {
    let pipeline = pipeline().await;
    let tracker = tracker(&pipeline.forwarder_url);

    tracker
        .track(
            EventInput::new("search")
                .search_query("weber")
                .product("A")
                .product("B"),
        )
        .unwrap();
    let status = tracker.queue().wait_idle().await;
    assert_eq!(status.delivered, 1);

    let events = pipeline.retail.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event["eventType"], "search");
    assert_eq!(event["searchQuery"], "weber");
    assert_eq!(event["visitorId"], "visitor-1");
    assert_eq!(
        event["productDetails"],
        serde_json::json!([{"product": {"id": "A"}}, {"product": {"id": "B"}}])
    );
    assert_eq!(event["pageViewId"], tracker.page().page_view_id.as_str());
    assert_eq!(event["userInfo"]["ipAddress"], "127.0.0.1");

    let received = pipeline.retail.received.lock().unwrap();
    assert_eq!(received[0].0["authorization"], "Bearer ya29.test");
    assert_eq!(received[0].0["x-goog-user-project"], "shop");
}

#[tokio::test]
async fn cart_then_purchase_arrive_in_order() {
    let pipeline = pipeline().await;
    let tracker = tracker(&pipeline.forwarder_url);

    tracker
        .track(EventInput::new("add-to-cart").product_quantity("X", 1))
        .unwrap();
    tracker
        .track(
            EventInput::new("purchase-complete")
                .product_quantity("X", 1)
                .transaction("T1", 42.00),
        )
        .unwrap();
    tracker.queue().wait_idle().await;

    let types: Vec<_> = pipeline
        .retail
        .events()
        .iter()
        .map(|e| e["eventType"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(types, vec!["add-to-cart", "purchase-complete"]);
}

#[tokio::test]
async fn transient_upstream_failure_is_retried_by_the_page() {
    let pipeline = pipeline().await;
    pipeline.retail.answer_next(StatusCode::SERVICE_UNAVAILABLE);
    let tracker = tracker(&pipeline.forwarder_url);

    tracker.track(EventInput::new("home-page-view")).unwrap();
    let status = tracker.queue().wait_idle().await;

    assert_eq!(status.delivered, 1);
    assert_eq!(status.failed, 0);
    // First write failed upstream, the retry went through.
    assert_eq!(pipeline.retail.events().len(), 2);
}

#[tokio::test]
async fn permanent_upstream_failure_is_not_retried() {
    let pipeline = pipeline().await;
    pipeline.retail.answer_next(StatusCode::FORBIDDEN);
    let tracker = tracker(&pipeline.forwarder_url);

    tracker.track(EventInput::new("home-page-view")).unwrap();
    let status = tracker.queue().wait_idle().await;

    assert_eq!(status.delivered, 0);
    assert_eq!(status.failed, 1);
    assert_eq!(pipeline.retail.events().len(), 1);
}

#[tokio::test]
async fn unload_flushes_remaining_events_through_the_batch_endpoint() {
    let pipeline = pipeline().await;
    let tracker = tracker(&pipeline.forwarder_url);

    for query in ["a", "b", "c"] {
        tracker
            .track(EventInput::new("search").search_query(query))
            .unwrap();
    }
    // Torn down before the dispatch task ever ran.
    let report = tracker.unload();
    assert_eq!(report.flushed, 3);
    assert!(report.handed_off);

    let events = pipeline.retail.wait_for(3).await;
    let queries: Vec<_> = events
        .iter()
        .map(|e| e["searchQuery"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(queries, vec!["a", "b", "c"]);
}
