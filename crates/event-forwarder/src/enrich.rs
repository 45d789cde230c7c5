//! Server-side enrichment and the ingestion API's `UserEvent` shape.
//!
//! Request-derived fields (page URI, user agent, IP, signed-in user) come from
//! the HTTP request the forwarder received, never from the event body.

use axum::http::header::{REFERER, USER_AGENT};
use axum::http::{HeaderMap, HeaderName};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use storefront_event::{Event, EventPayload, ProductDetail, PurchaseTransaction};
use url::Url;

/// Field limits of the ingestion API.
const MAX_URI_LEN: usize = 5000;
const MAX_USER_AGENT_LEN: usize = 1000;
const MAX_USER_ID_LEN: usize = 128;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Which request headers the forwarder may believe.
///
/// Both are set by the deployment's own front proxies, so by default neither
/// is trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentPolicy {
    /// Header carrying the signed-in user id.
    pub user_id_header: Option<HeaderName>,
    /// Number of trusted proxies that append to `X-Forwarded-For`. Zero means
    /// the header is ignored and the peer address is the client.
    pub trusted_proxy_hops: usize,
}

/// What the forwarder knows about the request that carried an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub uri: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub user_id: Option<String>,
}

impl RequestContext {
    /// Derive the context from request headers and the peer address.
    pub fn from_parts(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        policy: &EnrichmentPolicy,
    ) -> Self {
        let header = |name: &HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let uri = header(&REFERER)
            .and_then(|raw| Url::parse(raw).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .map(|url| truncate(url.as_str(), MAX_URI_LEN));

        let user_agent = header(&USER_AGENT).map(|ua| truncate(ua, MAX_USER_AGENT_LEN));

        let ip_address = forwarded_client(headers, policy.trusted_proxy_hops)
            .or_else(|| peer.map(|addr| addr.ip()))
            .map(|ip| ip.to_string());

        let user_id = policy
            .user_id_header
            .as_ref()
            .and_then(|name| header(name))
            .map(|id| truncate(id, MAX_USER_ID_LEN));

        Self {
            uri,
            user_agent,
            ip_address,
            user_id,
        }
    }
}

/// Client address as recorded by the outermost trusted proxy.
///
/// Each proxy appends the address it saw, so only the last `hops` entries
/// were written by infrastructure we control. Anything to their left is
/// whatever the client sent.
fn forwarded_client(headers: &HeaderMap, hops: usize) -> Option<IpAddr> {
    if hops == 0 {
        return None;
    }
    let chain: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();

    let index = chain.len().checked_sub(hops)?;
    chain[index].parse().ok()
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// `userInfo` of a `UserEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub direct_user_request: bool,
}

/// A user event as accepted by `userEvents:write`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    pub event_type: String,
    pub visitor_id: String,
    /// RFC 3339
    pub event_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_view_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_details: Vec<ProductDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_transaction: Option<PurchaseTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
}

/// A validated event with the server-side fields carried beside it.
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    pub event: Event,
    pub context: RequestContext,
}

impl EnrichedEvent {
    pub fn new(event: Event, context: RequestContext) -> Self {
        Self { event, context }
    }

    /// Map to the ingestion API shape.
    ///
    /// The `Referer` of the tracking request is the storefront page the event
    /// happened on, so it becomes `uri`. `referrerUri` (the page before that)
    /// is only known to the browser and is left unset.
    pub fn to_user_event(&self) -> UserEvent {
        let event = &self.event;
        let mut user_event = UserEvent {
            event_type: event.event_type().as_str().to_string(),
            visitor_id: event.visitor_id().to_string(),
            event_time: event
                .event_time()
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            page_view_id: Some(event.page_view_id().to_string()),
            search_query: None,
            page_categories: Vec::new(),
            product_details: Vec::new(),
            cart_id: None,
            purchase_transaction: None,
            attribution_token: event.attribution_token().map(str::to_string),
            filter: event.filter().map(str::to_string),
            uri: self.context.uri.clone(),
            user_info: Some(UserInfo {
                user_id: self.context.user_id.clone(),
                ip_address: self.context.ip_address.clone(),
                user_agent: self.context.user_agent.clone(),
                direct_user_request: false,
            }),
        };

        match event.payload() {
            EventPayload::HomePageView => {}
            EventPayload::CategoryPageView { page_categories } => {
                user_event.page_categories = page_categories.clone();
            }
            EventPayload::Search { query, results } => {
                user_event.search_query = Some(query.clone());
                user_event.product_details = results.clone();
            }
            EventPayload::DetailPageView { products }
            | EventPayload::AddToCart { products }
            | EventPayload::RemoveFromCart { products } => {
                user_event.product_details = products.clone();
            }
            EventPayload::ShoppingCartPageView { cart_id, products } => {
                user_event.cart_id = cart_id.clone();
                user_event.product_details = products.clone();
            }
            EventPayload::PurchaseComplete {
                products,
                transaction,
            } => {
                user_event.product_details = products.clone();
                user_event.purchase_transaction = Some(transaction.clone());
            }
        }

        user_event
    }
}
