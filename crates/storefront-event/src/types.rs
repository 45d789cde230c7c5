//! Core event types.

use crate::{EventResult, InvalidEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currency used when a purchase does not name one.
pub const DEFAULT_CURRENCY_CODE: &str = "USD";

/// The kind of user interaction being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    HomePageView,
    CategoryPageView,
    Search,
    DetailPageView,
    AddToCart,
    RemoveFromCart,
    ShoppingCartPageView,
    PurchaseComplete,
}

impl EventType {
    /// Every recognized event type.
    pub const ALL: [EventType; 8] = [
        EventType::HomePageView,
        EventType::CategoryPageView,
        EventType::Search,
        EventType::DetailPageView,
        EventType::AddToCart,
        EventType::RemoveFromCart,
        EventType::ShoppingCartPageView,
        EventType::PurchaseComplete,
    ];

    /// Wire name of the event type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HomePageView => "home-page-view",
            Self::CategoryPageView => "category-page-view",
            Self::Search => "search",
            Self::DetailPageView => "detail-page-view",
            Self::AddToCart => "add-to-cart",
            Self::RemoveFromCart => "remove-from-cart",
            Self::ShoppingCartPageView => "shopping-cart-page-view",
            Self::PurchaseComplete => "purchase-complete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = InvalidEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| InvalidEvent::UnknownEventType(s.to_string()))
    }
}

/// Reference to a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
}

/// A product line attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetail {
    pub product: ProductRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

impl ProductDetail {
    /// A product line without a quantity (search results, detail views).
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product: ProductRef {
                id: product_id.into(),
            },
            quantity: None,
        }
    }

    /// A product line with a quantity (cart mutations, purchases).
    pub fn with_quantity(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            quantity: Some(quantity),
            ..Self::new(product_id)
        }
    }
}

/// Transaction details of a completed purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseTransaction {
    pub id: String,
    pub revenue: f64,
    #[serde(default = "default_currency_code")]
    pub currency_code: String,
}

fn default_currency_code() -> String {
    DEFAULT_CURRENCY_CODE.to_string()
}

/// Type-specific event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    HomePageView,
    CategoryPageView {
        page_categories: Vec<String>,
    },
    Search {
        query: String,
        results: Vec<ProductDetail>,
    },
    DetailPageView {
        products: Vec<ProductDetail>,
    },
    AddToCart {
        products: Vec<ProductDetail>,
    },
    RemoveFromCart {
        products: Vec<ProductDetail>,
    },
    ShoppingCartPageView {
        cart_id: Option<String>,
        products: Vec<ProductDetail>,
    },
    PurchaseComplete {
        products: Vec<ProductDetail>,
        transaction: PurchaseTransaction,
    },
}

impl EventPayload {
    /// The event type this payload belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::HomePageView => EventType::HomePageView,
            Self::CategoryPageView { .. } => EventType::CategoryPageView,
            Self::Search { .. } => EventType::Search,
            Self::DetailPageView { .. } => EventType::DetailPageView,
            Self::AddToCart { .. } => EventType::AddToCart,
            Self::RemoveFromCart { .. } => EventType::RemoveFromCart,
            Self::ShoppingCartPageView { .. } => EventType::ShoppingCartPageView,
            Self::PurchaseComplete { .. } => EventType::PurchaseComplete,
        }
    }

    /// Product lines carried by the payload, in order.
    pub fn products(&self) -> &[ProductDetail] {
        match self {
            Self::HomePageView | Self::CategoryPageView { .. } => &[],
            Self::Search { results, .. } => results,
            Self::DetailPageView { products }
            | Self::AddToCart { products }
            | Self::RemoveFromCart { products }
            | Self::ShoppingCartPageView { products, .. }
            | Self::PurchaseComplete { products, .. } => products,
        }
    }
}

/// Identity of one page load: who is browsing and which load this is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub visitor_id: Option<String>,
    pub page_view_id: String,
}

impl PageContext {
    /// Create a context for a fresh page load with a new page-view id.
    pub fn new(visitor_id: Option<String>) -> Self {
        Self {
            visitor_id,
            page_view_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// A validated user interaction.
///
/// Fields are only readable: an event does not change once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub(crate) visitor_id: String,
    pub(crate) page_view_id: String,
    pub(crate) event_time: DateTime<Utc>,
    pub(crate) payload: EventPayload,
    pub(crate) attribution_token: Option<String>,
    pub(crate) filter: Option<String>,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }

    pub fn page_view_id(&self) -> &str {
        &self.page_view_id
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn attribution_token(&self) -> Option<&str> {
        self.attribution_token.as_deref()
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }
}

/// How much checking to apply when assembling a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Validation {
    /// Only required fields; fields foreign to the type are ignored.
    Required,
    /// Required fields, shape, and value ranges.
    Full,
}

/// Loose payload fields as they arrive from the UI or the wire.
#[derive(Debug, Default)]
pub(crate) struct PayloadFields {
    pub search_query: Option<String>,
    pub page_categories: Option<Vec<String>>,
    pub product_details: Option<Vec<ProductDetail>>,
    pub cart_id: Option<String>,
    pub purchase_transaction: Option<PurchaseTransaction>,
}

pub(crate) fn require_visitor_id(visitor_id: Option<String>) -> EventResult<String> {
    match visitor_id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(InvalidEvent::MissingVisitorId),
    }
}

pub(crate) fn build_payload(
    event_type: EventType,
    fields: PayloadFields,
    validation: Validation,
) -> EventResult<EventPayload> {
    if validation == Validation::Full {
        check_shape(event_type, &fields)?;
    }

    let PayloadFields {
        search_query,
        page_categories,
        product_details,
        cart_id,
        purchase_transaction,
    } = fields;
    let products = product_details.unwrap_or_default();

    let payload = match event_type {
        EventType::HomePageView => EventPayload::HomePageView,
        EventType::CategoryPageView => {
            let page_categories = page_categories.unwrap_or_default();
            if page_categories.is_empty() {
                return Err(missing(event_type, "pageCategories"));
            }
            EventPayload::CategoryPageView { page_categories }
        }
        EventType::Search => {
            let query = search_query
                .filter(|q| !q.trim().is_empty())
                .ok_or_else(|| missing(event_type, "searchQuery"))?;
            EventPayload::Search {
                query,
                results: products,
            }
        }
        EventType::DetailPageView => {
            require_products(event_type, &products, false)?;
            EventPayload::DetailPageView { products }
        }
        EventType::AddToCart => {
            require_products(event_type, &products, true)?;
            EventPayload::AddToCart { products }
        }
        EventType::RemoveFromCart => {
            require_products(event_type, &products, true)?;
            EventPayload::RemoveFromCart { products }
        }
        EventType::ShoppingCartPageView => EventPayload::ShoppingCartPageView {
            cart_id,
            products,
        },
        EventType::PurchaseComplete => {
            require_products(event_type, &products, true)?;
            let transaction = purchase_transaction
                .ok_or_else(|| missing(event_type, "purchaseTransaction"))?;
            if transaction.id.trim().is_empty() {
                return Err(missing(event_type, "purchaseTransaction.id"));
            }
            EventPayload::PurchaseComplete {
                products,
                transaction,
            }
        }
    };

    if validation == Validation::Full {
        check_values(&payload)?;
    }

    Ok(payload)
}

fn missing(event_type: EventType, field: &'static str) -> InvalidEvent {
    InvalidEvent::MissingField { event_type, field }
}

fn require_products(
    event_type: EventType,
    products: &[ProductDetail],
    with_quantity: bool,
) -> EventResult<()> {
    if products.is_empty() {
        return Err(missing(event_type, "productDetails"));
    }
    if with_quantity && products.iter().any(|p| p.quantity.is_none()) {
        return Err(missing(event_type, "productDetails.quantity"));
    }
    Ok(())
}

fn check_shape(event_type: EventType, fields: &PayloadFields) -> EventResult<()> {
    use EventType::*;

    let mismatch = |field| InvalidEvent::ShapeMismatch { event_type, field };

    if fields.search_query.is_some() && event_type != Search {
        return Err(mismatch("searchQuery"));
    }
    if fields.page_categories.is_some() && event_type != CategoryPageView {
        return Err(mismatch("pageCategories"));
    }
    if fields.cart_id.is_some() && event_type != ShoppingCartPageView {
        return Err(mismatch("cartId"));
    }
    if fields.purchase_transaction.is_some() && event_type != PurchaseComplete {
        return Err(mismatch("purchaseTransaction"));
    }
    let has_products = fields
        .product_details
        .as_ref()
        .is_some_and(|p| !p.is_empty());
    if has_products && matches!(event_type, HomePageView | CategoryPageView) {
        return Err(mismatch("productDetails"));
    }
    Ok(())
}

fn check_values(payload: &EventPayload) -> EventResult<()> {
    for detail in payload.products() {
        if detail.product.id.trim().is_empty() {
            return Err(InvalidEvent::InvalidField {
                field: "productDetails.product.id",
                reason: "must not be blank".to_string(),
            });
        }
        if detail.quantity == Some(0) {
            return Err(InvalidEvent::InvalidField {
                field: "productDetails.quantity",
                reason: "must be at least 1".to_string(),
            });
        }
    }

    if let EventPayload::CategoryPageView { page_categories } = payload {
        if page_categories.iter().any(|c| c.trim().is_empty()) {
            return Err(InvalidEvent::InvalidField {
                field: "pageCategories",
                reason: "categories must not be blank".to_string(),
            });
        }
    }

    if let EventPayload::PurchaseComplete { transaction, .. } = payload {
        if !transaction.revenue.is_finite() || transaction.revenue < 0.0 {
            return Err(InvalidEvent::InvalidField {
                field: "purchaseTransaction.revenue",
                reason: format!("{} is not a non-negative amount", transaction.revenue),
            });
        }
        let code = &transaction.currency_code;
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(InvalidEvent::InvalidField {
                field: "purchaseTransaction.currencyCode",
                reason: format!("{code:?} is not an ISO 4217 code"),
            });
        }
    }

    Ok(())
}
