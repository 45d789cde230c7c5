//! Raw UI-layer inputs and client-side construction.

use crate::types::{build_payload, require_visitor_id, PayloadFields, Validation};
use crate::{
    Event, EventResult, EventType, InvalidEvent, PageContext, ProductDetail, PurchaseTransaction,
    DEFAULT_CURRENCY_CODE,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a UI action knows about an interaction.
///
/// The visitor id, page-view id and timestamp are not part of the input;
/// the tracker attaches them when the event is enqueued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub event_type: String,
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub page_categories: Vec<String>,
    #[serde(default)]
    pub products: Vec<ProductDetail>,
    #[serde(default)]
    pub cart_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub revenue: Option<f64>,
    #[serde(default)]
    pub currency_code: Option<String>,
    #[serde(default)]
    pub attribution_token: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

impl EventInput {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    pub fn search_query(mut self, query: impl Into<String>) -> Self {
        self.search_query = Some(query.into());
        self
    }

    pub fn page_category(mut self, category: impl Into<String>) -> Self {
        self.page_categories.push(category.into());
        self
    }

    /// Append a product line without a quantity.
    pub fn product(mut self, product_id: impl Into<String>) -> Self {
        self.products.push(ProductDetail::new(product_id));
        self
    }

    /// Append a product line with a quantity.
    pub fn product_quantity(mut self, product_id: impl Into<String>, quantity: u32) -> Self {
        self.products
            .push(ProductDetail::with_quantity(product_id, quantity));
        self
    }

    pub fn cart_id(mut self, cart_id: impl Into<String>) -> Self {
        self.cart_id = Some(cart_id.into());
        self
    }

    pub fn transaction(mut self, id: impl Into<String>, revenue: f64) -> Self {
        self.transaction_id = Some(id.into());
        self.revenue = Some(revenue);
        self
    }

    pub fn currency_code(mut self, code: impl Into<String>) -> Self {
        self.currency_code = Some(code.into());
        self
    }

    pub fn attribution(mut self, token: impl Into<String>, filter: Option<String>) -> Self {
        self.attribution_token = Some(token.into());
        self.filter = filter;
        self
    }

    fn into_fields(self, event_type: EventType) -> EventResult<PayloadFields> {
        let purchase_transaction = if event_type == EventType::PurchaseComplete {
            let id = self.transaction_id.ok_or(InvalidEvent::MissingField {
                event_type,
                field: "purchaseTransaction.id",
            })?;
            let revenue = self.revenue.ok_or(InvalidEvent::MissingField {
                event_type,
                field: "purchaseTransaction.revenue",
            })?;
            Some(PurchaseTransaction {
                id,
                revenue,
                currency_code: self
                    .currency_code
                    .unwrap_or_else(|| DEFAULT_CURRENCY_CODE.to_string()),
            })
        } else {
            None
        };

        Ok(PayloadFields {
            search_query: self.search_query,
            page_categories: Some(self.page_categories),
            product_details: Some(self.products),
            cart_id: self.cart_id,
            purchase_transaction,
        })
    }
}

impl Event {
    /// Build an event from UI inputs, attaching the page's identity and `now`.
    ///
    /// Fails on an unrecognized type, a missing visitor id, or a missing
    /// field the type requires. Nothing else is checked here.
    pub fn from_input(
        input: EventInput,
        page: &PageContext,
        now: DateTime<Utc>,
    ) -> EventResult<Self> {
        let event_type: EventType = input.event_type.parse()?;
        let visitor_id = require_visitor_id(page.visitor_id.clone())?;
        let attribution_token = input.attribution_token.clone();
        let filter = input.filter.clone();
        let payload = build_payload(
            event_type,
            input.into_fields(event_type)?,
            Validation::Required,
        )?;

        Ok(Self {
            visitor_id,
            page_view_id: page.page_view_id.clone(),
            event_time: now,
            payload,
            attribution_token,
            filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventPayload;

    fn page() -> PageContext {
        PageContext {
            visitor_id: Some("visitor-1".into()),
            page_view_id: "pv-1".into(),
        }
    }

    #[test]
    fn builds_search_event() {
        let input = EventInput::new("search")
            .search_query("weber")
            .product("A")
            .product("B");

        let event = Event::from_input(input, &page(), Utc::now()).unwrap();
        assert_eq!(event.event_type(), EventType::Search);
        assert_eq!(event.visitor_id(), "visitor-1");
        assert_eq!(event.page_view_id(), "pv-1");
        assert_eq!(
            event.payload(),
            &EventPayload::Search {
                query: "weber".into(),
                results: vec![ProductDetail::new("A"), ProductDetail::new("B")],
            }
        );
    }

    #[test]
    fn search_without_query_is_invalid() {
        let err = Event::from_input(EventInput::new("search"), &page(), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            InvalidEvent::MissingField {
                event_type: EventType::Search,
                field: "searchQuery"
            }
        );
    }

    #[test]
    fn missing_visitor_is_invalid() {
        let page = PageContext {
            visitor_id: None,
            page_view_id: "pv-1".into(),
        };
        let err = Event::from_input(EventInput::new("home-page-view"), &page, Utc::now())
            .unwrap_err();
        assert_eq!(err, InvalidEvent::MissingVisitorId);

        let page = PageContext {
            visitor_id: Some("   ".into()),
            page_view_id: "pv-1".into(),
        };
        let err = Event::from_input(EventInput::new("home-page-view"), &page, Utc::now())
            .unwrap_err();
        assert_eq!(err, InvalidEvent::MissingVisitorId);
    }

    #[test]
    fn unknown_type_is_invalid() {
        let err =
            Event::from_input(EventInput::new("wishlist-add"), &page(), Utc::now()).unwrap_err();
        assert_eq!(err, InvalidEvent::UnknownEventType("wishlist-add".into()));
    }

    #[test]
    fn purchase_requires_transaction() {
        let input = EventInput::new("purchase-complete").product_quantity("X", 1);
        let err = Event::from_input(input, &page(), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            InvalidEvent::MissingField {
                event_type: EventType::PurchaseComplete,
                field: "purchaseTransaction.id"
            }
        );
    }

    #[test]
    fn purchase_defaults_currency() {
        let input = EventInput::new("purchase-complete")
            .product_quantity("X", 1)
            .transaction("T1", 42.0);
        let event = Event::from_input(input, &page(), Utc::now()).unwrap();
        match event.payload() {
            EventPayload::PurchaseComplete { transaction, .. } => {
                assert_eq!(transaction.id, "T1");
                assert_eq!(transaction.revenue, 42.0);
                assert_eq!(transaction.currency_code, "USD");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn identical_inputs_build_equal_payloads() {
        let input = EventInput::new("add-to-cart")
            .product_quantity("X", 2)
            .attribution("token-1", Some("brand: weber".into()));

        let first = Event::from_input(input.clone(), &page(), Utc::now()).unwrap();
        let other_page = PageContext::new(Some("visitor-1".into()));
        let second = Event::from_input(input, &other_page, Utc::now()).unwrap();

        assert_eq!(first.event_type(), second.event_type());
        assert_eq!(first.payload(), second.payload());
        assert_eq!(first.attribution_token(), second.attribution_token());
        assert_eq!(first.filter(), second.filter());
        assert_ne!(first.page_view_id(), second.page_view_id());
    }

    #[test]
    fn input_deserializes_from_ui_json() {
        let input: EventInput = serde_json::from_str(
            r#"{"eventType":"detail-page-view","products":[{"product":{"id":"P1"}}]}"#,
        )
        .unwrap();
        assert_eq!(input, EventInput::new("detail-page-view").product("P1"));
    }
}
