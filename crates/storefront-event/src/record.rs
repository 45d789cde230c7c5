//! Flat wire representation shared by the client queue and the forwarder.

use crate::types::{build_payload, require_visitor_id, PayloadFields, Validation};
use crate::{Event, EventPayload, EventType, InvalidEvent, ProductDetail, PurchaseTransaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request header carrying the 1-based attempt number of a submission.
pub const ATTEMPT_HEADER: &str = "x-delivery-attempt";

/// An event as it travels over HTTP.
///
/// Every field is optional so that a malformed submission still decodes and
/// can be rejected with a precise [`InvalidEvent`] instead of a parse error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_view_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_details: Option<Vec<ProductDetail>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_transaction: Option<PurchaseTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

fn non_empty<T>(items: &[T]) -> Option<Vec<T>>
where
    T: Clone,
{
    (!items.is_empty()).then(|| items.to_vec())
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        let mut record = EventRecord {
            event_type: Some(event.event_type().as_str().to_string()),
            visitor_id: Some(event.visitor_id.clone()),
            page_view_id: Some(event.page_view_id.clone()),
            event_time: Some(event.event_time),
            attribution_token: event.attribution_token.clone(),
            filter: event.filter.clone(),
            ..Default::default()
        };

        match &event.payload {
            EventPayload::HomePageView => {}
            EventPayload::CategoryPageView { page_categories } => {
                record.page_categories = Some(page_categories.clone());
            }
            EventPayload::Search { query, results } => {
                record.search_query = Some(query.clone());
                record.product_details = non_empty(results);
            }
            EventPayload::DetailPageView { products }
            | EventPayload::AddToCart { products }
            | EventPayload::RemoveFromCart { products } => {
                record.product_details = non_empty(products);
            }
            EventPayload::ShoppingCartPageView { cart_id, products } => {
                record.cart_id = cart_id.clone();
                record.product_details = non_empty(products);
            }
            EventPayload::PurchaseComplete {
                products,
                transaction,
            } => {
                record.product_details = non_empty(products);
                record.purchase_transaction = Some(transaction.clone());
            }
        }

        record
    }
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        EventRecord::from(&event)
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = InvalidEvent;

    /// Full schema check: type, identity, shape and value ranges.
    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let event_type: EventType = record
            .event_type
            .as_deref()
            .ok_or(InvalidEvent::MissingEventType)?
            .parse()?;
        let visitor_id = require_visitor_id(record.visitor_id)?;
        let page_view_id = record
            .page_view_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(InvalidEvent::MissingField {
                event_type,
                field: "pageViewId",
            })?;

        let fields = PayloadFields {
            search_query: record.search_query,
            page_categories: record.page_categories,
            product_details: record.product_details,
            cart_id: record.cart_id,
            purchase_transaction: record.purchase_transaction,
        };
        let payload = build_payload(event_type, fields, Validation::Full)?;

        Ok(Event {
            visitor_id,
            page_view_id,
            event_time: record.event_time.unwrap_or_else(Utc::now),
            payload,
            attribution_token: record.attribution_token,
            filter: record.filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventInput, PageContext};
    use serde_json::json;

    fn page() -> PageContext {
        PageContext {
            visitor_id: Some("visitor-1".into()),
            page_view_id: "pv-1".into(),
        }
    }

    #[test]
    fn search_record_matches_wire_shape() {
        let input = EventInput::new("search")
            .search_query("weber")
            .product("A")
            .product("B");
        let event = Event::from_input(input, &page(), Utc::now()).unwrap();

        let mut value = serde_json::to_value(EventRecord::from(&event)).unwrap();
        value.as_object_mut().unwrap().remove("eventTime");

        assert_eq!(
            value,
            json!({
                "eventType": "search",
                "visitorId": "visitor-1",
                "pageViewId": "pv-1",
                "searchQuery": "weber",
                "productDetails": [
                    {"product": {"id": "A"}},
                    {"product": {"id": "B"}}
                ]
            })
        );
    }

    #[test]
    fn record_decodes_back_to_same_event() {
        let input = EventInput::new("purchase-complete")
            .product_quantity("X", 1)
            .transaction("T1", 42.0)
            .attribution("tok", None);
        let event = Event::from_input(input, &page(), Utc::now()).unwrap();

        let json = serde_json::to_string(&EventRecord::from(&event)).unwrap();
        let record: EventRecord = serde_json::from_str(&json).unwrap();
        let decoded = Event::try_from(record).unwrap();

        assert_eq!(decoded, event);
    }

    #[test]
    fn record_without_event_type_is_invalid() {
        let record = EventRecord {
            visitor_id: Some("v".into()),
            ..Default::default()
        };
        assert_eq!(
            Event::try_from(record).unwrap_err(),
            InvalidEvent::MissingEventType
        );
    }

    #[test]
    fn record_without_visitor_is_invalid() {
        let record: EventRecord =
            serde_json::from_value(json!({"eventType": "home-page-view", "pageViewId": "pv"}))
                .unwrap();
        assert_eq!(
            Event::try_from(record).unwrap_err(),
            InvalidEvent::MissingVisitorId
        );
    }

    #[test]
    fn record_with_foreign_field_is_invalid() {
        let record: EventRecord = serde_json::from_value(json!({
            "eventType": "detail-page-view",
            "visitorId": "v",
            "pageViewId": "pv",
            "productDetails": [{"product": {"id": "A"}}],
            "purchaseTransaction": {"id": "T1", "revenue": 1.0}
        }))
        .unwrap();
        assert_eq!(
            Event::try_from(record).unwrap_err(),
            InvalidEvent::ShapeMismatch {
                event_type: EventType::DetailPageView,
                field: "purchaseTransaction"
            }
        );
    }

    #[test]
    fn record_without_time_gets_receipt_time() {
        let before = Utc::now();
        let record: EventRecord = serde_json::from_value(json!({
            "eventType": "home-page-view",
            "visitorId": "v",
            "pageViewId": "pv"
        }))
        .unwrap();
        let event = Event::try_from(record).unwrap();
        assert!(event.event_time() >= before);
    }
}
