//! Order Lifecycle Engine
//!
//! Drives the three partner operations. No state is retained between calls;
//! create idempotence is delegated to the partner via the find-orders lookup.
//! All retry behaviour lives in the HTTP client, never here.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::SERVICE_NAME;
use crate::httpclient::{HttpClientError, Transport};
use crate::metrics;

use super::classify::{classify_item_errors, ClassifyError};
use super::types::{CancelOutcome, CreateOutcome, Order, OrderStatus, StatusSnapshot};

/// Failures of a partner operation. Everything here surfaces to the caller
/// as a generic partner error or a formatted message; retries have already
/// happened inside the HTTP client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure after retry exhaustion.
    #[error(transparent)]
    Http(#[from] HttpClientError),

    /// Body did not parse as the expected partner response shape.
    #[error("Malformed partner response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Partner answered with a status string outside its contract.
    #[error("Invalid answer from remote API: {0}")]
    InvalidResponse(String),

    /// Partner rejected the order without a classifiable item error map.
    #[error("Partner rejected the order without item details")]
    PartnerError,

    /// The item error map could not be classified.
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// Status lookup returned an error payload.
    #[error("Status lookup failed: {0}")]
    StatusLookup(String),
}

#[derive(Debug, Deserialize)]
struct FindOrdersResponse {
    data: FindOrdersData,
}

#[derive(Debug, Deserialize)]
struct FindOrdersData {
    ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    status: String,
    order_id: Option<PartnerOrderId>,
    errors: Option<CreateErrors>,
}

/// The partner is inconsistent about the order id type; both spellings map
/// to the string reference of the internal contract.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PartnerOrderId {
    Number(i64),
    Text(String),
}

impl PartnerOrderId {
    fn into_string(self) -> String {
        match self {
            PartnerOrderId::Number(n) => n.to_string(),
            PartnerOrderId::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateErrors {
    /// Item-id keyed error messages; insertion order is significant.
    items: Option<IndexMap<String, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct OrdersDataResponse {
    status: String,
    data: Option<HashMap<String, OrderStatusEntry>>,
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrderStatusEntry {
    status: String,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    status: Option<String>,
    errors: Option<Vec<String>>,
}

/// Gateway to the partner pharmacy-order API.
///
/// Holds the two client instances tuned for their call patterns: the query
/// client serves lookups, status and cancel; the create client serves order
/// creation, which is less safe to retry.
pub struct PartnerGateway {
    base_url: String,
    query_http: Arc<dyn Transport>,
    create_http: Arc<dyn Transport>,
}

impl PartnerGateway {
    pub fn new(
        base_url: impl Into<String>,
        query_http: Arc<dyn Transport>,
        create_http: Arc<dyn Transport>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            query_http,
            create_http,
        }
    }

    /// Create an order at the partner.
    ///
    /// First queries the partner for orders with this caller id; if any
    /// exist, the numerically smallest is returned as the stable reference
    /// and no create request is issued. Otherwise submits the order and maps
    /// the response, routing per-item rejections through the classifier.
    ///
    /// # Errors
    /// Transport faults, malformed or out-of-contract responses, and
    /// unclassifiable rejections; all map to a generic partner error at the
    /// boundary.
    pub async fn create_order(&self, order: &Order) -> Result<CreateOutcome, GatewayError> {
        let url = format!(
            "{}/find-orders?external_id={}",
            self.base_url, order.order_id
        );
        let (_, body) = self.query_http.request(Method::GET, &url, None).await?;
        let found: FindOrdersResponse = serde_json::from_slice(&body)?;

        if let Some(existing) = found.data.ids.iter().min() {
            info!(
                order_id = order.order_id,
                their_order_id = existing,
                "Order already exists at partner, returning existing reference"
            );
            return Ok(CreateOutcome::Created {
                their_order_id: existing.to_string(),
                items: order.items.clone(),
            });
        }

        let mut form: Vec<(String, String)> = vec![
            ("shop_id".to_string(), order.their_pharmacy_id.clone()),
            ("phone".to_string(), order.client.phone.clone()),
            ("first_name".to_string(), order.client.name.clone()),
            ("email".to_string(), order.client.email.clone()),
            ("external_id".to_string(), order.order_id.to_string()),
        ];
        for item in &order.items {
            form.push((
                "ids[]".to_string(),
                item.their_id.clone().unwrap_or_default(),
            ));
            form.push(("quantity[]".to_string(), item.count.to_string()));
            form.push(("prices[]".to_string(), item.price.to_string()));
        }

        debug!(order_id = order.order_id, "Sending order to partner");
        let url = format!("{}/create", self.base_url);
        let (_, body) = self
            .create_http
            .request(Method::POST, &url, Some(&form))
            .await?;
        let response: CreateResponse = serde_json::from_slice(&body)?;

        match response.status.as_str() {
            "ok" => {
                let their_order_id = response
                    .order_id
                    .ok_or_else(|| {
                        GatewayError::InvalidResponse("'ok' response without order_id".to_string())
                    })?
                    .into_string();
                debug!(
                    order_id = order.order_id,
                    their_order_id = %their_order_id,
                    "Order created at partner"
                );
                Ok(CreateOutcome::Created {
                    their_order_id,
                    items: order.items.clone(),
                })
            }
            "error" => {
                let items = response
                    .errors
                    .and_then(|e| e.items)
                    .ok_or(GatewayError::PartnerError)?;
                let classified = classify_item_errors(&items, order)?;
                error!(
                    order_id = order.order_id,
                    quantity_errors = classified.quantity.len(),
                    price_errors = classified.price.len(),
                    "Quantity or price errors while creating order"
                );
                Ok(CreateOutcome::Discrepancy(classified))
            }
            other => Err(GatewayError::InvalidResponse(format!(
                "unexpected status '{other}'"
            ))),
        }
    }

    /// Look up the partner status for an order and map it through the fixed
    /// table. An unmapped status string yields `OrderStatus::Unknown` and
    /// fires the status-mapping-error counter; the caller decides whether a
    /// transition happened.
    pub async fn order_status(
        &self,
        order_id: i64,
        their_order_id: &str,
    ) -> Result<StatusSnapshot, GatewayError> {
        debug!(order_id, "Getting order info from partner");
        let url = format!(
            "{}/orders-data?order_ids={}",
            self.base_url, their_order_id
        );
        let (_, body) = self.query_http.request(Method::GET, &url, None).await?;
        let response: OrdersDataResponse = serde_json::from_slice(&body)?;

        if response.status != "ok" {
            let errors = response.errors.unwrap_or(serde_json::Value::Null);
            return Err(GatewayError::StatusLookup(errors.to_string()));
        }

        let entry = response
            .data
            .as_ref()
            .and_then(|data| data.get(their_order_id))
            .ok_or_else(|| {
                GatewayError::StatusLookup(format!("no data for order '{their_order_id}'"))
            })?;

        let status = OrderStatus::from_partner(&entry.status);
        if status == OrderStatus::Unknown {
            error!(their_status = %entry.status, "Order status mapping error");
            metrics::record_status_mapping_error(SERVICE_NAME);
        }

        Ok(StatusSnapshot {
            status,
            partner_status: entry.status.clone(),
        })
    }

    /// Cancel an order at the partner.
    ///
    /// Always resolves to one of the three outcomes; transport faults and
    /// malformed bodies become `Transient`, never a propagated error.
    pub async fn cancel_order(&self, order_id: i64, their_order_id: &str) -> CancelOutcome {
        match self.try_cancel(their_order_id).await {
            Ok(outcome) => {
                if outcome == CancelOutcome::Success {
                    info!(order_id, their_order_id, "Order cancelled");
                }
                outcome
            }
            Err(e) => {
                error!(
                    order_id,
                    their_order_id,
                    error = %e,
                    "HTTP response error while cancelling order"
                );
                CancelOutcome::Transient {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn try_cancel(&self, their_order_id: &str) -> Result<CancelOutcome, GatewayError> {
        let form = vec![("order_id".to_string(), their_order_id.to_string())];
        let url = format!("{}/cancel", self.base_url);
        let (_, body) = self
            .query_http
            .request(Method::POST, &url, Some(&form))
            .await?;
        let response: CancelResponse = serde_json::from_slice(&body)?;

        if response.status.as_deref() == Some("ok") {
            return Ok(CancelOutcome::Success);
        }

        let errors = response.errors.unwrap_or_default();
        let message = errors.join("; ");
        match errors.first().map(String::as_str) {
            Some("cancellation not allowed") => Ok(CancelOutcome::Rejected { message }),
            _ => Ok(CancelOutcome::Transient { message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::types::{ClientInfo, OrderItem, OrderType};
    use bytes::Bytes;
    use chrono::Utc;
    use reqwest::StatusCode;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Recorded = (Method, String, Option<Vec<(String, String)>>);

    /// Scripted transport: pops canned responses in order and records every
    /// request it sees.
    #[derive(Default)]
    struct StubTransport {
        requests: Mutex<Vec<Recorded>>,
        responses: Mutex<VecDeque<Result<(StatusCode, Bytes), HttpClientError>>>,
    }

    impl StubTransport {
        fn with(responses: Vec<Result<(StatusCode, Bytes), HttpClientError>>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(responses.into()),
            })
        }

        fn ok(body: &str) -> Result<(StatusCode, Bytes), HttpClientError> {
            Ok((StatusCode::OK, Bytes::copy_from_slice(body.as_bytes())))
        }

        fn recorded(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for StubTransport {
        async fn request(
            &self,
            method: Method,
            url: &str,
            form: Option<&[(String, String)]>,
        ) -> Result<(StatusCode, Bytes), HttpClientError> {
            self.requests
                .lock()
                .unwrap()
                .push((method, url.to_string(), form.map(<[_]>::to_vec)));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("stub transport ran out of scripted responses")
        }
    }

    fn test_order(order_type: OrderType) -> Order {
        Order {
            order_id: 5001,
            date: Utc::now(),
            client: ClientInfo {
                name: "Ivanova A A".to_string(),
                phone: "79000000000".to_string(),
                email: "c@example.com".to_string(),
            },
            their_pharmacy_id: "341".to_string(),
            order_type,
            items: vec![OrderItem {
                their_id: Some("21737".to_string()),
                price: dec!(300),
                count: 20,
                part: None,
            }],
            comment: None,
            extra: HashMap::new(),
        }
    }

    fn gateway(
        query: &Arc<StubTransport>,
        create: &Arc<StubTransport>,
    ) -> PartnerGateway {
        PartnerGateway::new(
            "http://partner",
            Arc::clone(query) as Arc<dyn Transport>,
            Arc::clone(create) as Arc<dyn Transport>,
        )
    }

    #[tokio::test]
    async fn test_create_returns_existing_order_without_create_call() {
        let query = StubTransport::with(vec![StubTransport::ok(
            r#"{"data": {"ids": [7262, 7115]}}"#,
        )]);
        let create = StubTransport::with(vec![]);

        let outcome = gateway(&query, &create)
            .create_order(&test_order(OrderType::Preorder))
            .await
            .unwrap();

        match outcome {
            CreateOutcome::Created { their_order_id, .. } => {
                // Smallest of the returned ids is the stable reference.
                assert_eq!(their_order_id, "7115");
            }
            other => panic!("expected Created, got {:?}", other),
        }
        // The create-tuned client was never touched.
        assert!(create.recorded().is_empty());
        assert_eq!(
            query.recorded()[0].1,
            "http://partner/find-orders?external_id=5001"
        );
    }

    #[tokio::test]
    async fn test_create_submits_form_and_returns_reference() {
        let query = StubTransport::with(vec![StubTransport::ok(r#"{"data": {"ids": []}}"#)]);
        let create = StubTransport::with(vec![StubTransport::ok(
            r#"{"status": "ok", "order_id": 7115}"#,
        )]);

        let outcome = gateway(&query, &create)
            .create_order(&test_order(OrderType::Preorder))
            .await
            .unwrap();

        match outcome {
            CreateOutcome::Created {
                their_order_id,
                items,
            } => {
                assert_eq!(their_order_id, "7115");
                assert_eq!(items.len(), 1);
            }
            other => panic!("expected Created, got {:?}", other),
        }

        let (method, url, form) = &create.recorded()[0];
        assert_eq!(*method, Method::POST);
        assert_eq!(url, "http://partner/create");
        let form = form.as_ref().unwrap();
        let field = |name: &str| {
            form.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(field("shop_id"), Some("341"));
        assert_eq!(field("external_id"), Some("5001"));
        assert_eq!(field("ids[]"), Some("21737"));
        assert_eq!(field("quantity[]"), Some("20"));
        assert_eq!(field("prices[]"), Some("300"));
    }

    #[tokio::test]
    async fn test_create_string_order_id_accepted() {
        let query = StubTransport::with(vec![StubTransport::ok(r#"{"data": {"ids": []}}"#)]);
        let create = StubTransport::with(vec![StubTransport::ok(
            r#"{"status": "ok", "order_id": "A-7115"}"#,
        )]);

        let outcome = gateway(&query, &create)
            .create_order(&test_order(OrderType::Preorder))
            .await
            .unwrap();
        match outcome {
            CreateOutcome::Created { their_order_id, .. } => {
                assert_eq!(their_order_id, "A-7115")
            }
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_classifies_item_errors() {
        let query = StubTransport::with(vec![StubTransport::ok(r#"{"data": {"ids": []}}"#)]);
        let create = StubTransport::with(vec![StubTransport::ok(
            r#"{"status":"error","errors":{"items":{"21737":["Item not found"]}}}"#,
        )]);

        let outcome = gateway(&query, &create)
            .create_order(&test_order(OrderType::Preorder))
            .await
            .unwrap();

        match outcome {
            CreateOutcome::Discrepancy(classified) => {
                assert_eq!(classified.quantity[0].their_id, "21737");
                assert_eq!(classified.quantity[0].ordered, Some(20));
                assert_eq!(classified.quantity[0].available, Some(0));
                assert!(classified.price.is_empty());
            }
            other => panic!("expected Discrepancy, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_error_without_items_is_partner_error() {
        let query = StubTransport::with(vec![StubTransport::ok(r#"{"data": {"ids": []}}"#)]);
        let create = StubTransport::with(vec![StubTransport::ok(
            r#"{"status":"error","errors":{"phone":"Required format 79XXXXXXXXX"}}"#,
        )]);

        let result = gateway(&query, &create)
            .create_order(&test_order(OrderType::Preorder))
            .await;
        assert!(matches!(result, Err(GatewayError::PartnerError)));
    }

    #[tokio::test]
    async fn test_create_unrecognized_item_message_is_unclassifiable() {
        let query = StubTransport::with(vec![StubTransport::ok(r#"{"data": {"ids": []}}"#)]);
        let create = StubTransport::with(vec![StubTransport::ok(
            r#"{"status":"error","errors":{"items":{"21737":["Unknown answer from items."]}}}"#,
        )]);

        let result = gateway(&query, &create)
            .create_order(&test_order(OrderType::Preorder))
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Classify(ClassifyError::Unclassifiable))
        ));
    }

    #[tokio::test]
    async fn test_create_unexpected_status_is_invalid_response() {
        let query = StubTransport::with(vec![StubTransport::ok(r#"{"data": {"ids": []}}"#)]);
        let create =
            StubTransport::with(vec![StubTransport::ok(r#"{"status":"unknown_answer"}"#)]);

        let result = gateway(&query, &create)
            .create_order(&test_order(OrderType::Preorder))
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_status_lookup_maps_partner_status() {
        let query = StubTransport::with(vec![StubTransport::ok(
            r#"{"status":"ok","data":{"7115":{"status":"delivery"}}}"#,
        )]);
        let create = StubTransport::with(vec![]);

        let snapshot = gateway(&query, &create)
            .order_status(5001, "7115")
            .await
            .unwrap();
        assert_eq!(snapshot.status, OrderStatus::Accepted);
        assert_eq!(snapshot.status.code(), 1);
        assert_eq!(snapshot.partner_status, "delivery");
    }

    #[tokio::test]
    async fn test_status_lookup_unmapped_string_yields_unknown() {
        let query = StubTransport::with(vec![StubTransport::ok(
            r#"{"status":"ok","data":{"7115":{"status":"teleported"}}}"#,
        )]);
        let create = StubTransport::with(vec![]);
        let mapping_errors = || {
            metrics::STATUS_MAPPING_ERRORS
                .with_label_values(&[SERVICE_NAME])
                .get()
        };
        let before = mapping_errors();

        let snapshot = gateway(&query, &create)
            .order_status(5001, "7115")
            .await
            .unwrap();
        assert_eq!(snapshot.status.code(), -1);
        assert_eq!(snapshot.partner_status, "teleported");
        // The mapping-error counter fires exactly once for the call.
        assert_eq!(mapping_errors() - before, 1);
    }

    #[tokio::test]
    async fn test_status_lookup_error_payload_surfaces() {
        let query = StubTransport::with(vec![StubTransport::ok(
            r#"{"status":"error","errors":["order not found"]}"#,
        )]);
        let create = StubTransport::with(vec![]);

        let result = gateway(&query, &create).order_status(5001, "7115").await;
        match result {
            Err(GatewayError::StatusLookup(message)) => {
                assert!(message.contains("order not found"))
            }
            other => panic!("expected StatusLookup error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_lookup_missing_order_in_data_fails() {
        let query = StubTransport::with(vec![StubTransport::ok(
            r#"{"status":"ok","data":{"9999":{"status":"done"}}}"#,
        )]);
        let create = StubTransport::with(vec![]);

        let result = gateway(&query, &create).order_status(5001, "7115").await;
        assert!(matches!(result, Err(GatewayError::StatusLookup(_))));
    }

    #[tokio::test]
    async fn test_cancel_trichotomy() {
        let query = StubTransport::with(vec![
            StubTransport::ok(r#"{"status": "ok", "data": []}"#),
            StubTransport::ok(r#"{"status": "error", "errors": ["cancellation not allowed"]}"#),
            StubTransport::ok(r#"{"status": "error", "errors": []}"#),
        ]);
        let create = StubTransport::with(vec![]);
        let gateway = gateway(&query, &create);

        assert_eq!(
            gateway.cancel_order(5001, "7115").await,
            CancelOutcome::Success
        );
        assert!(matches!(
            gateway.cancel_order(5001, "7115").await,
            CancelOutcome::Rejected { .. }
        ));
        assert!(matches!(
            gateway.cancel_order(5001, "7115").await,
            CancelOutcome::Transient { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_transport_fault_resolves_to_transient() {
        let query = StubTransport::with(vec![Err(HttpClientError::BodyTooLarge { limit: 16 })]);
        let create = StubTransport::with(vec![]);

        let outcome = gateway(&query, &create).cancel_order(5001, "7115").await;
        match outcome {
            CancelOutcome::Transient { message } => assert!(message.contains("too big")),
            other => panic!("expected Transient, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_malformed_body_resolves_to_transient() {
        let query = StubTransport::with(vec![StubTransport::ok("not json at all")]);
        let create = StubTransport::with(vec![]);

        let outcome = gateway(&query, &create).cancel_order(5001, "7115").await;
        assert!(matches!(outcome, CancelOutcome::Transient { .. }));
    }
}
