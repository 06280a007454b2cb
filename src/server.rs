//! Inbound HTTP surface.
//!
//! A thin dispatcher over the order lifecycle engine: validates, calls the
//! gateway, serializes the stable internal contract, and fires the order
//! counters. No business logic lives here. Also serves /health and /metrics
//! for monitoring.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::SERVICE_NAME;
use crate::metrics;
use crate::orders::{
    CancelOutcome, ClassifiedErrors, CreateOutcome, Order, OrderItem, PartnerGateway, PriceError,
    QuantityError,
};

/// Status query: `their_status_id` is the caller's previously known code,
/// used to detect transitions.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub order_id: i64,
    pub their_order_id: String,
    #[serde(default)]
    pub their_status_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub order_id: i64,
    pub their_order_id: String,
    #[serde(default)]
    pub their_pharmacy_id: Option<String>,
    #[serde(default)]
    pub client_phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuantityErrorList {
    pub items: Vec<QuantityError>,
}

#[derive(Debug, Serialize)]
pub struct PriceErrorList {
    pub items: Vec<PriceError>,
}

/// Error payload of a failed create call.
#[derive(Debug, Default, Serialize)]
pub struct ErrorData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity_errors: Option<QuantityErrorList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_errors: Option<PriceErrorList>,
}

impl ErrorData {
    fn partner_error() -> Self {
        Self {
            partner_error: Some(true),
            ..Self::default()
        }
    }

    fn from_classified(classified: ClassifiedErrors) -> Self {
        Self {
            quantity_errors: (!classified.quantity.is_empty()).then(|| QuantityErrorList {
                items: classified.quantity,
            }),
            price_errors: (!classified.price.is_empty()).then(|| PriceErrorList {
                items: classified.price,
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SendOrderResponse {
    Success {
        their_order_id: String,
        items: Vec<OrderItem>,
    },
    Error {
        data: ErrorData,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GetOrderStatusResponse {
    Success { status_id: i8, partner_status: String },
    Error { message: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CancelOrderResponse {
    Success,
    OrderCancelRejected { message: String },
    TransientError { message: String },
}

async fn create_order(
    State(gateway): State<Arc<PartnerGateway>>,
    Json(order): Json<Order>,
) -> (StatusCode, Json<SendOrderResponse>) {
    if let Err(e) = order.validate() {
        warn!(order_id = order.order_id, error = %e, "Rejected invalid order");
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(SendOrderResponse::Error {
                data: ErrorData {
                    service_error: Some(true),
                    ..ErrorData::default()
                },
            }),
        );
    }

    match gateway.create_order(&order).await {
        Ok(CreateOutcome::Created {
            their_order_id,
            items,
        }) => {
            metrics::record_order_created(SERVICE_NAME);
            (
                StatusCode::OK,
                Json(SendOrderResponse::Success {
                    their_order_id,
                    items,
                }),
            )
        }
        Ok(CreateOutcome::Discrepancy(classified)) => {
            metrics::record_order_creation_error(SERVICE_NAME);
            (
                StatusCode::OK,
                Json(SendOrderResponse::Error {
                    data: ErrorData::from_classified(classified),
                }),
            )
        }
        Err(e) => {
            error!(order_id = order.order_id, error = %e, "Error while creating order");
            metrics::record_order_creation_error(SERVICE_NAME);
            (
                StatusCode::OK,
                Json(SendOrderResponse::Error {
                    data: ErrorData::partner_error(),
                }),
            )
        }
    }
}

async fn get_order_status(
    State(gateway): State<Arc<PartnerGateway>>,
    Query(query): Query<StatusQuery>,
) -> Json<GetOrderStatusResponse> {
    match gateway
        .order_status(query.order_id, &query.their_order_id)
        .await
    {
        Ok(snapshot) => {
            let status_id = snapshot.status.code();
            if query
                .their_status_id
                .is_some_and(|previous| previous != i64::from(status_id))
            {
                metrics::record_status_changed(SERVICE_NAME);
            }
            Json(GetOrderStatusResponse::Success {
                status_id,
                partner_status: snapshot.partner_status,
            })
        }
        Err(e) => {
            error!(order_id = query.order_id, error = %e, "Error while getting order status");
            Json(GetOrderStatusResponse::Error {
                message: e.to_string(),
            })
        }
    }
}

async fn cancel_order(
    State(gateway): State<Arc<PartnerGateway>>,
    Json(request): Json<CancelOrderRequest>,
) -> Json<CancelOrderResponse> {
    let outcome = gateway
        .cancel_order(request.order_id, &request.their_order_id)
        .await;

    Json(match outcome {
        CancelOutcome::Success => CancelOrderResponse::Success,
        CancelOutcome::Rejected { message } => CancelOrderResponse::OrderCancelRejected { message },
        CancelOutcome::Transient { message } => CancelOrderResponse::TransientError { message },
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().timestamp(),
    })
}

async fn metrics_endpoint() -> String {
    metrics::gather_metrics()
}

/// Build the service router.
pub fn router(gateway: Arc<PartnerGateway>) -> Router {
    Router::new()
        .route(
            "/v2/orders",
            axum::routing::post(create_order)
                .get(get_order_status)
                .delete(cancel_order),
        )
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(gateway)
}

/// Serve the inbound API until the process is stopped.
pub async fn run_server(port: u16, gateway: Arc<PartnerGateway>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("API server listening on {}", addr);
    axum::serve(listener, router(gateway)).await
}
