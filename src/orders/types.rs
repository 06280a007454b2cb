//! Core types for the order adapter.
//!
//! All values here are request-scoped and immutable after construction; the
//! adapter owns no persistent store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for caller- and partner-assigned string identifiers.
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Order type. The partner quotes two prices in its error messages and which
/// one applies depends on this: reservation price first, preorder second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OrderType {
    Preorder,
    Reservation,
}

impl TryFrom<u8> for OrderType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OrderType::Preorder),
            2 => Ok(OrderType::Reservation),
            other => Err(format!(
                "Unknown order type: {}. Valid options: 1 (preorder), 2 (reservation)",
                other
            )),
        }
    }
}

impl From<OrderType> for u8 {
    fn from(value: OrderType) -> Self {
        match value {
            OrderType::Preorder => 1,
            OrderType::Reservation => 2,
        }
    }
}

/// Client contact details forwarded to the partner create call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub phone: String,
    pub email: String,
}

/// One ordered line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    /// Item identifier in the partner system.
    pub their_id: Option<String>,
    /// Unit price, positive.
    pub price: Decimal,
    /// Quantity, at least 1.
    pub count: u32,
    /// Lot identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
}

/// Inbound order in the internal schema.
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    /// Caller-assigned order identifier, unique per caller.
    pub order_id: i64,
    pub date: DateTime<Utc>,
    pub client: ClientInfo,
    pub their_pharmacy_id: String,
    pub order_type: OrderType,
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Opaque extra payload, passed through untouched.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Invariant violations in an inbound order, rejected before any upstream call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Order must contain at least one item")]
    NoItems,

    #[error("Item quantity must be at least 1")]
    ZeroCount,

    #[error("Item price must be positive")]
    NonPositivePrice,

    #[error("Identifier exceeds {MAX_IDENTIFIER_LEN} characters")]
    IdentifierTooLong,
}

impl Order {
    /// Check the order invariants: non-empty, count >= 1, price > 0,
    /// bounded identifiers.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            return Err(ValidationError::NoItems);
        }
        for item in &self.items {
            if item.count < 1 {
                return Err(ValidationError::ZeroCount);
            }
            if item.price <= Decimal::ZERO {
                return Err(ValidationError::NonPositivePrice);
            }
            for id in [&item.their_id, &item.part] {
                if id.as_ref().is_some_and(|s| s.len() > MAX_IDENTIFIER_LEN) {
                    return Err(ValidationError::IdentifierTooLong);
                }
            }
        }
        Ok(())
    }
}

/// Internal status code derived from the fixed partner status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Partner status string has no mapping.
    Unknown,
    Created,
    /// Accepted or in delivery.
    Accepted,
    Done,
    Cancelled,
    InShop,
}

impl OrderStatus {
    /// Map a partner status string through the fixed table. Unmapped strings
    /// yield `Unknown`; the caller is responsible for the mapping-error signal.
    pub fn from_partner(status: &str) -> Self {
        match status {
            "created" => OrderStatus::Created,
            "accepted" | "delivery" => OrderStatus::Accepted,
            "in_shop" => OrderStatus::InShop,
            "done" => OrderStatus::Done,
            "cancelled" => OrderStatus::Cancelled,
            _ => OrderStatus::Unknown,
        }
    }

    /// Numeric code of the internal contract.
    pub fn code(self) -> i8 {
        match self {
            OrderStatus::Unknown => -1,
            OrderStatus::Created => 0,
            OrderStatus::Accepted => 1,
            OrderStatus::Done => 2,
            OrderStatus::Cancelled => 3,
            OrderStatus::InShop => 4,
        }
    }
}

/// Per-item quantity discrepancy. `available` absent means unknown;
/// present-as-zero means none in stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuantityError {
    pub their_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<u32>,
}

/// Per-item price discrepancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceError {
    pub their_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<Decimal>,
}

/// Structured result of classifying a partner error map. Both lists empty is
/// not a valid classification; the classifier fails instead of producing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedErrors {
    pub quantity: Vec<QuantityError>,
    pub price: Vec<PriceError>,
}

impl ClassifiedErrors {
    pub fn is_empty(&self) -> bool {
        self.quantity.is_empty() && self.price.is_empty()
    }
}

/// Outcome of an order-create call that produced a defined partner answer.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// Order exists at the partner, newly created or found by the dedup
    /// lookup. The submitted items are echoed back to the caller.
    Created {
        their_order_id: String,
        items: Vec<OrderItem>,
    },
    /// Partner rejected the order with classifiable quantity/price errors.
    Discrepancy(ClassifiedErrors),
}

/// Result of a status lookup.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub status: OrderStatus,
    /// Raw partner status string, surfaced for the caller.
    pub partner_status: String,
}

/// Outcome of a cancel call. Cancel always resolves to one of these three;
/// no fault escapes the cancel entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Success,
    /// Permanent business-rule refusal; must not be retried.
    Rejected { message: String },
    /// Transient failure; the caller may retry later.
    Transient { message: String },
}
