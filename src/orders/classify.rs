//! Partner Error Classifier
//!
//! The partner reports create-call rejections as free text per item, in one
//! fixed grammar:
//!
//! - `"Item not found"`: the item does not exist at the partner
//! - `"Wrong quantity"`: the requested quantity is unavailable
//! - `"Wrong price: current price is 641.52 or NONE"`: two price quotes,
//!   reservation price first, preorder price second. `NONE` means the item
//!   is out of stock for that order type.
//!
//! Anything else is unrecognized and skipped per item, but a classification
//! that recognizes nothing at all fails rather than returning an empty
//! success.

use std::str::FromStr;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use super::types::{ClassifiedErrors, Order, OrderItem, OrderType, PriceError, QuantityError};

lazy_static! {
    /// Decimal-looking tokens and the literal `NONE`, in order of appearance.
    static ref PRICE_TOKENS: Regex =
        Regex::new(r"NONE|[0-9]*[.,]?[0-9]+").expect("price token pattern is valid");
}

/// Failures of the classification itself. Any of these surfaces to the caller
/// as a generic partner error, never as a silent empty success.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    /// A recognized message references an item the order never contained.
    #[error("Partner error map references unknown item '{their_id}'")]
    UnknownItem { their_id: String },

    /// The partner sent an empty message list for an item.
    #[error("Partner error map entry for item '{their_id}' has no messages")]
    EmptyMessages { their_id: String },

    /// No entry matched the known grammar; the response is unclassifiable.
    #[error("Partner error map contains no classifiable entries")]
    Unclassifiable,
}

/// Classify a partner item-error map into quantity and price discrepancies.
///
/// Only the first message per item is inspected. Emitted lists preserve the
/// iteration order of the input map.
///
/// # Errors
/// Fails when an item is unknown, has no messages, or when nothing in the map
/// was recognized.
pub fn classify_item_errors(
    errors_items: &IndexMap<String, Vec<String>>,
    order: &Order,
) -> Result<ClassifiedErrors, ClassifyError> {
    let mut classified = ClassifiedErrors::default();

    for (item_id, messages) in errors_items {
        let message = messages.first().ok_or_else(|| ClassifyError::EmptyMessages {
            their_id: item_id.clone(),
        })?;

        // The order is only consulted once the message is recognized;
        // unrecognized entries are skipped without an item lookup.
        if message == "Item not found" {
            let ordered = ordered_item(order, item_id)?;
            classified.quantity.push(QuantityError {
                their_id: item_id.clone(),
                ordered: Some(ordered.count),
                available: Some(0),
            });
        } else if message == "Wrong quantity" {
            // The partner does not say how many are left.
            let ordered = ordered_item(order, item_id)?;
            classified.quantity.push(QuantityError {
                their_id: item_id.clone(),
                ordered: Some(ordered.count),
                available: None,
            });
        } else if message.contains("Wrong price") {
            let ordered = ordered_item(order, item_id)?;
            let available = quoted_price(message, order.order_type);

            if available.is_zero() {
                // Zero price means out of stock for this order type, not
                // free: degrade to a quantity error.
                classified.quantity.push(QuantityError {
                    their_id: item_id.clone(),
                    ordered: Some(ordered.count),
                    available: Some(0),
                });
            } else {
                classified.price.push(PriceError {
                    their_id: item_id.clone(),
                    ordered: Some(ordered.price),
                    available: Some(available),
                });
            }
        } else {
            debug!(item_id = %item_id, message = %message, "Unrecognized partner item error");
        }
    }

    if classified.is_empty() {
        return Err(ClassifyError::Unclassifiable);
    }

    Ok(classified)
}

fn ordered_item<'a>(order: &'a Order, item_id: &str) -> Result<&'a OrderItem, ClassifyError> {
    order
        .items
        .iter()
        .find(|item| item.their_id.as_deref() == Some(item_id))
        .ok_or_else(|| ClassifyError::UnknownItem {
            their_id: item_id.to_string(),
        })
}

/// Extract the price quote applicable to the order type from a
/// `"Wrong price: …"` message.
///
/// Token index 0 is the reservation quote, index 1 the preorder quote. A
/// missing or unparseable token (including `NONE`) collapses to zero.
fn quoted_price(message: &str, order_type: OrderType) -> Decimal {
    let tokens: Vec<&str> = PRICE_TOKENS
        .find_iter(message)
        .map(|m| m.as_str())
        .collect();

    let index = match order_type {
        OrderType::Reservation => 0,
        OrderType::Preorder => 1,
    };

    tokens
        .get(index)
        .and_then(|token| Decimal::from_str(token).ok())
        .unwrap_or(Decimal::ZERO)
}
