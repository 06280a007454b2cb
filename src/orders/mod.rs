//! Order lifecycle core: domain types, the partner error classifier, and the
//! gateway that drives create / get-status / cancel against the partner API.

pub mod classify;
pub mod gateway;
pub mod types;

pub use classify::{classify_item_errors, ClassifyError};
pub use gateway::{GatewayError, PartnerGateway};
pub use types::{
    CancelOutcome, ClassifiedErrors, CreateOutcome, Order, OrderItem, OrderStatus, OrderType,
    PriceError, QuantityError, StatusSnapshot,
};
