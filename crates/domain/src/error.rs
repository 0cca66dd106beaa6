//! Domain error types.

use thiserror::Error;

use crate::inventory::InventoryError;
use crate::order::OrderError;
use crate::payment::PaymentError;
use crate::pricing::PricingError;

/// Any error raised by the domain layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),
}
