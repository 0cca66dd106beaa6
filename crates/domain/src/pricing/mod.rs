//! Order Total Calculator.
//!
//! Pure functions turning priced lines plus an optional discount code into
//! subtotal, discount, tax, shipping and total. The same function backs the
//! client-facing preview and the authoritative server-side computation at
//! order creation.

mod calculator;
mod discount;

pub use calculator::{
    DiscountInput, DiscountOutcome, OrderTotals, PriceLine, PricingPolicy, Quote, calculate,
};
pub use discount::{DiscountCode, DiscountKind, DiscountRejection};

use thiserror::Error;

use crate::value_objects::StockKey;

/// Errors that make a line list impossible to price.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// No lines to price.
    #[error("Cart is empty")]
    EmptyCart,

    /// A line has a zero quantity.
    #[error("Invalid quantity for {key}: must be greater than 0")]
    InvalidQuantity { key: StockKey },

    /// A line has a non-positive unit price.
    #[error("Invalid unit price for {key}: {price}")]
    InvalidPrice { key: StockKey, price: i64 },

    /// A line total or the cart total does not fit in a money amount.
    #[error("Amount too large for {key}")]
    AmountOverflow { key: StockKey },
}
