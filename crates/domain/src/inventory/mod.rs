//! Inventory records and the three ledger operations that mutate them.

mod record;

pub use record::{InventoryRecord, LedgerOp, StockShortage};

use thiserror::Error;

use crate::value_objects::StockKey;

/// Errors raised by inventory ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Not enough unreserved stock to satisfy a reservation.
    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: StockKey,
        requested: u32,
        available: u32,
    },

    /// Quantity must be greater than zero.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// No inventory row exists for the key.
    #[error("Unknown stock key: {0}")]
    UnknownKey(StockKey),
}
