use domain::{StockKey, StockShortage};
use thiserror::Error;

use crate::{AttemptId, OrderId, Version};

/// Errors that can occur when interacting with the checkout store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order changed since it was loaded.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// The payment attempt was settled by someone else since it was loaded.
    #[error("Payment attempt {0} was modified concurrently")]
    AttemptConflict(AttemptId),

    /// One or more lines could not be reserved. Nothing was written.
    #[error("Insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<StockShortage>),

    /// No inventory row exists for the key.
    #[error("Unknown stock key: {0}")]
    UnknownStockKey(StockKey),

    /// An order with this ID or number already exists.
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Persisted data violates a schema invariant, e.g. an unknown status value.
    #[error("Data integrity violation: {0}")]
    Integrity(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
