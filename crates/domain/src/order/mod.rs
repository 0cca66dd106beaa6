//! Order aggregate and related types.

mod aggregate;
mod events;
mod line_item;
mod state;

pub use aggregate::{Order, PlaceOrder, StockSettlement};
pub use events::{
    CompensationReason, OrderCancelledData, OrderCompensatedData, OrderDeliveredData, OrderEvent,
    OrderPlacedData, OrderRefundedData, OrderShippedData, PaymentConfirmedData,
    ProcessingStartedData,
};
pub use line_item::{OrderLineItem, OrderNumber};
pub use state::{OrderStatus, PaymentStatus};

use common::AttemptId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Order is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {current_status} state")]
    InvalidStateTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    /// A different payment attempt already paid for the order.
    #[error("Order already paid by attempt {attempt_id}")]
    AlreadyPaid { attempt_id: AttemptId },

    /// Invalid line quantity.
    #[error("Invalid quantity for {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: String },

    /// Order has no lines.
    #[error("Order has no lines")]
    NoLines,

    /// Shipping requires a tracking number.
    #[error("Tracking number is required")]
    MissingTrackingNumber,

    /// Order has already been placed.
    #[error("Order already placed")]
    AlreadyPlaced,

    /// Command issued against an order with no history.
    #[error("Order has not been placed")]
    NotPlaced,
}
