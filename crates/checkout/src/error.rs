//! Checkout error types.

use common::OrderId;
use domain::{DomainError, Money, OrderError, PricingError, StockShortage};
use store::StoreError;
use thiserror::Error;

use crate::verifier::RejectionReason;

/// Errors surfaced by checkout operations.
///
/// Every variant except [`CheckoutError::Store`] and [`CheckoutError::Domain`]
/// is raised before any write, or after a write was refused, so callers can
/// rely on state being unchanged when they see one.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Bad input: empty cart, unknown product, missing address field.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller's expected total disagrees with the server-side computation.
    #[error("Total mismatch: expected {expected}, computed {computed}")]
    TotalMismatch { expected: Money, computed: Money },

    /// One or more lines could not be reserved.
    #[error("Insufficient stock for {} line(s)", .0.len())]
    InsufficientStock(Vec<StockShortage>),

    /// The payment gateway could not be reached in time.
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// A gateway result failed authentication.
    #[error("Payment verification failed: {0}")]
    VerificationFailed(RejectionReason),

    /// The gateway declined the payment.
    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    /// The buyer cancelled at the gateway.
    #[error("Payment cancelled")]
    PaymentCancelled,

    /// The reservation hold elapsed before payment.
    #[error("Reservation expired for order {0}")]
    ReservationExpired(OrderId),

    /// No more payment attempts are allowed for the order.
    #[error("Payment attempts exhausted for order {order_id} (max {max})")]
    AttemptsExhausted { order_id: OrderId, max: u32 },

    /// The operation raced with, or contradicts, an earlier transition.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Payment attempt not found: {0}")]
    AttemptNotFound(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock(shortages) => CheckoutError::InsufficientStock(shortages),
            StoreError::OrderNotFound(order_id) => CheckoutError::OrderNotFound(order_id.to_string()),
            StoreError::ConcurrencyConflict { .. } | StoreError::AttemptConflict(_) => {
                CheckoutError::ConsistencyViolation(err.to_string())
            }
            other => CheckoutError::Store(other),
        }
    }
}

impl From<OrderError> for CheckoutError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidStateTransition { .. } | OrderError::AlreadyPaid { .. } => {
                CheckoutError::ConsistencyViolation(err.to_string())
            }
            OrderError::InvalidQuantity { .. }
            | OrderError::NoLines
            | OrderError::MissingTrackingNumber => CheckoutError::Validation(err.to_string()),
            OrderError::AlreadyPlaced | OrderError::NotPlaced => {
                CheckoutError::Domain(DomainError::Order(err))
            }
        }
    }
}

impl From<PricingError> for CheckoutError {
    fn from(err: PricingError) -> Self {
        CheckoutError::Validation(err.to_string())
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use domain::{OrderStatus, StockKey};

    use super::*;

    #[test]
    fn store_shortages_keep_their_lines() {
        let err: CheckoutError = StoreError::InsufficientStock(vec![StockShortage {
            key: StockKey::product("MUG"),
            requested: 2,
            available: 1,
        }])
        .into();
        match err {
            CheckoutError::InsufficientStock(lines) => assert_eq!(lines[0].available, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn version_conflicts_are_consistency_violations() {
        let err: CheckoutError = StoreError::ConcurrencyConflict {
            order_id: OrderId::new(),
            expected: common::Version::first(),
            actual: common::Version::new(2),
        }
        .into();
        assert!(matches!(err, CheckoutError::ConsistencyViolation(_)));
    }

    #[test]
    fn invalid_transition_is_a_consistency_violation() {
        let err: CheckoutError = OrderError::InvalidStateTransition {
            current_status: OrderStatus::Cancelled,
            action: "commit",
        }
        .into();
        assert!(matches!(err, CheckoutError::ConsistencyViolation(_)));

        let err: CheckoutError = OrderError::MissingTrackingNumber.into();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }
}
