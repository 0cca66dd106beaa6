//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AttemptId, OrderId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::pricing::OrderTotals;
use crate::value_objects::{Address, CustomerId};

use super::{OrderLineItem, OrderNumber};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was placed and its stock reserved.
    OrderPlaced(OrderPlacedData),

    /// A verified payment was captured and the reserved stock sold.
    PaymentConfirmed(PaymentConfirmedData),

    /// The reservation was released without a sale.
    OrderCompensated(OrderCompensatedData),

    /// Fulfillment started.
    ProcessingStarted(ProcessingStartedData),

    /// Order was handed to the carrier.
    OrderShipped(OrderShippedData),

    /// Order reached the customer.
    OrderDelivered(OrderDeliveredData),

    /// A paid order was cancelled before fulfillment.
    OrderCancelled(OrderCancelledData),

    /// Money was returned to the customer.
    OrderRefunded(OrderRefundedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::PaymentConfirmed(_) => "PaymentConfirmed",
            OrderEvent::OrderCompensated(_) => "OrderCompensated",
            OrderEvent::ProcessingStarted(_) => "ProcessingStarted",
            OrderEvent::OrderShipped(_) => "OrderShipped",
            OrderEvent::OrderDelivered(_) => "OrderDelivered",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::OrderRefunded(_) => "OrderRefunded",
        }
    }
}

/// Why a reservation was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationReason {
    /// The gateway declined payment and no retries remain.
    PaymentFailed,
    /// The buyer cancelled at the gateway.
    #[serde(rename = "cancelled")]
    PaymentCancelled,
    /// The hold deadline passed without a verified payment.
    Expired,
    /// The buyer cancelled the pending order from the storefront.
    CustomerCancelled,
}

impl CompensationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationReason::PaymentFailed => "payment_failed",
            CompensationReason::PaymentCancelled => "cancelled",
            CompensationReason::Expired => "expired",
            CompensationReason::CustomerCancelled => "customer_cancelled",
        }
    }
}

impl std::fmt::Display for CompensationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Data for OrderPlaced event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLineItem>,
    pub totals: OrderTotals,
    pub discount_code: Option<String>,
    pub currency: String,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub placed_at: DateTime<Utc>,
}

/// Data for PaymentConfirmed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmedData {
    pub attempt_id: AttemptId,
    pub gateway_payment_id: String,
    pub confirmed_at: DateTime<Utc>,
}

/// Data for OrderCompensated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompensatedData {
    pub reason: CompensationReason,
    pub compensated_at: DateTime<Utc>,
}

/// Data for ProcessingStarted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStartedData {
    pub started_at: DateTime<Utc>,
}

/// Data for OrderShipped event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShippedData {
    pub tracking_number: String,
    pub shipped_at: DateTime<Utc>,
}

/// Data for OrderDelivered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeliveredData {
    pub delivered_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Data for OrderRefunded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRefundedData {
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn payment_confirmed(attempt_id: AttemptId, gateway_payment_id: impl Into<String>) -> Self {
        OrderEvent::PaymentConfirmed(PaymentConfirmedData {
            attempt_id,
            gateway_payment_id: gateway_payment_id.into(),
            confirmed_at: Utc::now(),
        })
    }

    pub fn order_compensated(reason: CompensationReason) -> Self {
        OrderEvent::OrderCompensated(OrderCompensatedData {
            reason,
            compensated_at: Utc::now(),
        })
    }

    pub fn processing_started() -> Self {
        OrderEvent::ProcessingStarted(ProcessingStartedData {
            started_at: Utc::now(),
        })
    }

    pub fn order_shipped(tracking_number: impl Into<String>) -> Self {
        OrderEvent::OrderShipped(OrderShippedData {
            tracking_number: tracking_number.into(),
            shipped_at: Utc::now(),
        })
    }

    pub fn order_delivered() -> Self {
        OrderEvent::OrderDelivered(OrderDeliveredData {
            delivered_at: Utc::now(),
        })
    }

    pub fn order_cancelled(reason: impl Into<String>) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }

    pub fn order_refunded(reason: impl Into<String>) -> Self {
        OrderEvent::OrderRefunded(OrderRefundedData {
            reason: reason.into(),
            refunded_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(
            OrderEvent::order_compensated(CompensationReason::Expired).event_type(),
            "OrderCompensated"
        );
        assert_eq!(OrderEvent::order_shipped("TRK-1").event_type(), "OrderShipped");
        assert_eq!(OrderEvent::order_refunded("damaged").event_type(), "OrderRefunded");
    }

    #[test]
    fn test_compensation_reason_wire_codes() {
        assert_eq!(CompensationReason::PaymentFailed.as_str(), "payment_failed");
        assert_eq!(CompensationReason::PaymentCancelled.as_str(), "cancelled");
        assert_eq!(CompensationReason::Expired.as_str(), "expired");

        let json = serde_json::to_string(&CompensationReason::PaymentCancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = OrderEvent::order_compensated(CompensationReason::PaymentFailed);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OrderCompensated");
        assert_eq!(json["data"]["reason"], "payment_failed");

        let back: OrderEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
