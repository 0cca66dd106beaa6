//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AttemptId, OrderId, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::inventory::LedgerOp;
use crate::pricing::OrderTotals;
use crate::value_objects::{Address, CustomerId, Money};

use super::{
    CompensationReason, OrderError, OrderEvent, OrderLineItem, OrderNumber, OrderStatus,
    PaymentStatus,
    events::{OrderPlacedData, PaymentConfirmedData},
};

/// How an order's reservation was settled.
///
/// Set exactly once; a settled order never issues another confirm or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockSettlement {
    /// The held units were sold.
    Confirmed,
    /// The held units went back to available stock.
    Released,
}

/// Everything needed to place an order, computed by the lifecycle manager.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLineItem>,
    pub totals: OrderTotals,
    pub discount_code: Option<String>,
    pub currency: String,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub placed_at: DateTime<Utc>,
}

/// Order aggregate root.
///
/// Holds the order's line snapshots, totals and both status machines. The
/// stock reservation itself lives in the inventory ledger; this aggregate
/// tracks whether it has been settled so that confirm and release are each
/// issued at most once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<OrderId>,

    #[serde(default)]
    version: Version,

    number: Option<OrderNumber>,
    customer_id: Option<CustomerId>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    lines: Vec<OrderLineItem>,
    totals: OrderTotals,
    discount_code: Option<String>,
    currency: String,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    stock_settled: Option<StockSettlement>,
    paid_attempt: Option<AttemptId>,
    tracking_number: Option<String>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Id = OrderId;
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<OrderId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => self.apply_order_placed(data),
            OrderEvent::PaymentConfirmed(data) => self.apply_payment_confirmed(data),
            OrderEvent::OrderCompensated(data) => {
                self.status = OrderStatus::Cancelled;
                self.payment_status = PaymentStatus::Failed;
                self.stock_settled = Some(StockSettlement::Released);
                self.cancellation_reason = Some(data.reason.as_str().to_string());
                self.updated_at = Some(data.compensated_at);
            }
            OrderEvent::ProcessingStarted(data) => {
                self.status = OrderStatus::Processing;
                self.updated_at = Some(data.started_at);
            }
            OrderEvent::OrderShipped(data) => {
                self.status = OrderStatus::Shipped;
                self.tracking_number = Some(data.tracking_number);
                self.shipped_at = Some(data.shipped_at);
                self.updated_at = Some(data.shipped_at);
            }
            OrderEvent::OrderDelivered(data) => {
                self.status = OrderStatus::Delivered;
                self.delivered_at = Some(data.delivered_at);
                self.updated_at = Some(data.delivered_at);
            }
            OrderEvent::OrderCancelled(data) => {
                self.status = OrderStatus::Cancelled;
                self.payment_status = PaymentStatus::Refunded;
                self.cancellation_reason = Some(data.reason);
                self.updated_at = Some(data.cancelled_at);
            }
            OrderEvent::OrderRefunded(data) => {
                self.status = OrderStatus::Refunded;
                self.payment_status = PaymentStatus::Refunded;
                self.updated_at = Some(data.refunded_at);
            }
        }
    }
}

// Query methods
impl Order {
    pub fn number(&self) -> Option<&OrderNumber> {
        self.number.as_ref()
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn lines(&self) -> &[OrderLineItem] {
        &self.lines
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    /// Returns the amount to charge.
    pub fn total(&self) -> Money {
        self.totals.total
    }

    pub fn discount_code(&self) -> Option<&str> {
        self.discount_code.as_deref()
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    pub fn billing_address(&self) -> Option<&Address> {
        self.billing_address.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn stock_settled(&self) -> Option<StockSettlement> {
        self.stock_settled
    }

    /// Returns the payment attempt that paid for this order, if any.
    pub fn paid_attempt(&self) -> Option<AttemptId> {
        self.paid_attempt
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    /// Total units across all lines.
    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the reservation was placed at or before `cutoff` and
    /// is still waiting for payment.
    pub fn is_hold_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.awaits_payment() && self.created_at.is_some_and(|at| at <= cutoff)
    }

    /// Returns the inventory ledger operations an event implies for this order.
    ///
    /// Placing reserves every line, payment confirms every line and
    /// compensation releases every line. Other events leave stock untouched.
    pub fn ledger_ops(&self, event: &OrderEvent) -> Vec<LedgerOp> {
        match event {
            OrderEvent::OrderPlaced(data) => data
                .lines
                .iter()
                .map(|line| LedgerOp::Reserve {
                    key: line.key(),
                    quantity: line.quantity,
                })
                .collect(),
            OrderEvent::PaymentConfirmed(_) => self
                .lines
                .iter()
                .map(|line| LedgerOp::Confirm {
                    key: line.key(),
                    quantity: line.quantity,
                })
                .collect(),
            OrderEvent::OrderCompensated(_) => self
                .lines
                .iter()
                .map(|line| LedgerOp::Release {
                    key: line.key(),
                    quantity: line.quantity,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

// Command methods (return events)
impl Order {
    /// Places a new order. Totals must already be computed.
    pub fn place(&self, cmd: PlaceOrder) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }
        if cmd.lines.is_empty() {
            return Err(OrderError::NoLines);
        }
        if let Some(line) = cmd.lines.iter().find(|line| line.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id.to_string(),
            });
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlacedData {
            order_id: cmd.order_id,
            order_number: OrderNumber::generate(cmd.order_id, cmd.placed_at),
            customer_id: cmd.customer_id,
            lines: cmd.lines,
            totals: cmd.totals,
            discount_code: cmd.discount_code,
            currency: cmd.currency,
            shipping_address: cmd.shipping_address,
            billing_address: cmd.billing_address,
            placed_at: cmd.placed_at,
        })])
    }

    /// Records a verified payment, converting the reservation into a sale.
    ///
    /// Repeating the commit for the attempt that already paid is a no-op.
    pub fn commit(
        &self,
        attempt_id: AttemptId,
        gateway_payment_id: &str,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if let Some(paid) = self.paid_attempt {
            if paid == attempt_id {
                return Ok(vec![]);
            }
            return Err(OrderError::AlreadyPaid { attempt_id: paid });
        }
        if !self.status.awaits_payment() || self.stock_settled.is_some() {
            return Err(self.invalid("commit"));
        }

        Ok(vec![OrderEvent::payment_confirmed(
            attempt_id,
            gateway_payment_id,
        )])
    }

    /// Releases the reservation without a sale.
    ///
    /// Repeating a compensation on an already-released order is a no-op.
    pub fn compensate(&self, reason: CompensationReason) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;

        if self.stock_settled == Some(StockSettlement::Released) {
            return Ok(vec![]);
        }
        if !self.status.awaits_payment() || self.stock_settled.is_some() {
            return Err(self.invalid("compensate"));
        }

        Ok(vec![OrderEvent::order_compensated(reason)])
    }

    pub fn start_processing(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if !self.status.can_start_processing() {
            return Err(self.invalid("start processing"));
        }
        Ok(vec![OrderEvent::processing_started()])
    }

    pub fn ship(&self, tracking_number: &str) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if !self.status.can_ship() {
            return Err(self.invalid("ship"));
        }
        if tracking_number.trim().is_empty() {
            return Err(OrderError::MissingTrackingNumber);
        }
        Ok(vec![OrderEvent::order_shipped(tracking_number.trim())])
    }

    pub fn deliver(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if !self.status.can_deliver() {
            return Err(self.invalid("deliver"));
        }
        Ok(vec![OrderEvent::order_delivered()])
    }

    /// Cancels a paid order before fulfillment. Payment is marked refunded.
    ///
    /// Pending orders are cancelled through [`Order::compensate`] instead, so
    /// their reservation is released.
    pub fn cancel(&self, reason: impl Into<String>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if self.status != OrderStatus::Confirmed {
            return Err(self.invalid("cancel"));
        }
        Ok(vec![OrderEvent::order_cancelled(reason)])
    }

    pub fn refund(&self, reason: impl Into<String>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_placed()?;
        if !self.status.can_refund() {
            return Err(self.invalid("refund"));
        }
        Ok(vec![OrderEvent::order_refunded(reason)])
    }

    fn ensure_placed(&self) -> Result<(), OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotPlaced);
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> OrderError {
        OrderError::InvalidStateTransition {
            current_status: self.status,
            action,
        }
    }
}

// Apply event helpers
impl Order {
    fn apply_order_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.number = Some(data.order_number);
        self.customer_id = Some(data.customer_id);
        self.status = OrderStatus::Pending;
        self.payment_status = PaymentStatus::Pending;
        self.lines = data.lines;
        self.totals = data.totals;
        self.discount_code = data.discount_code;
        self.currency = data.currency;
        self.shipping_address = Some(data.shipping_address);
        self.billing_address = Some(data.billing_address);
        self.created_at = Some(data.placed_at);
        self.updated_at = Some(data.placed_at);
    }

    fn apply_payment_confirmed(&mut self, data: PaymentConfirmedData) {
        self.status = OrderStatus::Confirmed;
        self.payment_status = PaymentStatus::Paid;
        self.stock_settled = Some(StockSettlement::Confirmed);
        self.paid_attempt = Some(data.attempt_id);
        self.updated_at = Some(data.confirmed_at);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::aggregate::DomainEvent;
    use crate::value_objects::StockKey;

    fn address() -> Address {
        Address {
            full_name: "Asha Rao".to_string(),
            line1: "12 MG Road".to_string(),
            line2: None,
            city: "Bengaluru".to_string(),
            state: "KA".to_string(),
            postal_code: "560001".to_string(),
            country: "IN".to_string(),
            phone: Some("+919800000000".to_string()),
        }
    }

    fn place_cmd(lines: Vec<OrderLineItem>) -> PlaceOrder {
        let subtotal: Money = lines.iter().map(|line| line.line_total).sum();
        PlaceOrder {
            order_id: OrderId::new(),
            customer_id: CustomerId::new(),
            lines,
            totals: OrderTotals {
                subtotal,
                total: subtotal,
                ..OrderTotals::default()
            },
            discount_code: None,
            currency: "INR".to_string(),
            shipping_address: address(),
            billing_address: address(),
            placed_at: Utc::now(),
        }
    }

    fn tee(qty: u32) -> OrderLineItem {
        OrderLineItem::new(
            StockKey::variant("TEE", "M-RED"),
            "Tee",
            None,
            qty,
            Money::from_minor(50_000),
        )
    }

    fn placed_order() -> Order {
        let mut order = Order::default();
        let events = order.place(place_cmd(vec![tee(2)])).unwrap();
        order.apply_events(events);
        order
    }

    fn confirmed_order() -> (Order, AttemptId) {
        let mut order = placed_order();
        let attempt = AttemptId::new();
        order.apply_events(order.commit(attempt, "pay_1").unwrap());
        (order, attempt)
    }

    #[test]
    fn test_place_order() {
        let order = placed_order();
        assert!(order.id().is_some());
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.total().minor(), 100_000);
        assert_eq!(order.total_quantity(), 2);
        assert!(order.number().unwrap().as_str().starts_with("ORD-"));
        assert!(order.stock_settled().is_none());
    }

    #[test]
    fn test_place_twice_fails() {
        let order = placed_order();
        let result = order.place(place_cmd(vec![tee(1)]));
        assert!(matches!(result, Err(OrderError::AlreadyPlaced)));
    }

    #[test]
    fn test_place_without_lines_fails() {
        let result = Order::default().place(place_cmd(vec![]));
        assert!(matches!(result, Err(OrderError::NoLines)));
    }

    #[test]
    fn test_commit_confirms_and_marks_paid() {
        let (order, attempt) = confirmed_order();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
        assert_eq!(order.stock_settled(), Some(StockSettlement::Confirmed));
        assert_eq!(order.paid_attempt(), Some(attempt));
    }

    #[test]
    fn test_repeated_commit_is_noop() {
        let (order, attempt) = confirmed_order();
        assert!(order.commit(attempt, "pay_1").unwrap().is_empty());
    }

    #[test]
    fn test_commit_with_other_attempt_is_rejected() {
        let (order, attempt) = confirmed_order();
        let result = order.commit(AttemptId::new(), "pay_2");
        assert!(matches!(
            result,
            Err(OrderError::AlreadyPaid { attempt_id }) if attempt_id == attempt
        ));
    }

    #[test]
    fn test_compensate_releases_and_cancels() {
        let mut order = placed_order();
        order.apply_events(order.compensate(CompensationReason::PaymentCancelled).unwrap());

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        assert_eq!(order.stock_settled(), Some(StockSettlement::Released));
        assert_eq!(order.cancellation_reason(), Some("cancelled"));

        assert!(order
            .compensate(CompensationReason::Expired)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_commit_and_compensate_are_mutually_exclusive() {
        let (confirmed, _) = confirmed_order();
        assert!(matches!(
            confirmed.compensate(CompensationReason::PaymentFailed),
            Err(OrderError::InvalidStateTransition { .. })
        ));

        let mut cancelled = placed_order();
        cancelled.apply_events(cancelled.compensate(CompensationReason::Expired).unwrap());
        assert!(matches!(
            cancelled.commit(AttemptId::new(), "pay_late"),
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_ledger_ops_follow_events() {
        let order = placed_order();

        let confirm = order.commit(AttemptId::new(), "pay_1").unwrap();
        let ops = order.ledger_ops(&confirm[0]);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].as_str(), "confirm");
        assert_eq!(ops[0].quantity(), 2);

        let release = order.compensate(CompensationReason::Expired).unwrap();
        assert_eq!(order.ledger_ops(&release[0])[0].as_str(), "release");

        assert!(order.ledger_ops(&OrderEvent::processing_started()).is_empty());
    }

    #[test]
    fn test_full_fulfillment_lifecycle() {
        let (mut order, _) = confirmed_order();

        order.apply_events(order.start_processing().unwrap());
        assert_eq!(order.status(), OrderStatus::Processing);

        order.apply_events(order.ship("TRK-42").unwrap());
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert_eq!(order.tracking_number(), Some("TRK-42"));
        assert!(order.shipped_at().is_some());

        order.apply_events(order.deliver().unwrap());
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(order.is_terminal());

        order.apply_events(order.refund("damaged in transit").unwrap());
        assert_eq!(order.status(), OrderStatus::Refunded);
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
    }

    #[test]
    fn test_ship_requires_tracking_number() {
        let (mut order, _) = confirmed_order();
        order.apply_events(order.start_processing().unwrap());
        assert!(matches!(
            order.ship("  "),
            Err(OrderError::MissingTrackingNumber)
        ));
    }

    #[test]
    fn test_cancel_confirmed_order_refunds_payment() {
        let (mut order, _) = confirmed_order();
        order.apply_events(order.cancel("changed mind").unwrap());

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert_eq!(order.stock_settled(), Some(StockSettlement::Confirmed));
    }

    #[test]
    fn test_cannot_refund_pending_or_processing() {
        let order = placed_order();
        assert!(order.refund("x").is_err());

        let (mut order, _) = confirmed_order();
        order.apply_events(order.start_processing().unwrap());
        assert!(matches!(
            order.refund("x"),
            Err(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_commands_on_unplaced_order_fail() {
        let order = Order::default();
        assert!(matches!(
            order.commit(AttemptId::new(), "pay"),
            Err(OrderError::NotPlaced)
        ));
        assert!(matches!(
            order.compensate(CompensationReason::Expired),
            Err(OrderError::NotPlaced)
        ));
    }

    #[test]
    fn test_hold_expiry() {
        let order = placed_order();
        let created = order.created_at().unwrap();
        assert!(!order.is_hold_expired(created - Duration::seconds(1)));
        assert!(order.is_hold_expired(created));

        let (confirmed, _) = confirmed_order();
        assert!(!confirmed.is_hold_expired(Utc::now() + Duration::days(1)));
    }

    #[test]
    fn test_replay_rebuilds_state_and_version() {
        let mut order = Order::default();
        let mut history = order.place(place_cmd(vec![tee(1)])).unwrap();
        order.apply_events(history.clone());
        let confirm = order.commit(AttemptId::new(), "pay_9").unwrap();
        history.extend(confirm);

        let rebuilt = Order::replay(history.clone()).unwrap();
        assert_eq!(rebuilt.status(), OrderStatus::Confirmed);
        assert_eq!(rebuilt.version(), Version::new(2));
        assert_eq!(history[1].event_type(), "PaymentConfirmed");
    }

    #[test]
    fn test_serialization() {
        let order = placed_order();
        let json = serde_json::to_string(&order).unwrap();
        let back: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), order.id());
        assert_eq!(back.lines(), order.lines());
    }
}
