use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Aggregate, InventoryRecord, LedgerOp, Order, OrderEvent, OrderNumber, PaymentAttempt,
    PaymentStatus, StockKey,
};

use crate::{AttemptId, EventEnvelope, OrderId, Result, Version};

/// A payment attempt write guarded by the status it is expected to have.
#[derive(Debug, Clone)]
pub struct AttemptUpdate {
    pub attempt: PaymentAttempt,
    /// Status the stored attempt must still have for the write to apply.
    pub expected_status: PaymentStatus,
}

impl AttemptUpdate {
    pub fn new(attempt: PaymentAttempt, expected_status: PaymentStatus) -> Self {
        Self {
            attempt,
            expected_status,
        }
    }
}

/// One persisted step of an order's lifecycle.
///
/// Carries the order state after the step, the events that produced it, the
/// inventory operations those events imply and, optionally, the payment
/// attempt that settled alongside it.
#[derive(Debug, Clone)]
pub struct Transition {
    pub order: Order,
    pub expected_version: Version,
    pub events: Vec<OrderEvent>,
    pub ledger_ops: Vec<LedgerOp>,
    pub attempt: Option<AttemptUpdate>,
}

impl Transition {
    /// Builds the transition produced by applying `events` to `current`.
    pub fn new(current: &Order, events: Vec<OrderEvent>) -> Self {
        let ledger_ops = events
            .iter()
            .flat_map(|event| current.ledger_ops(event))
            .collect();

        let expected_version = current.version();
        let mut order = current.clone();
        order.apply_events(events.clone());
        order.set_version(Version::new(
            expected_version.as_i64() + events.len() as i64,
        ));

        Self {
            order,
            expected_version,
            events,
            ledger_ops,
            attempt: None,
        }
    }

    pub fn with_attempt(mut self, update: AttemptUpdate) -> Self {
        self.attempt = Some(update);
        self
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order.id()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Core trait for checkout store implementations.
///
/// All implementations must be thread-safe (Send + Sync), and every method
/// must be atomic with respect to concurrent callers.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Holds `qty` units if at least that many are available.
    ///
    /// Returns false, without mutating anything, on insufficient stock.
    async fn reserve(&self, key: &StockKey, qty: u32) -> Result<bool>;

    /// Drops a hold of `qty` units, clamped at zero.
    async fn release(&self, key: &StockKey, qty: u32) -> Result<()>;

    /// Converts a hold of `qty` units into a sale.
    async fn confirm(&self, key: &StockKey, qty: u32) -> Result<()>;

    async fn inventory(&self, key: &StockKey) -> Result<Option<InventoryRecord>>;

    /// Creates or replaces an inventory row. Catalog-side seeding only.
    async fn upsert_inventory(&self, record: InventoryRecord) -> Result<()>;

    /// Persists a newly placed order and reserves every line, or nothing.
    ///
    /// `transition` must hold the order's placement events. On any shortage
    /// no row is written and [`StoreError::InsufficientStock`] lists every
    /// line that could not be held.
    ///
    /// [`StoreError::InsufficientStock`]: crate::StoreError::InsufficientStock
    async fn create_order(&self, transition: Transition) -> Result<Version>;

    async fn load_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn find_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>>;

    /// Persists a lifecycle step if the order is still at `expected_version`.
    ///
    /// Order state, events, ledger operations and the attempt update are
    /// written together or not at all.
    async fn save_transition(&self, transition: Transition) -> Result<Version>;

    /// Returns the order's audit trail, oldest first.
    async fn order_events(&self, order_id: OrderId) -> Result<Vec<EventEnvelope>>;

    /// Returns pending orders placed at or before `cutoff`, oldest first.
    async fn pending_orders_placed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderId>>;

    async fn insert_attempt(&self, attempt: &PaymentAttempt) -> Result<()>;

    /// Writes a settled attempt that has no order-level effect.
    async fn settle_attempt(&self, update: AttemptUpdate) -> Result<()>;

    async fn load_attempt(&self, attempt_id: AttemptId) -> Result<Option<PaymentAttempt>>;

    async fn find_attempt_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentAttempt>>;

    /// Returns the order's attempts ordered by attempt number.
    async fn attempts_for_order(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>>;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use domain::{
        Address, CompensationReason, CustomerId, Money, OrderLineItem, OrderStatus, OrderTotals,
        PlaceOrder,
    };

    use super::*;

    fn address() -> Address {
        Address {
            full_name: "Meera Iyer".to_string(),
            line1: "9 Beach Road".to_string(),
            line2: None,
            city: "Chennai".to_string(),
            state: "TN".to_string(),
            postal_code: "600001".to_string(),
            country: "IN".to_string(),
            phone: None,
        }
    }

    fn placed() -> Transition {
        let order = Order::default();
        let events = order
            .place(PlaceOrder {
                order_id: OrderId::new(),
                customer_id: CustomerId::new(),
                lines: vec![OrderLineItem::new(
                    StockKey::product("MUG"),
                    "Mug",
                    None,
                    3,
                    Money::from_minor(10_000),
                )],
                totals: OrderTotals::default(),
                discount_code: None,
                currency: "INR".to_string(),
                shipping_address: address(),
                billing_address: address(),
                placed_at: Utc::now(),
            })
            .unwrap();
        Transition::new(&order, events)
    }

    #[test]
    fn placement_transition_reserves_lines_at_version_one() {
        let transition = placed();
        assert_eq!(transition.expected_version, Version::initial());
        assert_eq!(transition.order.version(), Version::first());
        assert_eq!(transition.order.status(), OrderStatus::Pending);
        assert_eq!(transition.ledger_ops.len(), 1);
        assert_eq!(transition.ledger_ops[0].as_str(), "reserve");
        assert_eq!(transition.ledger_ops[0].quantity(), 3);
    }

    #[test]
    fn compensation_transition_releases_lines() {
        let order = placed().order;
        let events = order.compensate(CompensationReason::Expired).unwrap();
        let transition = Transition::new(&order, events);

        assert_eq!(transition.expected_version, Version::first());
        assert_eq!(transition.order.version(), Version::new(2));
        assert_eq!(transition.order.status(), OrderStatus::Cancelled);
        assert_eq!(transition.ledger_ops[0].as_str(), "release");
    }

    #[test]
    fn empty_transition_is_detected() {
        let order = placed().order;
        let transition = Transition::new(&order, vec![]);
        assert!(transition.is_empty());
        assert_eq!(transition.order.version(), order.version());
    }
}
