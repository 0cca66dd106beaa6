//! Checkout behaviour when store writes fail or interleave.
//!
//! [`FaultyStore`] wraps the in-memory store and can break every write for
//! chosen orders, or land a competing attempt decline just before the next
//! attempt write.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use checkout::{
    CallbackOutcome, CallbackProcessor, CartLine, CatalogItem, CheckoutConfig, Clock, Contact,
    CreateOrderRequest, FixedClock, GatewayCallback, InMemoryCatalog, InMemoryPaymentGateway,
    OrderLifecycle, PaymentHandoff, PaymentVerifier, QuoteRequest, Reconciler,
};
use domain::{
    Address, Aggregate, CustomerId, InventoryRecord, Money, Order, OrderNumber, OrderStatus, PaymentAttempt,
    PaymentStatus, StockKey,
};
use store::{
    AttemptId, AttemptUpdate, CheckoutStore, EventEnvelope, InMemoryCheckoutStore, OrderId,
    StoreError, Transition, Version,
};
use tokio::sync::watch;

#[derive(Default)]
struct Faults {
    broken_orders: Mutex<HashSet<OrderId>>,
    concurrent_decline: Mutex<Option<AttemptUpdate>>,
}

#[derive(Clone, Default)]
struct FaultyStore {
    inner: InMemoryCheckoutStore,
    faults: Arc<Faults>,
}

impl FaultyStore {
    fn break_order(&self, order_id: OrderId) {
        self.faults.broken_orders.lock().unwrap().insert(order_id);
    }

    fn repair_order(&self, order_id: OrderId) {
        self.faults.broken_orders.lock().unwrap().remove(&order_id);
    }

    /// Settles `update` right before the next attempt write goes through.
    fn decline_concurrently(&self, update: AttemptUpdate) {
        *self.faults.concurrent_decline.lock().unwrap() = Some(update);
    }
}

#[async_trait]
impl CheckoutStore for FaultyStore {
    async fn reserve(&self, key: &StockKey, qty: u32) -> store::Result<bool> {
        self.inner.reserve(key, qty).await
    }

    async fn release(&self, key: &StockKey, qty: u32) -> store::Result<()> {
        self.inner.release(key, qty).await
    }

    async fn confirm(&self, key: &StockKey, qty: u32) -> store::Result<()> {
        self.inner.confirm(key, qty).await
    }

    async fn inventory(&self, key: &StockKey) -> store::Result<Option<InventoryRecord>> {
        self.inner.inventory(key).await
    }

    async fn upsert_inventory(&self, record: InventoryRecord) -> store::Result<()> {
        self.inner.upsert_inventory(record).await
    }

    async fn create_order(&self, transition: Transition) -> store::Result<Version> {
        self.inner.create_order(transition).await
    }

    async fn load_order(&self, order_id: OrderId) -> store::Result<Option<Order>> {
        self.inner.load_order(order_id).await
    }

    async fn find_order_by_number(&self, number: &OrderNumber) -> store::Result<Option<Order>> {
        self.inner.find_order_by_number(number).await
    }

    async fn save_transition(&self, transition: Transition) -> store::Result<Version> {
        let broken = transition
            .order_id()
            .is_some_and(|id| self.faults.broken_orders.lock().unwrap().contains(&id));
        if broken {
            return Err(StoreError::Integrity("order row is damaged".to_string()));
        }
        self.inner.save_transition(transition).await
    }

    async fn order_events(&self, order_id: OrderId) -> store::Result<Vec<EventEnvelope>> {
        self.inner.order_events(order_id).await
    }

    async fn pending_orders_placed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> store::Result<Vec<OrderId>> {
        self.inner.pending_orders_placed_before(cutoff).await
    }

    async fn insert_attempt(&self, attempt: &PaymentAttempt) -> store::Result<()> {
        self.inner.insert_attempt(attempt).await
    }

    async fn settle_attempt(&self, update: AttemptUpdate) -> store::Result<()> {
        let racing = self.faults.concurrent_decline.lock().unwrap().take();
        if let Some(racing) = racing {
            self.inner.settle_attempt(racing).await?;
        }
        self.inner.settle_attempt(update).await
    }

    async fn load_attempt(&self, attempt_id: AttemptId) -> store::Result<Option<PaymentAttempt>> {
        self.inner.load_attempt(attempt_id).await
    }

    async fn find_attempt_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> store::Result<Option<PaymentAttempt>> {
        self.inner
            .find_attempt_by_gateway_order_id(gateway_order_id)
            .await
    }

    async fn attempts_for_order(&self, order_id: OrderId) -> store::Result<Vec<PaymentAttempt>> {
        self.inner.attempts_for_order(order_id).await
    }
}

struct Rig {
    store: FaultyStore,
    clock: FixedClock,
    gateway: InMemoryPaymentGateway,
    lifecycle: Arc<OrderLifecycle<FaultyStore>>,
    handoff: PaymentHandoff<FaultyStore>,
    callbacks: CallbackProcessor<FaultyStore>,
}

impl Rig {
    async fn new(max_payment_attempts: u32) -> Self {
        let store = FaultyStore::default();
        let catalog = InMemoryCatalog::new();
        let clock = FixedClock::new(Utc::now());
        let verifier = PaymentVerifier::new("gateway_secret").unwrap();
        let gateway = InMemoryPaymentGateway::new(verifier.clone());

        catalog.add_item(CatalogItem::new(
            StockKey::product("MUG"),
            "Stoneware Mug",
            Money::from_minor(30_000),
        ));
        store
            .upsert_inventory(InventoryRecord::new(StockKey::product("MUG"), 10, 1))
            .await
            .unwrap();

        let config = CheckoutConfig {
            max_payment_attempts,
            ..CheckoutConfig::default()
        };
        let lifecycle = Arc::new(OrderLifecycle::new(
            store.clone(),
            Arc::new(catalog),
            Arc::new(clock.clone()),
            config,
        ));

        Self {
            handoff: PaymentHandoff::new(lifecycle.clone(), Arc::new(gateway.clone())),
            callbacks: CallbackProcessor::new(lifecycle.clone(), verifier),
            store,
            clock,
            gateway,
            lifecycle,
        }
    }

    async fn order_mugs(&self, qty: u32) -> OrderId {
        let lines = vec![CartLine::new(StockKey::product("MUG"), qty)];
        let quote = self
            .lifecycle
            .quote(&QuoteRequest {
                lines: lines.clone(),
                discount_code: None,
            })
            .await
            .unwrap();
        self.lifecycle
            .create_order(CreateOrderRequest {
                customer_id: CustomerId::new(),
                lines,
                discount_code: None,
                shipping_address: address(),
                billing_address: None,
                expected_total: quote.totals.total,
            })
            .await
            .unwrap()
            .id()
            .unwrap()
    }

    async fn initiate(&self, order_id: OrderId) -> PaymentAttempt {
        self.handoff
            .initiate(order_id, Contact::default())
            .await
            .unwrap()
    }

    async fn status(&self, order_id: OrderId) -> OrderStatus {
        self.lifecycle.get_order(order_id).await.unwrap().status()
    }

    async fn reserved_mugs(&self) -> u32 {
        self.store
            .inventory(&StockKey::product("MUG"))
            .await
            .unwrap()
            .unwrap()
            .reserved_quantity()
    }
}

fn address() -> Address {
    Address {
        full_name: "Farah Sheikh".to_string(),
        line1: "21 Residency Road".to_string(),
        line2: None,
        city: "Pune".to_string(),
        state: "MH".to_string(),
        postal_code: "411001".to_string(),
        country: "IN".to_string(),
        phone: None,
    }
}

fn declined(attempt: &PaymentAttempt) -> GatewayCallback {
    GatewayCallback::Failed {
        gateway_order_id: attempt.gateway_order_id.clone(),
        reason: Some("card_declined".to_string()),
    }
}

#[tokio::test]
async fn test_sweep_continues_past_a_failing_order() {
    let rig = Rig::new(3).await;
    let stuck = rig.order_mugs(2).await;
    rig.clock.advance(Duration::minutes(1));
    let abandoned = rig.order_mugs(3).await;
    rig.store.break_order(stuck);
    rig.clock.advance(Duration::minutes(31));

    let reconciler = Reconciler::new(rig.lifecycle.clone(), StdDuration::from_secs(60));
    let report = reconciler.sweep(rig.clock.now()).await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.released, 1);
    assert_eq!(report.failed, 1);

    assert_eq!(rig.status(stuck).await, OrderStatus::Pending);
    assert_eq!(rig.status(abandoned).await, OrderStatus::Cancelled);
    assert_eq!(rig.reserved_mugs().await, 2);

    rig.store.repair_order(stuck);
    let report = reconciler.sweep(rig.clock.now()).await.unwrap();
    assert_eq!(report.released, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(rig.reserved_mugs().await, 0);
}

#[tokio::test]
async fn test_concurrent_last_declines_cancel_the_order() {
    let rig = Rig::new(2).await;
    let order_id = rig.order_mugs(1).await;
    let first = rig.initiate(order_id).await;
    let second = rig.initiate(order_id).await;

    // The first decline counted before the second was written and so
    // never reached the cap itself.
    let mut first_failed = first.clone();
    first_failed
        .mark_failed("card_declined", rig.clock.now())
        .unwrap();
    rig.store
        .decline_concurrently(AttemptUpdate::new(first_failed, PaymentStatus::Pending));

    let outcome = rig.callbacks.handle(declined(&second)).await.unwrap();
    assert!(matches!(outcome, CallbackOutcome::Compensated(_)), "{outcome:?}");
    assert_eq!(outcome.order().cancellation_reason(), Some("payment_failed"));
    assert_eq!(rig.reserved_mugs().await, 0);

    let attempts = rig.lifecycle.payment_attempts(order_id).await.unwrap();
    assert!(attempts.iter().all(|a| a.status == PaymentStatus::Failed));
}

#[tokio::test]
async fn test_decline_with_an_open_attempt_waits_for_it() {
    let rig = Rig::new(2).await;
    let order_id = rig.order_mugs(1).await;
    let first = rig.initiate(order_id).await;
    let second = rig.initiate(order_id).await;

    let outcome = rig.callbacks.handle(declined(&second)).await.unwrap();
    assert!(
        matches!(outcome, CallbackOutcome::AwaitingPayment(_)),
        "{outcome:?}"
    );
    assert_eq!(outcome.as_str(), "awaiting_payment");
    assert_eq!(rig.status(order_id).await, OrderStatus::Pending);
    assert_eq!(rig.reserved_mugs().await, 1);

    let paid = GatewayCallback::Authorized {
        gateway_order_id: first.gateway_order_id.clone(),
        gateway_payment_id: "pay_first".to_string(),
        signature: rig.gateway.sign(&first.gateway_order_id, "pay_first"),
    };
    let outcome = rig.callbacks.handle(paid).await.unwrap();
    assert!(matches!(outcome, CallbackOutcome::Confirmed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_runs_on_interval_and_stops() {
    let rig = Rig::new(3).await;
    let early = rig.order_mugs(2).await;
    rig.clock.advance(Duration::minutes(31));

    let reconciler = Arc::new(Reconciler::new(
        rig.lifecycle.clone(),
        StdDuration::from_secs(60),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(reconciler.run(shutdown_rx));

    // The first tick fires immediately.
    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert_eq!(rig.status(early).await, OrderStatus::Cancelled);
    assert_eq!(rig.reserved_mugs().await, 0);

    let late = rig.order_mugs(1).await;
    rig.clock.advance(Duration::minutes(31));
    assert_eq!(rig.status(late).await, OrderStatus::Pending);

    tokio::time::sleep(StdDuration::from_secs(60)).await;
    assert_eq!(rig.status(late).await, OrderStatus::Cancelled);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), task)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
