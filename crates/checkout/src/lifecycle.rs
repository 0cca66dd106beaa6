//! Order Lifecycle Manager.
//!
//! The only writer of order and payment status. Every step loads the order,
//! asks the aggregate for the events the step produces, and persists the
//! resulting [`Transition`] (order state, events, ledger operations and the
//! payment attempt) in one atomic store call guarded by the order version.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{
    Address, Aggregate, CompensationReason, CustomerId, DiscountInput, Money, Order, OrderError, OrderEvent,
    OrderLineItem, OrderNumber, OrderStatus, PaymentAttempt, PaymentStatus, PlaceOrder, PriceLine,
    ProductId, Quote, StockKey, VariantId, calculate,
};
use serde::Deserialize;
use store::{AttemptUpdate, CheckoutStore, EventEnvelope, StoreError, Transition};

use crate::clock::Clock;
use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result};
use crate::ledger::InventoryLedger;
use crate::services::Catalog;
use crate::verifier::VerifiedPayment;

/// One line of a finalized cart. Prices come from the catalog, never the cart.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(key: StockKey, quantity: u32) -> Self {
        Self {
            product_id: key.product_id,
            variant_id: key.variant_id,
            quantity,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }
}

/// Input to the totals preview.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteRequest {
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub discount_code: Option<String>,
}

/// Input to [`OrderLifecycle::create_order`].
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub customer_id: CustomerId,
    pub lines: Vec<CartLine>,
    pub discount_code: Option<String>,
    pub shipping_address: Address,
    /// Defaults to the shipping address.
    pub billing_address: Option<Address>,
    /// The total the buyer saw. Must equal the server-side computation.
    pub expected_total: Money,
}

/// Creates orders and drives them through their status machine.
pub struct OrderLifecycle<S> {
    ledger: InventoryLedger<S>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    config: CheckoutConfig,
}

impl<S: CheckoutStore> OrderLifecycle<S> {
    pub fn new(
        store: S,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            ledger: InventoryLedger::new(store),
            catalog,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        self.ledger.store()
    }

    /// The ledger every stock-moving write goes through.
    pub fn ledger(&self) -> &InventoryLedger<S> {
        &self.ledger
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Previews totals for a cart. No side effects.
    #[tracing::instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let (_, quote) = self
            .price_cart(&request.lines, request.discount_code.as_deref())
            .await?;
        Ok(quote)
    }

    /// Places an order and reserves every line, or nothing.
    ///
    /// Totals are recomputed from catalog prices; the request is refused if
    /// they disagree with `expected_total`.
    #[tracing::instrument(
        skip(self, request),
        fields(customer_id = %request.customer_id, lines = request.lines.len())
    )]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        let started = Instant::now();
        let result = self.place(request).await;
        metrics::histogram!("checkout_create_order_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(
                    order_id = ?order.id(),
                    order_number = ?order.number().map(OrderNumber::as_str),
                    total = %order.total(),
                    "order placed"
                );
            }
            Err(e) => {
                let reason = rejection_reason(e);
                metrics::counter!("orders_rejected_total", "reason" => reason).increment(1);
                tracing::info!(reason, error = %e, "order rejected");
            }
        }
        result
    }

    async fn place(&self, request: CreateOrderRequest) -> Result<Order> {
        let shipping_address = request.shipping_address;
        let billing_address = request
            .billing_address
            .unwrap_or_else(|| shipping_address.clone());
        if let Some(field) = shipping_address.first_missing_field() {
            return Err(CheckoutError::Validation(format!(
                "shipping address is missing {field}"
            )));
        }
        if let Some(field) = billing_address.first_missing_field() {
            return Err(CheckoutError::Validation(format!(
                "billing address is missing {field}"
            )));
        }

        let (lines, quote) = self
            .price_cart(&request.lines, request.discount_code.as_deref())
            .await?;

        if quote.totals.total != request.expected_total {
            return Err(CheckoutError::TotalMismatch {
                expected: request.expected_total,
                computed: quote.totals.total,
            });
        }
        if quote.discount.is_rejected() {
            tracing::info!(discount = ?quote.discount, "discount code not applied");
        }

        let order = Order::default();
        let events = order.place(PlaceOrder {
            order_id: OrderId::new(),
            customer_id: request.customer_id,
            lines,
            totals: quote.totals,
            discount_code: quote.discount.applied_code().map(str::to_string),
            currency: self.config.currency.clone(),
            shipping_address,
            billing_address,
            placed_at: self.clock.now(),
        })?;

        let transition = Transition::new(&order, events);
        let placed = transition.order.clone();
        self.ledger.place(transition).await?;
        Ok(placed)
    }

    /// Converts the order's reservation into a sale.
    ///
    /// Only a [`VerifiedPayment`] opens this path. Repeating the commit for
    /// the attempt that already paid is a no-op.
    #[tracing::instrument(
        skip(self, payment),
        fields(order_id = %payment.order_id(), attempt_id = %payment.attempt_id())
    )]
    pub async fn commit(&self, payment: VerifiedPayment) -> Result<Order> {
        let attempt_id = payment.attempt_id();
        let gateway_payment_id = payment.gateway_payment_id().to_string();
        let update = AttemptUpdate::new(payment.paid_attempt().clone(), PaymentStatus::Pending);

        let result = self
            .apply(payment.order_id(), "commit", Some(update), |order| {
                order.commit(attempt_id, &gateway_payment_id)
            })
            .await;

        match result {
            Ok((order, true)) => {
                metrics::counter!("orders_committed_total").increment(1);
                tracing::info!(gateway_payment_id, "payment committed");
                Ok(order)
            }
            Ok((order, false)) => {
                tracing::debug!("commit already applied");
                Ok(order)
            }
            Err(e) => Err(log_violation(e, "commit")),
        }
    }

    /// Releases the order's reservation without a sale.
    ///
    /// Repeating a compensation on an already-released order is a no-op.
    pub async fn compensate(&self, order_id: OrderId, reason: CompensationReason) -> Result<Order> {
        self.compensate_with(order_id, reason, None)
            .await
            .map(|(order, _)| order)
    }

    /// Compensates, settling a payment attempt in the same transition.
    ///
    /// The flag is true if this call released the stock.
    #[tracing::instrument(skip(self, attempt), fields(reason = %reason))]
    pub(crate) async fn compensate_with(
        &self,
        order_id: OrderId,
        reason: CompensationReason,
        attempt: Option<AttemptUpdate>,
    ) -> Result<(Order, bool)> {
        let result = self
            .apply(order_id, "compensate", attempt, |order| {
                order.compensate(reason)
            })
            .await;

        match result {
            Ok((order, changed)) => {
                if changed {
                    metrics::counter!("orders_compensated_total", "reason" => reason.as_str())
                        .increment(1);
                    tracing::info!("reservation released");
                }
                Ok((order, changed))
            }
            Err(e) => Err(log_violation(e, "compensate")),
        }
    }

    /// Cancels a pending order on the buyer's request, releasing its stock.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_by_customer(
        &self,
        order_id: OrderId,
        customer_id: CustomerId,
    ) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        if order.customer_id() != Some(customer_id) {
            return Err(CheckoutError::OrderNotFound(order_id.to_string()));
        }
        if order.status() != OrderStatus::Pending {
            return Err(CheckoutError::ConsistencyViolation(format!(
                "order is {} and can no longer be cancelled by the customer",
                order.status()
            )));
        }
        self.compensate(order_id, CompensationReason::CustomerCancelled)
            .await
    }

    /// Cancels a confirmed order before fulfillment. Payment is marked refunded.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId, reason: &str) -> Result<Order> {
        let refund = self.refund_update(order_id).await?;
        let (order, _) = self
            .apply(order_id, "cancel", refund, |order| order.cancel(reason))
            .await?;
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn start_processing(&self, order_id: OrderId) -> Result<Order> {
        let (order, _) = self
            .apply(order_id, "start_processing", None, Order::start_processing)
            .await?;
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_shipped(&self, order_id: OrderId, tracking_number: &str) -> Result<Order> {
        let (order, _) = self
            .apply(order_id, "ship", None, |order| order.ship(tracking_number))
            .await?;
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_delivered(&self, order_id: OrderId) -> Result<Order> {
        let (order, _) = self
            .apply(order_id, "deliver", None, Order::deliver)
            .await?;
        Ok(order)
    }

    /// Refunds a confirmed, shipped or delivered order. Stock is not restored.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, order_id: OrderId, reason: &str) -> Result<Order> {
        let refund = self.refund_update(order_id).await?;
        let (order, _) = self
            .apply(order_id, "refund", refund, |order| order.refund(reason))
            .await?;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store()
            .load_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))
    }

    pub async fn find_by_number(&self, number: &str) -> Result<Order> {
        self.store()
            .find_order_by_number(&OrderNumber::new(number))
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(number.to_string()))
    }

    /// Returns the order's audit trail, oldest first.
    pub async fn order_events(&self, order_id: OrderId) -> Result<Vec<EventEnvelope>> {
        self.get_order(order_id).await?;
        Ok(self.store().order_events(order_id).await?)
    }

    pub async fn payment_attempts(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        Ok(self.store().attempts_for_order(order_id).await?)
    }

    /// Looks up catalog prices and computes the authoritative totals.
    async fn price_cart(
        &self,
        cart: &[CartLine],
        discount_code: Option<&str>,
    ) -> Result<(Vec<OrderLineItem>, Quote)> {
        if cart.is_empty() {
            return Err(CheckoutError::Validation("cart is empty".to_string()));
        }

        let mut seen = HashSet::new();
        let mut price_lines = Vec::with_capacity(cart.len());
        let mut snapshots = Vec::with_capacity(cart.len());
        for line in cart {
            let key = line.key();
            if line.quantity == 0 {
                return Err(CheckoutError::Validation(format!(
                    "quantity for {key} must be greater than 0"
                )));
            }
            if key.has_blank_variant() {
                return Err(CheckoutError::Validation(format!(
                    "variant id for {} must not be blank",
                    key.product_id
                )));
            }
            if !seen.insert(key.clone()) {
                return Err(CheckoutError::Validation(format!(
                    "{key} appears more than once"
                )));
            }

            let item = match self.catalog.item(&key).await? {
                Some(item) if item.active => item,
                _ => {
                    return Err(CheckoutError::Validation(format!(
                        "{key} is not available for sale"
                    )));
                }
            };

            price_lines.push(PriceLine::new(key.clone(), item.unit_price, line.quantity));
            snapshots.push(OrderLineItem::new(
                key,
                item.name,
                item.image_url,
                line.quantity,
                item.unit_price,
            ));
        }

        let code = discount_code.map(str::trim).filter(|code| !code.is_empty());
        let terms = match code {
            Some(code) => self.catalog.discount(code).await?,
            None => None,
        };
        let discount = match (code, &terms) {
            (None, _) => DiscountInput::None,
            (Some(code), None) => DiscountInput::NotFound(code),
            (Some(_), Some(terms)) => DiscountInput::Found(terms),
        };

        let quote = calculate(
            &price_lines,
            discount,
            None,
            &self.config.pricing,
            self.clock.now(),
        )?;
        Ok((snapshots, quote))
    }

    /// Builds the write that marks the order's paid attempt refunded, if any.
    async fn refund_update(&self, order_id: OrderId) -> Result<Option<AttemptUpdate>> {
        let order = self.get_order(order_id).await?;
        let Some(attempt_id) = order.paid_attempt() else {
            return Ok(None);
        };
        let Some(mut attempt) = self.store().load_attempt(attempt_id).await? else {
            return Ok(None);
        };
        if !attempt.is_paid() {
            return Ok(None);
        }
        attempt
            .mark_refunded(self.clock.now())
            .map_err(|e| CheckoutError::Domain(e.into()))?;
        Ok(Some(AttemptUpdate::new(attempt, PaymentStatus::Paid)))
    }

    /// Loads the order, decides the step and persists it.
    ///
    /// A version or attempt conflict means another writer got there first;
    /// the step is decided once more against the fresh order, which turns a
    /// duplicate into a no-op and a contradiction into an error.
    async fn apply<F>(
        &self,
        order_id: OrderId,
        action: &'static str,
        attempt: Option<AttemptUpdate>,
        decide: F,
    ) -> Result<(Order, bool)>
    where
        F: Fn(&Order) -> std::result::Result<Vec<OrderEvent>, OrderError> + Send + Sync,
    {
        let mut retried = false;
        loop {
            let order = self.get_order(order_id).await?;
            let events = decide(&order)?;
            if events.is_empty() {
                return Ok((order, false));
            }

            let mut transition = Transition::new(&order, events);
            if let Some(update) = &attempt {
                transition = transition.with_attempt(update.clone());
            }
            let next = transition.order.clone();

            match self.ledger.settle(transition).await {
                Ok(_) => return Ok((next, true)),
                Err(StoreError::ConcurrencyConflict { .. } | StoreError::AttemptConflict(_))
                    if !retried =>
                {
                    tracing::debug!(%order_id, action, "concurrent write, re-evaluating");
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Stable reason label for a refused order creation.
fn rejection_reason(err: &CheckoutError) -> &'static str {
    match err {
        CheckoutError::Validation(_) => "validation_error",
        CheckoutError::TotalMismatch { .. } => "total_mismatch",
        CheckoutError::InsufficientStock(_) => "out_of_stock",
        _ => "internal_error",
    }
}

fn log_violation(err: CheckoutError, action: &'static str) -> CheckoutError {
    if let CheckoutError::ConsistencyViolation(detail) = &err {
        tracing::error!(action, %detail, "consistency violation");
    }
    err
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use domain::{DiscountCode, InventoryRecord, StockSettlement};
    use store::InMemoryCheckoutStore;

    use super::*;
    use crate::clock::FixedClock;
    use crate::services::{CatalogItem, InMemoryCatalog};
    use crate::verifier::PaymentVerifier;

    struct Fixture {
        lifecycle: OrderLifecycle<InMemoryCheckoutStore>,
        store: InMemoryCheckoutStore,
        catalog: InMemoryCatalog,
        clock: FixedClock,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryCheckoutStore::new();
        let catalog = InMemoryCatalog::new();
        let clock = FixedClock::new(Utc::now());

        catalog.add_item(CatalogItem::new(
            StockKey::product("MUG"),
            "Mug",
            Money::from_minor(30_000),
        ));
        catalog.add_item(CatalogItem::new(
            StockKey::variant("TEE", "L"),
            "Tee",
            Money::from_minor(60_000),
        ));
        store
            .upsert_inventory(InventoryRecord::new(StockKey::product("MUG"), 5, 1))
            .await
            .unwrap();
        store
            .upsert_inventory(InventoryRecord::new(StockKey::variant("TEE", "L"), 2, 1))
            .await
            .unwrap();

        let lifecycle = OrderLifecycle::new(
            store.clone(),
            Arc::new(catalog.clone()),
            Arc::new(clock.clone()),
            CheckoutConfig::default(),
        );
        Fixture {
            lifecycle,
            store,
            catalog,
            clock,
        }
    }

    fn address() -> Address {
        Address {
            full_name: "Kiran Rao".to_string(),
            line1: "4 Park Street".to_string(),
            line2: None,
            city: "Kolkata".to_string(),
            state: "WB".to_string(),
            postal_code: "700016".to_string(),
            country: "IN".to_string(),
            phone: None,
        }
    }

    fn request(lines: Vec<CartLine>, expected_total: i64) -> CreateOrderRequest {
        CreateOrderRequest {
            customer_id: CustomerId::new(),
            lines,
            discount_code: None,
            shipping_address: address(),
            billing_address: None,
            expected_total: Money::from_minor(expected_total),
        }
    }

    fn mugs(qty: u32) -> CartLine {
        CartLine::new(StockKey::product("MUG"), qty)
    }

    async fn reserved(store: &InMemoryCheckoutStore, key: &StockKey) -> u32 {
        store
            .inventory(key)
            .await
            .unwrap()
            .unwrap()
            .reserved_quantity()
    }

    async fn pay(f: &Fixture, order: &Order) -> VerifiedPayment {
        let order_id = order.id().unwrap();
        let attempt = PaymentAttempt::new(
            order_id,
            1,
            format!("gw_{order_id}"),
            order.total(),
            "INR",
            f.clock.now(),
        );
        f.store.insert_attempt(&attempt).await.unwrap();

        let verifier = PaymentVerifier::new("secret").unwrap();
        let signature = verifier.sign(&attempt.gateway_order_id, "pay_1");
        verifier
            .authorize(&attempt, "pay_1", &signature, f.clock.now())
            .unwrap()
    }

    #[tokio::test]
    async fn test_quote_uses_catalog_prices() {
        let f = fixture().await;
        let quote = f
            .lifecycle
            .quote(&QuoteRequest {
                lines: vec![mugs(2)],
                discount_code: None,
            })
            .await
            .unwrap();

        assert_eq!(quote.totals.subtotal, Money::from_minor(60_000));
        assert_eq!(quote.totals.shipping, Money::from_minor(4_900));
        assert_eq!(quote.totals.total, Money::from_minor(64_900));
    }

    #[tokio::test]
    async fn test_overflowing_cart_is_a_validation_error() {
        let f = fixture().await;
        f.catalog.add_item(CatalogItem::new(
            StockKey::product("CAR"),
            "Car",
            Money::from_minor(2_500_000_000),
        ));

        let result = f
            .lifecycle
            .quote(&QuoteRequest {
                lines: vec![CartLine::new(StockKey::product("CAR"), u32::MAX)],
                discount_code: None,
            })
            .await;
        assert!(matches!(result, Err(CheckoutError::Validation(msg)) if msg.contains("CAR")));
    }

    #[tokio::test]
    async fn test_create_order_reserves_stock() {
        let f = fixture().await;
        let order = f
            .lifecycle
            .create_order(request(vec![mugs(2)], 64_900))
            .await
            .unwrap();

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.created_at(), Some(f.clock.now()));
        assert_eq!(reserved(&f.store, &StockKey::product("MUG")).await, 2);

        let loaded = f.lifecycle.get_order(order.id().unwrap()).await.unwrap();
        assert_eq!(loaded.total(), Money::from_minor(64_900));
        let number = loaded.number().unwrap().as_str().to_string();
        assert_eq!(
            f.lifecycle.find_by_number(&number).await.unwrap().id(),
            order.id()
        );
    }

    #[tokio::test]
    async fn test_total_mismatch_writes_nothing() {
        let f = fixture().await;
        let result = f
            .lifecycle
            .create_order(request(vec![mugs(2)], 100))
            .await;

        match result {
            Err(CheckoutError::TotalMismatch { expected, computed }) => {
                assert_eq!(expected, Money::from_minor(100));
                assert_eq!(computed, Money::from_minor(64_900));
            }
            other => panic!("expected total mismatch, got {other:?}"),
        }
        assert_eq!(reserved(&f.store, &StockKey::product("MUG")).await, 0);
        assert_eq!(f.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let f = fixture().await;

        let empty = f.lifecycle.create_order(request(vec![], 0)).await;
        assert!(matches!(empty, Err(CheckoutError::Validation(_))));

        let unknown = f
            .lifecycle
            .create_order(request(vec![CartLine::new(StockKey::product("GHOST"), 1)], 0))
            .await;
        assert!(matches!(unknown, Err(CheckoutError::Validation(_))));

        let duplicate = f
            .lifecycle
            .create_order(request(vec![mugs(1), mugs(1)], 0))
            .await;
        assert!(matches!(duplicate, Err(CheckoutError::Validation(_))));

        let blank = f
            .lifecycle
            .create_order(request(vec![CartLine::new(StockKey::variant("TEE", ""), 1)], 0))
            .await;
        assert!(matches!(blank, Err(CheckoutError::Validation(msg)) if msg.contains("variant")));

        let mut missing = request(vec![mugs(1)], 34_900);
        missing.shipping_address.city = String::new();
        let result = f.lifecycle.create_order(missing).await;
        assert!(matches!(result, Err(CheckoutError::Validation(msg)) if msg.contains("city")));
    }

    #[tokio::test]
    async fn test_out_of_stock_lists_short_lines() {
        let f = fixture().await;
        let result = f
            .lifecycle
            .create_order(request(
                vec![mugs(1), CartLine::new(StockKey::variant("TEE", "L"), 3)],
                210_000,
            ))
            .await;

        match result {
            Err(CheckoutError::InsufficientStock(lines)) => {
                assert_eq!(lines.len(), 1);
                assert_eq!(lines[0].key, StockKey::variant("TEE", "L"));
                assert_eq!(lines[0].available, 2);
            }
            other => panic!("expected out of stock, got {other:?}"),
        }
        assert_eq!(reserved(&f.store, &StockKey::product("MUG")).await, 0);
    }

    #[tokio::test]
    async fn test_rejected_discount_keeps_undiscounted_total() {
        let f = fixture().await;
        let mut code = DiscountCode::percentage("BIG10", 10);
        code.minimum_amount = Money::from_minor(500_000);
        f.catalog.add_discount(code);

        let mut req = request(vec![mugs(1)], 34_900);
        req.discount_code = Some("BIG10".to_string());
        let order = f.lifecycle.create_order(req).await.unwrap();

        assert_eq!(order.total(), Money::from_minor(34_900));
        assert_eq!(order.discount_code(), None);
    }

    #[tokio::test]
    async fn test_commit_confirms_stock_once() {
        let f = fixture().await;
        let order = f
            .lifecycle
            .create_order(request(vec![mugs(2)], 64_900))
            .await
            .unwrap();
        let payment = pay(&f, &order).await;

        let committed = f.lifecycle.commit(payment.clone()).await.unwrap();
        assert_eq!(committed.status(), OrderStatus::Confirmed);
        assert_eq!(committed.payment_status(), PaymentStatus::Paid);
        assert_eq!(committed.stock_settled(), Some(StockSettlement::Confirmed));

        let again = f.lifecycle.commit(payment).await.unwrap();
        assert_eq!(again.version(), committed.version());

        let record = f
            .store
            .inventory(&StockKey::product("MUG"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.quantity(), 3);
        assert_eq!(record.reserved_quantity(), 0);
    }

    #[tokio::test]
    async fn test_compensate_releases_once_and_blocks_commit() {
        let f = fixture().await;
        let order = f
            .lifecycle
            .create_order(request(vec![mugs(2)], 64_900))
            .await
            .unwrap();
        let order_id = order.id().unwrap();
        let payment = pay(&f, &order).await;

        let cancelled = f
            .lifecycle
            .compensate(order_id, CompensationReason::PaymentCancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(cancelled.payment_status(), PaymentStatus::Failed);
        assert_eq!(reserved(&f.store, &StockKey::product("MUG")).await, 0);

        f.lifecycle
            .compensate(order_id, CompensationReason::Expired)
            .await
            .unwrap();
        assert_eq!(
            f.lifecycle.order_events(order_id).await.unwrap().len(),
            2
        );

        let late = f.lifecycle.commit(payment).await;
        assert!(matches!(late, Err(CheckoutError::ConsistencyViolation(_))));
        assert_eq!(reserved(&f.store, &StockKey::product("MUG")).await, 0);
    }

    #[tokio::test]
    async fn test_customer_cancellation() {
        let f = fixture().await;
        let req = request(vec![mugs(1)], 34_900);
        let customer = req.customer_id;
        let order = f.lifecycle.create_order(req).await.unwrap();
        let order_id = order.id().unwrap();

        let stranger = f.lifecycle.cancel_by_customer(order_id, CustomerId::new()).await;
        assert!(matches!(stranger, Err(CheckoutError::OrderNotFound(_))));

        let cancelled = f
            .lifecycle
            .cancel_by_customer(order_id, customer)
            .await
            .unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason(), Some("customer_cancelled"));
    }

    #[tokio::test]
    async fn test_fulfillment_path_and_refund() {
        let f = fixture().await;
        let order = f
            .lifecycle
            .create_order(request(vec![mugs(1)], 34_900))
            .await
            .unwrap();
        let order_id = order.id().unwrap();

        let early = f.lifecycle.mark_shipped(order_id, "TRK-1").await;
        assert!(matches!(early, Err(CheckoutError::ConsistencyViolation(_))));

        let payment = pay(&f, &order).await;
        let attempt_id = payment.attempt_id();
        f.lifecycle.commit(payment).await.unwrap();
        f.lifecycle.start_processing(order_id).await.unwrap();

        let blank = f.lifecycle.mark_shipped(order_id, "  ").await;
        assert!(matches!(blank, Err(CheckoutError::Validation(_))));

        let shipped = f.lifecycle.mark_shipped(order_id, "TRK-1").await.unwrap();
        assert_eq!(shipped.tracking_number(), Some("TRK-1"));
        f.lifecycle.mark_delivered(order_id).await.unwrap();

        let refunded = f.lifecycle.refund(order_id, "damaged").await.unwrap();
        assert_eq!(refunded.status(), OrderStatus::Refunded);
        assert_eq!(refunded.payment_status(), PaymentStatus::Refunded);

        let attempt = f.store.load_attempt(attempt_id).await.unwrap().unwrap();
        assert_eq!(attempt.status, PaymentStatus::Refunded);

        // Refunds never restock
        let record = f
            .store
            .inventory(&StockKey::product("MUG"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.quantity(), 4);
    }

    #[tokio::test]
    async fn test_cancel_confirmed_order_refunds_payment() {
        let f = fixture().await;
        let order = f
            .lifecycle
            .create_order(request(vec![mugs(1)], 34_900))
            .await
            .unwrap();
        let order_id = order.id().unwrap();
        f.lifecycle.commit(pay(&f, &order).await).await.unwrap();

        let cancelled = f.lifecycle.cancel(order_id, "out of delivery area").await.unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(cancelled.payment_status(), PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_hold_expiry_is_judged_by_clock() {
        let f = fixture().await;
        let order = f
            .lifecycle
            .create_order(request(vec![mugs(1)], 34_900))
            .await
            .unwrap();

        let config = f.lifecycle.config();
        assert!(!order.is_hold_expired(config.hold_cutoff(f.clock.now())));
        f.clock.advance(Duration::minutes(31));
        assert!(order.is_hold_expired(config.hold_cutoff(f.lifecycle.now())));
    }
}
