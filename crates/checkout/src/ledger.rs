//! Inventory Ledger: the only writer of stock counters.
//!
//! Order-level writes reach the store through [`InventoryLedger::place`] and
//! [`InventoryLedger::settle`], which run the transition's ledger operations
//! in the same transaction as the order row. Single-row operations are
//! serialized per (product, variant) row by the store. The ledger itself
//! does not deduplicate releases or confirms; the order aggregate emits each
//! at most once per order line.

use domain::{LedgerOp, StockKey};
use serde::Serialize;
use store::{CheckoutStore, StoreError, Transition, Version};

use crate::error::{CheckoutError, Result};

/// Buyer-facing stock level for one product or variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub key: StockKey,
    pub available: u32,
    pub low_stock: bool,
}

/// Stock operations over a [`CheckoutStore`].
#[derive(Debug, Clone)]
pub struct InventoryLedger<S> {
    store: S,
}

impl<S: CheckoutStore> InventoryLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persists a newly placed order, holding every line or none.
    pub async fn place(&self, transition: Transition) -> Result<Version> {
        let ops = transition.ledger_ops.clone();
        match self.store.create_order(transition).await {
            Ok(version) => {
                record(&ops);
                Ok(version)
            }
            Err(StoreError::InsufficientStock(shortages)) => {
                metrics::counter!("inventory_reservations_total", "outcome" => "insufficient")
                    .increment(shortages.len() as u64);
                tracing::info!(short_lines = shortages.len(), "reservation refused");
                Err(CheckoutError::InsufficientStock(shortages))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persists a lifecycle step together with the stock it releases or confirms.
    ///
    /// Store errors come back untouched so the caller can tell a lost
    /// version race from a failure.
    pub async fn settle(&self, transition: Transition) -> store::Result<Version> {
        let ops = transition.ledger_ops.clone();
        let version = self.store.save_transition(transition).await?;
        record(&ops);
        Ok(version)
    }

    /// Holds `qty` units. Returns false, mutating nothing, if fewer are available.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn reserve(&self, key: &StockKey, qty: u32) -> Result<bool> {
        if qty == 0 {
            return Err(CheckoutError::Validation(format!(
                "quantity for {key} must be greater than 0"
            )));
        }

        let reserved = self.store.reserve(key, qty).await?;
        let outcome = if reserved { "reserved" } else { "insufficient" };
        metrics::counter!("inventory_reservations_total", "outcome" => outcome).increment(1);
        tracing::debug!(qty, outcome, "reserve");
        Ok(reserved)
    }

    /// Drops a hold of `qty` units, clamped at zero.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn release(&self, key: &StockKey, qty: u32) -> Result<()> {
        self.store.release(key, qty).await?;
        metrics::counter!("inventory_reservations_total", "outcome" => "released").increment(1);
        Ok(())
    }

    /// Turns a hold of `qty` units into a sale.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn confirm(&self, key: &StockKey, qty: u32) -> Result<()> {
        self.store.confirm(key, qty).await?;
        metrics::counter!("inventory_reservations_total", "outcome" => "confirmed").increment(1);
        Ok(())
    }

    /// Returns the stock level shown to buyers, or None for an unknown key.
    pub async fn availability(&self, key: &StockKey) -> Result<Option<StockLevel>> {
        Ok(self.store.inventory(key).await?.map(|record| StockLevel {
            available: record.available(),
            low_stock: record.is_low_stock(),
            key: record.key,
        }))
    }
}

fn record(ops: &[LedgerOp]) {
    for op in ops {
        let outcome = match op {
            LedgerOp::Reserve { .. } => "reserved",
            LedgerOp::Release { .. } => "released",
            LedgerOp::Confirm { .. } => "confirmed",
        };
        metrics::counter!("inventory_reservations_total", "outcome" => outcome).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::OrderId;
    use domain::{
        Address, CompensationReason, CustomerId, InventoryRecord, Money, Order, OrderLineItem,
        OrderTotals, PlaceOrder,
    };
    use store::InMemoryCheckoutStore;

    use super::*;

    async fn ledger_with(stock: &[(StockKey, u32)]) -> (InventoryLedger<InMemoryCheckoutStore>, InMemoryCheckoutStore) {
        let store = InMemoryCheckoutStore::new();
        for (key, qty) in stock {
            store
                .upsert_inventory(InventoryRecord::new(key.clone(), *qty, 1))
                .await
                .unwrap();
        }
        (InventoryLedger::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_reserve_confirm_release() {
        let mug = StockKey::product("MUG");
        let (ledger, store) = ledger_with(&[(mug.clone(), 5)]).await;

        assert!(ledger.reserve(&mug, 3).await.unwrap());
        assert!(!ledger.reserve(&mug, 3).await.unwrap());

        ledger.confirm(&mug, 2).await.unwrap();
        ledger.release(&mug, 1).await.unwrap();

        let record = store.inventory(&mug).await.unwrap().unwrap();
        assert_eq!(record.quantity(), 3);
        assert_eq!(record.reserved_quantity(), 0);
    }

    #[tokio::test]
    async fn test_zero_quantity_is_rejected() {
        let mug = StockKey::product("MUG");
        let (ledger, _) = ledger_with(&[(mug.clone(), 5)]).await;
        assert!(matches!(
            ledger.reserve(&mug, 0).await,
            Err(CheckoutError::Validation(_))
        ));
    }

    fn placement(lines: &[(StockKey, u32)]) -> Transition {
        let order = Order::default();
        let events = order
            .place(PlaceOrder {
                order_id: OrderId::new(),
                customer_id: CustomerId::new(),
                lines: lines
                    .iter()
                    .map(|(key, qty)| {
                        OrderLineItem::new(key.clone(), "Item", None, *qty, Money::from_minor(1_000))
                    })
                    .collect(),
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

    fn address() -> Address {
        Address {
            full_name: "Nisha Menon".to_string(),
            line1: "3 Marine Drive".to_string(),
            line2: None,
            city: "Kochi".to_string(),
            state: "KL".to_string(),
            postal_code: "682031".to_string(),
            country: "IN".to_string(),
            phone: None,
        }
    }

    #[tokio::test]
    async fn test_place_rolls_back_on_shortage() {
        let mug = StockKey::product("MUG");
        let tee = StockKey::variant("TEE", "S");
        let cap = StockKey::product("CAP");
        let (ledger, store) =
            ledger_with(&[(mug.clone(), 5), (tee.clone(), 1), (cap.clone(), 4)]).await;

        let result = ledger
            .place(placement(&[(mug.clone(), 2), (tee.clone(), 2), (cap.clone(), 4)]))
            .await;

        match result {
            Err(CheckoutError::InsufficientStock(shortages)) => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].key, tee);
                assert_eq!(shortages[0].requested, 2);
                assert_eq!(shortages[0].available, 1);
            }
            other => panic!("expected shortage, got {other:?}"),
        }

        for key in [&mug, &tee, &cap] {
            let record = store.inventory(key).await.unwrap().unwrap();
            assert_eq!(record.reserved_quantity(), 0, "{key} still held");
        }
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_place_reports_unknown_keys() {
        let mug = StockKey::product("MUG");
        let (ledger, _) = ledger_with(&[(mug.clone(), 5)]).await;

        let result = ledger
            .place(placement(&[(mug, 1), (StockKey::product("GHOST"), 1)]))
            .await;
        match result {
            Err(CheckoutError::InsufficientStock(shortages)) => {
                assert_eq!(shortages[0].available, 0);
            }
            other => panic!("expected shortage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_place_then_settle_moves_stock() {
        let mug = StockKey::product("MUG");
        let (ledger, store) = ledger_with(&[(mug.clone(), 5)]).await;

        let placed = placement(&[(mug.clone(), 3)]);
        let order = placed.order.clone();
        ledger.place(placed).await.unwrap();
        assert_eq!(
            store.inventory(&mug).await.unwrap().unwrap().reserved_quantity(),
            3
        );

        let events = order.compensate(CompensationReason::Expired).unwrap();
        let version = ledger.settle(Transition::new(&order, events)).await.unwrap();
        assert_eq!(version.as_i64(), 2);

        let record = store.inventory(&mug).await.unwrap().unwrap();
        assert_eq!(record.quantity(), 5);
        assert_eq!(record.reserved_quantity(), 0);
    }

    #[tokio::test]
    async fn test_stale_settle_keeps_store_error() {
        let mug = StockKey::product("MUG");
        let (ledger, _) = ledger_with(&[(mug.clone(), 5)]).await;

        let placed = placement(&[(mug, 1)]);
        let order = placed.order.clone();
        ledger.place(placed).await.unwrap();

        let events = order.compensate(CompensationReason::Expired).unwrap();
        let step = Transition::new(&order, events);
        ledger.settle(step.clone()).await.unwrap();
        assert!(matches!(
            ledger.settle(step).await,
            Err(StoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_availability() {
        let mug = StockKey::product("MUG");
        let (ledger, _) = ledger_with(&[(mug.clone(), 2)]).await;
        ledger.reserve(&mug, 1).await.unwrap();

        let level = ledger.availability(&mug).await.unwrap().unwrap();
        assert_eq!(level.available, 1);
        assert!(level.low_stock);

        assert!(ledger
            .availability(&StockKey::product("GHOST"))
            .await
            .unwrap()
            .is_none());
    }
}
