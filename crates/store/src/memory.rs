use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Aggregate, InventoryRecord, LedgerOp, Order, OrderNumber, PaymentAttempt, StockKey,
    StockShortage,
};
use tokio::sync::RwLock;

use crate::{
    AttemptId, EventEnvelope, OrderId, Result, StoreError, Version,
    store::{AttemptUpdate, CheckoutStore, Transition},
};

#[derive(Default)]
struct State {
    inventory: HashMap<StockKey, InventoryRecord>,
    orders: HashMap<OrderId, Order>,
    numbers: HashMap<OrderNumber, OrderId>,
    events: Vec<EventEnvelope>,
    attempts: HashMap<AttemptId, PaymentAttempt>,
}

impl State {
    /// Reserves every op in order; on the first shortage keeps checking the
    /// rest, then releases whatever this call already held.
    fn reserve_all(&mut self, ops: &[LedgerOp]) -> std::result::Result<(), Vec<StockShortage>> {
        let mut held: Vec<(StockKey, u32)> = Vec::new();
        let mut shortages = Vec::new();

        for op in ops {
            let LedgerOp::Reserve { key, quantity } = op else {
                continue;
            };
            let reserved = match self.inventory.get_mut(key) {
                Some(record) => record.reserve(*quantity).map_err(|_| record.available()),
                None => Err(0),
            };
            match reserved {
                Ok(()) => held.push((key.clone(), *quantity)),
                Err(available) => shortages.push(StockShortage {
                    key: key.clone(),
                    requested: *quantity,
                    available,
                }),
            }
        }

        if shortages.is_empty() {
            return Ok(());
        }
        for (key, quantity) in held.into_iter().rev() {
            if let Some(record) = self.inventory.get_mut(&key) {
                record.release(quantity);
            }
        }
        Err(shortages)
    }

    /// Applies release/confirm ops to copies first so a missing row leaves
    /// every counter untouched.
    fn settle(&mut self, ops: &[LedgerOp]) -> Result<()> {
        let mut staged: HashMap<StockKey, InventoryRecord> = HashMap::new();
        for op in ops {
            let record = match staged.entry(op.key().clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let current = self
                        .inventory
                        .get(op.key())
                        .cloned()
                        .ok_or_else(|| StoreError::UnknownStockKey(op.key().clone()))?;
                    entry.insert(current)
                }
            };
            op.apply_to(record).map_err(|e| StoreError::Integrity(e.to_string()))?;
        }
        self.inventory.extend(staged);
        Ok(())
    }

    fn check_attempt(&self, update: &AttemptUpdate) -> Result<()> {
        match self.attempts.get(&update.attempt.id) {
            Some(stored) if stored.status == update.expected_status => Ok(()),
            _ => Err(StoreError::AttemptConflict(update.attempt.id)),
        }
    }
}

/// In-memory checkout store.
///
/// One lock guards every table, so each method is trivially atomic. Used by
/// tests and by the binary when no database is configured.
#[derive(Clone, Default)]
pub struct InMemoryCheckoutStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryCheckoutStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of order events stored.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

fn order_id_of(transition: &Transition) -> Result<OrderId> {
    transition
        .order_id()
        .ok_or_else(|| StoreError::Integrity("transition carries an unplaced order".to_string()))
}

#[async_trait]
impl CheckoutStore for InMemoryCheckoutStore {
    async fn reserve(&self, key: &StockKey, qty: u32) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(match state.inventory.get_mut(key) {
            Some(record) => record.reserve(qty).is_ok(),
            None => false,
        })
    }

    async fn release(&self, key: &StockKey, qty: u32) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .inventory
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownStockKey(key.clone()))?;
        record.release(qty);
        Ok(())
    }

    async fn confirm(&self, key: &StockKey, qty: u32) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state
            .inventory
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownStockKey(key.clone()))?;
        record.confirm(qty);
        Ok(())
    }

    async fn inventory(&self, key: &StockKey) -> Result<Option<InventoryRecord>> {
        Ok(self.state.read().await.inventory.get(key).cloned())
    }

    async fn upsert_inventory(&self, record: InventoryRecord) -> Result<()> {
        if record.key.has_blank_variant() {
            return Err(StoreError::Integrity(format!(
                "blank variant id for product {}",
                record.key.product_id
            )));
        }
        let mut state = self.state.write().await;
        state.inventory.insert(record.key.clone(), record);
        Ok(())
    }

    async fn create_order(&self, transition: Transition) -> Result<Version> {
        let order_id = order_id_of(&transition)?;
        let number = transition
            .order
            .number()
            .cloned()
            .ok_or_else(|| StoreError::Integrity("placed order has no number".to_string()))?;
        let envelopes =
            EventEnvelope::sequence(order_id, transition.expected_version, &transition.events)?;

        let mut state = self.state.write().await;
        if state.orders.contains_key(&order_id) || state.numbers.contains_key(&number) {
            return Err(StoreError::DuplicateOrder(order_id));
        }

        state
            .reserve_all(&transition.ledger_ops)
            .map_err(StoreError::InsufficientStock)?;

        state.events.extend(envelopes);
        let version = transition.order.version();
        state.numbers.insert(number, order_id);
        state.orders.insert(order_id, transition.order);
        Ok(version)
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn find_order_by_number(&self, number: &OrderNumber) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .numbers
            .get(number)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn save_transition(&self, transition: Transition) -> Result<Version> {
        let order_id = order_id_of(&transition)?;
        let envelopes =
            EventEnvelope::sequence(order_id, transition.expected_version, &transition.events)?;

        let mut state = self.state.write().await;
        let actual = state
            .orders
            .get(&order_id)
            .map(|order| order.version())
            .ok_or(StoreError::OrderNotFound(order_id))?;
        if actual != transition.expected_version {
            return Err(StoreError::ConcurrencyConflict {
                order_id,
                expected: transition.expected_version,
                actual,
            });
        }
        if let Some(update) = &transition.attempt {
            state.check_attempt(update)?;
        }

        state.settle(&transition.ledger_ops)?;
        state.events.extend(envelopes);

        let version = transition.order.version();
        if let Some(update) = transition.attempt {
            state.attempts.insert(update.attempt.id, update.attempt);
        }
        state.orders.insert(order_id, transition.order);
        Ok(version)
    }

    async fn order_events(&self, order_id: OrderId) -> Result<Vec<EventEnvelope>> {
        let state = self.state.read().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn pending_orders_placed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderId>> {
        let state = self.state.read().await;
        let mut expired: Vec<(DateTime<Utc>, OrderId)> = state
            .orders
            .iter()
            .filter(|(_, order)| order.is_hold_expired(cutoff))
            .filter_map(|(id, order)| order.created_at().map(|at| (at, *id)))
            .collect();
        expired.sort_by_key(|(at, _)| *at);
        Ok(expired.into_iter().map(|(_, id)| id).collect())
    }

    async fn insert_attempt(&self, attempt: &PaymentAttempt) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.orders.contains_key(&attempt.order_id) {
            return Err(StoreError::OrderNotFound(attempt.order_id));
        }
        let duplicate = state.attempts.values().any(|a| {
            a.gateway_order_id == attempt.gateway_order_id
                || (a.order_id == attempt.order_id && a.attempt_number == attempt.attempt_number)
        });
        if duplicate {
            return Err(StoreError::AttemptConflict(attempt.id));
        }
        state.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn settle_attempt(&self, update: AttemptUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_attempt(&update)?;
        state.attempts.insert(update.attempt.id, update.attempt);
        Ok(())
    }

    async fn load_attempt(&self, attempt_id: AttemptId) -> Result<Option<PaymentAttempt>> {
        Ok(self.state.read().await.attempts.get(&attempt_id).cloned())
    }

    async fn find_attempt_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<PaymentAttempt>> {
        let state = self.state.read().await;
        Ok(state
            .attempts
            .values()
            .find(|a| a.gateway_order_id == gateway_order_id)
            .cloned())
    }

    async fn attempts_for_order(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        let state = self.state.read().await;
        let mut attempts: Vec<_> = state
            .attempts
            .values()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }
}
