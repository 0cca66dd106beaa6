//! Per-(product, variant) stock counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::InventoryError;
use crate::value_objects::StockKey;

/// Stock counters for one product variant.
///
/// Invariant: `reserved_quantity <= quantity`. Only [`reserve`](Self::reserve),
/// [`release`](Self::release) and [`confirm`](Self::confirm) mutate the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub key: StockKey,
    /// On-hand units.
    quantity: u32,
    /// Units held against unconfirmed orders.
    reserved_quantity: u32,
    pub low_stock_threshold: u32,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Creates a record with nothing reserved.
    pub fn new(key: StockKey, quantity: u32, low_stock_threshold: u32) -> Self {
        Self {
            key,
            quantity,
            reserved_quantity: 0,
            low_stock_threshold,
            updated_at: Utc::now(),
        }
    }

    /// Rebuilds a record from persisted counters, clamping `reserved` into range.
    pub fn from_parts(
        key: StockKey,
        quantity: u32,
        reserved_quantity: u32,
        low_stock_threshold: u32,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            quantity,
            reserved_quantity: reserved_quantity.min(quantity),
            low_stock_threshold,
            updated_at,
        }
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn reserved_quantity(&self) -> u32 {
        self.reserved_quantity
    }

    /// Units a buyer can still reserve. This is the only number shown to buyers.
    pub fn available(&self) -> u32 {
        self.quantity - self.reserved_quantity
    }

    /// Returns true if available stock is at or below the low-stock threshold.
    pub fn is_low_stock(&self) -> bool {
        self.available() <= self.low_stock_threshold
    }

    /// Holds `qty` units.
    ///
    /// Fails without mutating anything if fewer than `qty` units are available.
    pub fn reserve(&mut self, qty: u32) -> Result<(), InventoryError> {
        if qty == 0 {
            return Err(InventoryError::InvalidQuantity { quantity: qty });
        }
        if self.available() < qty {
            return Err(InventoryError::InsufficientStock {
                key: self.key.clone(),
                requested: qty,
                available: self.available(),
            });
        }
        self.reserved_quantity += qty;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Drops a hold of `qty` units, clamped at zero.
    ///
    /// Not deduplicated: callers must release a given order line at most once.
    pub fn release(&mut self, qty: u32) {
        self.reserved_quantity = self.reserved_quantity.saturating_sub(qty);
        self.updated_at = Utc::now();
    }

    /// Turns a hold of `qty` units into a sale, decrementing both counters.
    ///
    /// Same at-most-once caveat as [`release`](Self::release).
    pub fn confirm(&mut self, qty: u32) {
        let qty = qty.min(self.reserved_quantity);
        self.reserved_quantity -= qty;
        self.quantity -= qty;
        self.updated_at = Utc::now();
    }

    /// Replaces the on-hand count (catalog restock), keeping existing holds.
    pub fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity.max(self.reserved_quantity);
        self.updated_at = Utc::now();
    }
}

/// A single ledger mutation against one inventory row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerOp {
    Reserve { key: StockKey, quantity: u32 },
    Release { key: StockKey, quantity: u32 },
    Confirm { key: StockKey, quantity: u32 },
}

impl LedgerOp {
    pub fn key(&self) -> &StockKey {
        match self {
            LedgerOp::Reserve { key, .. }
            | LedgerOp::Release { key, .. }
            | LedgerOp::Confirm { key, .. } => key,
        }
    }

    pub fn quantity(&self) -> u32 {
        match self {
            LedgerOp::Reserve { quantity, .. }
            | LedgerOp::Release { quantity, .. }
            | LedgerOp::Confirm { quantity, .. } => *quantity,
        }
    }

    /// Applies the operation to a record.
    pub fn apply_to(&self, record: &mut InventoryRecord) -> Result<(), InventoryError> {
        match self {
            LedgerOp::Reserve { quantity, .. } => record.reserve(*quantity),
            LedgerOp::Release { quantity, .. } => {
                record.release(*quantity);
                Ok(())
            }
            LedgerOp::Confirm { quantity, .. } => {
                record.confirm(*quantity);
                Ok(())
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOp::Reserve { .. } => "reserve",
            LedgerOp::Release { .. } => "release",
            LedgerOp::Confirm { .. } => "confirm",
        }
    }
}

/// One order line that could not be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortage {
    pub key: StockKey,
    pub requested: u32,
    pub available: u32,
}
