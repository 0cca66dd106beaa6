//! Order line snapshots and the human-facing order number.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Money, ProductId, StockKey, VariantId};

/// An immutable snapshot of one purchased line.
///
/// Product name and image are copied at purchase time so later catalog
/// edits don't rewrite order history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub product_name: String,
    pub image_url: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl OrderLineItem {
    pub fn new(
        key: StockKey,
        product_name: impl Into<String>,
        image_url: Option<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: key.product_id,
            variant_id: key.variant_id,
            product_name: product_name.into(),
            image_url,
            quantity,
            unit_price,
            line_total: unit_price.multiply(quantity),
        }
    }

    /// The inventory row this line draws from.
    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }
}

/// Human-displayable order number, e.g. `ORD-20250101-1A2B3C4D`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Derives the number from the placement date and the order ID.
    pub fn generate(order_id: OrderId, placed_at: DateTime<Utc>) -> Self {
        let simple = order_id.as_uuid().simple().to_string();
        Self(format!(
            "ORD-{}-{}",
            placed_at.format("%Y%m%d"),
            simple[..8].to_uppercase()
        ))
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
