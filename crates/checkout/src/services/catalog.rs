//! Catalog collaborator trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::{DiscountCode, Money, StockKey};
use serde::{Deserialize, Serialize};

use crate::error::CheckoutError;

/// Current catalog data for one sellable product or variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub key: StockKey,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub unit_price: Money,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl CatalogItem {
    pub fn new(key: StockKey, name: impl Into<String>, unit_price: Money) -> Self {
        Self {
            key,
            name: name.into(),
            image_url: None,
            unit_price,
            active: true,
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

/// Read-only lookups of prices and discount terms.
///
/// Only the order total calculation consults the catalog; the prices it
/// returns are the only ones ever charged.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the current catalog entry for a product or variant.
    async fn item(&self, key: &StockKey) -> Result<Option<CatalogItem>, CheckoutError>;

    /// Returns the terms of a discount code, matched case-insensitively.
    async fn discount(&self, code: &str) -> Result<Option<DiscountCode>, CheckoutError>;
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    items: HashMap<StockKey, CatalogItem>,
    discounts: HashMap<String, DiscountCode>,
}

/// In-memory catalog for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self, item: CatalogItem) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.items.insert(item.key.clone(), item);
    }

    pub fn add_discount(&self, discount: DiscountCode) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .discounts
            .insert(discount.code.to_uppercase(), discount);
    }

    pub fn item_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn item(&self, key: &StockKey) -> Result<Option<CatalogItem>, CheckoutError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.items.get(key).cloned())
    }

    async fn discount(&self, code: &str) -> Result<Option<DiscountCode>, CheckoutError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.discounts.get(&code.trim().to_uppercase()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_item_lookup_by_variant() {
        let catalog = InMemoryCatalog::new();
        catalog.add_item(CatalogItem::new(
            StockKey::variant("TEE", "L"),
            "Tee (L)",
            Money::from_minor(59_900),
        ));

        let found = catalog.item(&StockKey::variant("TEE", "L")).await.unwrap();
        assert_eq!(found.unwrap().unit_price, Money::from_minor(59_900));

        let other = catalog.item(&StockKey::variant("TEE", "M")).await.unwrap();
        assert!(other.is_none());
        assert_eq!(catalog.item_count(), 1);
    }

    #[tokio::test]
    async fn test_discount_lookup_ignores_case() {
        let catalog = InMemoryCatalog::new();
        catalog.add_discount(DiscountCode::percentage("Welcome10", 10));

        assert!(catalog.discount("WELCOME10").await.unwrap().is_some());
        assert!(catalog.discount(" welcome10 ").await.unwrap().is_some());
        assert!(catalog.discount("NOPE").await.unwrap().is_none());
    }
}
