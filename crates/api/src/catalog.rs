//! Catalog and starting stock for the server binary.
//!
//! Catalog management lives outside the checkout core; the server reads a
//! JSON snapshot of it at startup.

use checkout::{CatalogItem, InMemoryCatalog};
use domain::{DiscountCode, InventoryRecord, Money, StockKey};
use serde::Deserialize;
use store::{CheckoutStore, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Stock on hand for one product or variant.
#[derive(Debug, Clone, Deserialize)]
pub struct StockEntry {
    #[serde(flatten)]
    pub key: StockKey,
    pub quantity: u32,
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: u32,
}

fn default_low_stock_threshold() -> u32 {
    5
}

/// Contents of a `CATALOG_PATH` file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub items: Vec<CatalogItem>,
    #[serde(default)]
    pub discounts: Vec<DiscountCode>,
    #[serde(default)]
    pub stock: Vec<StockEntry>,
}

impl CatalogFile {
    pub fn load(path: &str) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// A small catalog for local runs against the sandbox gateway.
    pub fn demo() -> Self {
        let mug = StockKey::product("MUG-STONE");
        let tee_m = StockKey::variant("TEE-ORGANIC", "M");
        let tee_l = StockKey::variant("TEE-ORGANIC", "L");

        Self {
            items: vec![
                CatalogItem::new(mug.clone(), "Stoneware Mug", Money::from_minor(34_900)),
                CatalogItem::new(tee_m.clone(), "Organic Tee (M)", Money::from_minor(79_900)),
                CatalogItem::new(tee_l.clone(), "Organic Tee (L)", Money::from_minor(79_900)),
            ],
            discounts: vec![{
                let mut code = DiscountCode::percentage("WELCOME10", 10);
                code.minimum_amount = Money::from_minor(50_000);
                code.maximum_discount = Some(Money::from_minor(20_000));
                code
            }],
            stock: vec![
                StockEntry {
                    key: mug,
                    quantity: 25,
                    low_stock_threshold: 5,
                },
                StockEntry {
                    key: tee_m,
                    quantity: 10,
                    low_stock_threshold: 3,
                },
                StockEntry {
                    key: tee_l,
                    quantity: 1,
                    low_stock_threshold: 3,
                },
            ],
        }
    }

    pub fn catalog(&self) -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        for item in &self.items {
            catalog.add_item(item.clone());
        }
        for discount in &self.discounts {
            catalog.add_discount(discount.clone());
        }
        catalog
    }

    /// Writes starting stock for every entry the store does not know yet.
    pub async fn seed_stock<S: CheckoutStore>(&self, store: &S) -> Result<usize, StoreError> {
        let mut seeded = 0;
        for entry in &self.stock {
            if store.inventory(&entry.key).await?.is_some() {
                continue;
            }
            store
                .upsert_inventory(InventoryRecord::new(
                    entry.key.clone(),
                    entry.quantity,
                    entry.low_stock_threshold,
                ))
                .await?;
            seeded += 1;
        }
        Ok(seeded)
    }
}
