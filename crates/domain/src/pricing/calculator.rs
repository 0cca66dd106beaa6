//! Totals computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DiscountCode, DiscountRejection, PricingError};
use crate::value_objects::{Money, StockKey};

/// Shipping and tax rules applied by [`calculate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// Subtotals at or above this ship free.
    pub free_shipping_threshold: Money,
    /// Shipping charged below the threshold.
    pub flat_shipping_fee: Money,
    /// Tax rate in basis points, applied to the discounted subtotal.
    pub tax_rate_bps: u32,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            free_shipping_threshold: Money::from_minor(99_900),
            flat_shipping_fee: Money::from_minor(4_900),
            tax_rate_bps: 0,
        }
    }
}

/// A line to price: catalog unit price times quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLine {
    pub key: StockKey,
    pub unit_price: Money,
    pub quantity: u32,
}

impl PriceLine {
    pub fn new(key: StockKey, unit_price: Money, quantity: u32) -> Self {
        Self {
            key,
            unit_price,
            quantity,
        }
    }

    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }

    fn checked_line_total(&self) -> Result<Money, PricingError> {
        self.unit_price
            .checked_multiply(self.quantity)
            .ok_or_else(|| PricingError::AmountOverflow {
                key: self.key.clone(),
            })
    }
}

/// The discount code a caller asked for, after catalog lookup.
#[derive(Debug, Clone, Copy)]
pub enum DiscountInput<'a> {
    None,
    /// The caller supplied a code the catalog doesn't know.
    NotFound(&'a str),
    Found(&'a DiscountCode),
}

/// What happened to the requested discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscountOutcome {
    NotRequested,
    Applied {
        code: String,
        amount: Money,
    },
    Rejected {
        code: String,
        reason: DiscountRejection,
    },
}

impl DiscountOutcome {
    /// Returns the code if it was applied.
    pub fn applied_code(&self) -> Option<&str> {
        match self {
            DiscountOutcome::Applied { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, DiscountOutcome::Rejected { .. })
    }
}

/// Computed order totals, all in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total: Money,
}

/// Result of [`calculate`]: totals plus the fate of the discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub totals: OrderTotals,
    pub discount: DiscountOutcome,
}

/// Computes order totals.
///
/// Deterministic and side-effect free. A rejected discount code is reported
/// in [`Quote::discount`] and contributes nothing to the totals.
pub fn calculate(
    lines: &[PriceLine],
    discount: DiscountInput<'_>,
    shipping_override: Option<Money>,
    policy: &PricingPolicy,
    now: DateTime<Utc>,
) -> Result<Quote, PricingError> {
    if lines.is_empty() {
        return Err(PricingError::EmptyCart);
    }
    for line in lines {
        if line.quantity == 0 {
            return Err(PricingError::InvalidQuantity {
                key: line.key.clone(),
            });
        }
        if !line.unit_price.is_positive() {
            return Err(PricingError::InvalidPrice {
                key: line.key.clone(),
                price: line.unit_price.minor(),
            });
        }
    }

    let mut subtotal = Money::zero();
    for line in lines {
        subtotal = line
            .checked_line_total()
            .and_then(|total| {
                subtotal
                    .checked_add(total)
                    .ok_or_else(|| PricingError::AmountOverflow {
                        key: line.key.clone(),
                    })
            })?;
    }

    let (discount_amount, outcome) = match discount {
        DiscountInput::None => (Money::zero(), DiscountOutcome::NotRequested),
        DiscountInput::NotFound(code) => (
            Money::zero(),
            DiscountOutcome::Rejected {
                code: code.to_string(),
                reason: DiscountRejection::Unknown,
            },
        ),
        DiscountInput::Found(code) => match code.evaluate(subtotal, now) {
            Ok(amount) => (
                amount,
                DiscountOutcome::Applied {
                    code: code.code.clone(),
                    amount,
                },
            ),
            Err(reason) => (
                Money::zero(),
                DiscountOutcome::Rejected {
                    code: code.code.clone(),
                    reason,
                },
            ),
        },
    };

    let shipping = shipping_override.unwrap_or(if subtotal >= policy.free_shipping_threshold {
        Money::zero()
    } else {
        policy.flat_shipping_fee
    });

    let tax = (subtotal - discount_amount)
        .floor_at_zero()
        .apply_bps(policy.tax_rate_bps);

    let total = subtotal
        .checked_add(tax)
        .and_then(|sum| sum.checked_add(shipping))
        .ok_or_else(|| PricingError::AmountOverflow {
            key: lines[lines.len() - 1].key.clone(),
        })?;
    let total = (total - discount_amount).floor_at_zero();

    Ok(Quote {
        totals: OrderTotals {
            subtotal,
            discount: discount_amount,
            tax,
            shipping,
            total,
        },
        discount: outcome,
    })
}
