//! Discount code terms, as published by the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::Money;

/// How a discount's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// `value` is a whole percentage of the subtotal.
    Percentage,
    /// `value` is an amount in minor units.
    Fixed,
}

/// Discount code terms. Read-only to the checkout core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountCode {
    pub code: String,
    pub kind: DiscountKind,
    pub value: i64,
    #[serde(default)]
    pub minimum_amount: Money,
    #[serde(default)]
    pub maximum_discount: Option<Money>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub used_count: u32,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Why a discount code was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountRejection {
    Unknown,
    Inactive,
    NotYetValid,
    Expired,
    UsageLimitReached,
    BelowMinimum,
}

impl DiscountRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountRejection::Unknown => "unknown",
            DiscountRejection::Inactive => "inactive",
            DiscountRejection::NotYetValid => "not_yet_valid",
            DiscountRejection::Expired => "expired",
            DiscountRejection::UsageLimitReached => "usage_limit_reached",
            DiscountRejection::BelowMinimum => "below_minimum",
        }
    }
}

impl std::fmt::Display for DiscountRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl DiscountCode {
    /// Creates an active, unrestricted percentage code.
    pub fn percentage(code: impl Into<String>, percent: i64) -> Self {
        Self::unrestricted(code, DiscountKind::Percentage, percent)
    }

    /// Creates an active, unrestricted fixed-amount code.
    pub fn fixed(code: impl Into<String>, amount: Money) -> Self {
        Self::unrestricted(code, DiscountKind::Fixed, amount.minor())
    }

    fn unrestricted(code: impl Into<String>, kind: DiscountKind, value: i64) -> Self {
        Self {
            code: code.into(),
            kind,
            value,
            minimum_amount: Money::zero(),
            maximum_discount: None,
            usage_limit: None,
            used_count: 0,
            valid_from: None,
            valid_until: None,
            active: true,
        }
    }

    /// Evaluates the discount against a subtotal at instant `now`.
    ///
    /// The result is capped by `maximum_discount` and never exceeds the subtotal.
    pub fn evaluate(&self, subtotal: Money, now: DateTime<Utc>) -> Result<Money, DiscountRejection> {
        if !self.active {
            return Err(DiscountRejection::Inactive);
        }
        if self.valid_from.is_some_and(|from| now < from) {
            return Err(DiscountRejection::NotYetValid);
        }
        if self.valid_until.is_some_and(|until| now > until) {
            return Err(DiscountRejection::Expired);
        }
        if self.usage_limit.is_some_and(|limit| self.used_count >= limit) {
            return Err(DiscountRejection::UsageLimitReached);
        }
        if subtotal < self.minimum_amount {
            return Err(DiscountRejection::BelowMinimum);
        }

        let raw = match self.kind {
            DiscountKind::Percentage => {
                let bps = u32::try_from(self.value.clamp(0, 100) * 100).unwrap_or(0);
                subtotal.apply_bps(bps)
            }
            DiscountKind::Fixed => Money::from_minor(self.value.max(0)),
        };

        let capped = match self.maximum_discount {
            Some(max) => raw.min(max),
            None => raw,
        };
        Ok(capped.min(subtotal))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_percentage_discount() {
        let code = DiscountCode::percentage("SAVE10", 10);
        let amount = code.evaluate(Money::from_minor(50_000), Utc::now()).unwrap();
        assert_eq!(amount.minor(), 5_000);
    }

    #[test]
    fn test_percentage_discount_is_capped() {
        let mut code = DiscountCode::percentage("SAVE50", 50);
        code.maximum_discount = Some(Money::from_minor(10_000));
        let amount = code.evaluate(Money::from_minor(50_000), Utc::now()).unwrap();
        assert_eq!(amount.minor(), 10_000);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_subtotal() {
        let code = DiscountCode::fixed("FLAT500", Money::from_minor(50_000));
        let amount = code.evaluate(Money::from_minor(20_000), Utc::now()).unwrap();
        assert_eq!(amount.minor(), 20_000);
    }

    #[test]
    fn test_below_minimum_is_rejected() {
        let mut code = DiscountCode::fixed("BIG", Money::from_minor(1_000));
        code.minimum_amount = Money::from_minor(100_000);
        assert_eq!(
            code.evaluate(Money::from_minor(99_999), Utc::now()),
            Err(DiscountRejection::BelowMinimum)
        );
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let mut code = DiscountCode::percentage("WINDOW", 5);

        code.valid_from = Some(now + Duration::hours(1));
        assert_eq!(
            code.evaluate(Money::from_minor(1_000), now),
            Err(DiscountRejection::NotYetValid)
        );

        code.valid_from = None;
        code.valid_until = Some(now - Duration::hours(1));
        assert_eq!(
            code.evaluate(Money::from_minor(1_000), now),
            Err(DiscountRejection::Expired)
        );
    }

    #[test]
    fn test_usage_limit_and_inactive() {
        let mut code = DiscountCode::percentage("ONCE", 5);
        code.usage_limit = Some(1);
        code.used_count = 1;
        assert_eq!(
            code.evaluate(Money::from_minor(1_000), Utc::now()),
            Err(DiscountRejection::UsageLimitReached)
        );

        let mut code = DiscountCode::percentage("OFF", 5);
        code.active = false;
        assert_eq!(
            code.evaluate(Money::from_minor(1_000), Utc::now()),
            Err(DiscountRejection::Inactive)
        );
    }
}
