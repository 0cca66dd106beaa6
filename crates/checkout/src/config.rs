//! Checkout policy knobs.

use chrono::{DateTime, Duration, Utc};
use domain::PricingPolicy;

/// Settings shared by the lifecycle manager, the payment handoff and the
/// reconciler.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// ISO currency code charged for every order.
    pub currency: String,
    /// How long a pending order may hold its stock.
    pub reservation_hold: Duration,
    /// Payment sessions allowed per order.
    pub max_payment_attempts: u32,
    /// Upper bound on a single gateway call.
    pub gateway_timeout: std::time::Duration,
    pub pricing: PricingPolicy,
}

impl CheckoutConfig {
    /// Orders placed at or before the returned instant have outlived their hold.
    pub fn hold_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.reservation_hold
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            reservation_hold: Duration::minutes(30),
            max_payment_attempts: 3,
            gateway_timeout: std::time::Duration::from_secs(10),
            pricing: PricingPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = CheckoutConfig::default();
        assert_eq!(config.currency, "INR");
        assert_eq!(config.reservation_hold, Duration::minutes(30));
        assert_eq!(config.max_payment_attempts, 3);
    }

    #[test]
    fn test_hold_cutoff() {
        let config = CheckoutConfig::default();
        let now = Utc::now();
        assert_eq!(config.hold_cutoff(now), now - Duration::minutes(30));
    }
}
