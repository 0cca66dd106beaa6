//! Payment Handoff: opens a gateway session for a pending order.

use std::sync::Arc;

use common::OrderId;
use domain::{Aggregate, CompensationReason, OrderStatus, PaymentAttempt};
use store::CheckoutStore;

use crate::error::{CheckoutError, Result};
use crate::lifecycle::OrderLifecycle;
use crate::services::{Contact, PaymentGateway, SessionRequest};

/// Hands a pending order over to the payment gateway.
///
/// Has no inventory effect: the reservation made at order creation keeps
/// holding the stock while the buyer pays.
pub struct PaymentHandoff<S> {
    lifecycle: Arc<OrderLifecycle<S>>,
    gateway: Arc<dyn PaymentGateway>,
}

impl<S: CheckoutStore> PaymentHandoff<S> {
    pub fn new(lifecycle: Arc<OrderLifecycle<S>>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { lifecycle, gateway }
    }

    /// Opens a gateway session and records it as a new pending attempt.
    ///
    /// A gateway failure or timeout leaves the order and its reservation
    /// untouched; the caller may retry.
    #[tracing::instrument(skip(self, contact))]
    pub async fn initiate(&self, order_id: OrderId, contact: Contact) -> Result<PaymentAttempt> {
        let config = self.lifecycle.config();
        let order = self.lifecycle.get_order(order_id).await?;

        if order.status() != OrderStatus::Pending {
            return Err(CheckoutError::ConsistencyViolation(format!(
                "order is {}, payment can only start while pending",
                order.status()
            )));
        }

        if order.is_hold_expired(config.hold_cutoff(self.lifecycle.now())) {
            tracing::info!("reservation hold elapsed before payment");
            self.lifecycle
                .compensate(order_id, CompensationReason::Expired)
                .await?;
            return Err(CheckoutError::ReservationExpired(order_id));
        }

        let attempts = self.lifecycle.payment_attempts(order_id).await?;
        let max = config.max_payment_attempts;
        if attempts.len() >= max as usize {
            metrics::counter!("payment_sessions_total", "outcome" => "exhausted").increment(1);
            return Err(CheckoutError::AttemptsExhausted { order_id, max });
        }

        let receipt = order
            .number()
            .map(|number| number.as_str().to_string())
            .unwrap_or_else(|| order_id.to_string());
        let request = SessionRequest {
            amount: order.total(),
            currency: order.currency().to_string(),
            receipt,
            contact,
        };

        let session =
            match tokio::time::timeout(config.gateway_timeout, self.gateway.create_session(request))
                .await
            {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => {
                    metrics::counter!("payment_sessions_total", "outcome" => "error").increment(1);
                    tracing::warn!(error = %e, "gateway refused session");
                    return Err(CheckoutError::GatewayUnavailable(e.to_string()));
                }
                Err(_) => {
                    metrics::counter!("payment_sessions_total", "outcome" => "timeout")
                        .increment(1);
                    tracing::warn!(timeout = ?config.gateway_timeout, "gateway session timed out");
                    return Err(CheckoutError::GatewayUnavailable(format!(
                        "no response within {:?}",
                        config.gateway_timeout
                    )));
                }
            };

        let attempt = PaymentAttempt::new(
            order_id,
            attempts.len() as u32 + 1,
            session.gateway_order_id,
            order.total(),
            order.currency(),
            self.lifecycle.now(),
        );
        self.lifecycle.store().insert_attempt(&attempt).await?;

        metrics::counter!("payment_sessions_total", "outcome" => "opened").increment(1);
        tracing::info!(
            attempt_id = %attempt.id,
            attempt_number = attempt.attempt_number,
            gateway_order_id = %attempt.gateway_order_id,
            version = %order.version(),
            "payment session opened"
        );
        Ok(attempt)
    }
}
