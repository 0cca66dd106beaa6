//! Routing of gateway results to Commit or Compensate.

use std::sync::Arc;

use domain::{Aggregate, CompensationReason, Order, OrderStatus, PaymentAttempt, PaymentStatus};
use serde::Deserialize;
use store::{AttemptUpdate, CheckoutStore};

use crate::error::{CheckoutError, Result};
use crate::lifecycle::OrderLifecycle;
use crate::verifier::{PaymentVerifier, RejectionReason};

/// A result reported by the payment gateway for one session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayCallback {
    /// The buyer paid. Must pass signature verification before it counts.
    Authorized {
        gateway_order_id: String,
        gateway_payment_id: String,
        signature: String,
    },
    /// The gateway declined the payment.
    Failed {
        gateway_order_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    /// The buyer abandoned the gateway checkout.
    Cancelled { gateway_order_id: String },
}

impl GatewayCallback {
    pub fn gateway_order_id(&self) -> &str {
        match self {
            GatewayCallback::Authorized {
                gateway_order_id, ..
            }
            | GatewayCallback::Failed {
                gateway_order_id, ..
            }
            | GatewayCallback::Cancelled { gateway_order_id } => gateway_order_id,
        }
    }
}

/// What a callback did to its order.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// Payment verified and the reservation converted into a sale.
    Confirmed(Order),
    /// The same verified payment was already applied; nothing changed.
    AlreadyConfirmed(Order),
    /// The attempt failed; the order keeps its reservation for another try.
    RetryAllowed {
        order: Order,
        attempts_remaining: u32,
    },
    /// The attempt failed and no new one may start, but an earlier attempt
    /// is still open and may yet succeed.
    AwaitingPayment(Order),
    /// The reservation was released and the order cancelled.
    Compensated(Order),
}

impl CallbackOutcome {
    pub fn order(&self) -> &Order {
        match self {
            CallbackOutcome::Confirmed(order)
            | CallbackOutcome::AlreadyConfirmed(order)
            | CallbackOutcome::RetryAllowed { order, .. }
            | CallbackOutcome::AwaitingPayment(order)
            | CallbackOutcome::Compensated(order) => order,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Confirmed(_) => "confirmed",
            CallbackOutcome::AlreadyConfirmed(_) => "already_confirmed",
            CallbackOutcome::RetryAllowed { .. } => "retry_allowed",
            CallbackOutcome::AwaitingPayment(_) => "awaiting_payment",
            CallbackOutcome::Compensated(_) => "compensated",
        }
    }

    /// Returns the order if it is paid, otherwise the buyer-facing failure.
    pub fn into_confirmed(self) -> Result<Order> {
        match self {
            CallbackOutcome::Confirmed(order) | CallbackOutcome::AlreadyConfirmed(order) => {
                Ok(order)
            }
            CallbackOutcome::RetryAllowed {
                attempts_remaining, ..
            } => Err(CheckoutError::PaymentFailed(format!(
                "payment was declined, {attempts_remaining} attempt(s) remaining"
            ))),
            CallbackOutcome::AwaitingPayment(_) => Err(CheckoutError::PaymentFailed(
                "payment was declined, an earlier payment is still in progress".to_string(),
            )),
            CallbackOutcome::Compensated(order) => match order.cancellation_reason() {
                Some("cancelled") => Err(CheckoutError::PaymentCancelled),
                Some("expired") => match order.id() {
                    Some(order_id) => Err(CheckoutError::ReservationExpired(order_id)),
                    None => Err(CheckoutError::PaymentFailed("expired".to_string())),
                },
                reason => Err(CheckoutError::PaymentFailed(
                    reason.unwrap_or("payment_failed").to_string(),
                )),
            },
        }
    }
}

/// Verifies gateway results and drives the order accordingly.
///
/// Only an `Authorized` result that passes [`PaymentVerifier`] can reach
/// [`OrderLifecycle::commit`]. Declines and cancellations carry no signature
/// and only ever lead to compensation.
pub struct CallbackProcessor<S> {
    lifecycle: Arc<OrderLifecycle<S>>,
    verifier: PaymentVerifier,
}

impl<S: CheckoutStore> CallbackProcessor<S> {
    pub fn new(lifecycle: Arc<OrderLifecycle<S>>, verifier: PaymentVerifier) -> Self {
        Self {
            lifecycle,
            verifier,
        }
    }

    pub fn verifier(&self) -> &PaymentVerifier {
        &self.verifier
    }

    #[tracing::instrument(skip(self, callback), fields(gateway_order_id = %callback.gateway_order_id()))]
    pub async fn handle(&self, callback: GatewayCallback) -> Result<CallbackOutcome> {
        let result = match callback {
            GatewayCallback::Authorized {
                gateway_order_id,
                gateway_payment_id,
                signature,
            } => {
                self.authorized(&gateway_order_id, &gateway_payment_id, &signature)
                    .await
            }
            GatewayCallback::Failed {
                gateway_order_id,
                reason,
            } => {
                let reason = reason.unwrap_or_else(|| "payment_failed".to_string());
                self.failed(&gateway_order_id, &reason).await
            }
            GatewayCallback::Cancelled { gateway_order_id } => {
                self.cancelled(&gateway_order_id).await
            }
        };

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(CheckoutError::VerificationFailed(_)) => "rejected",
            Err(_) => "error",
        };
        metrics::counter!("payment_verifications_total", "outcome" => outcome).increment(1);
        result
    }

    async fn authorized(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<CallbackOutcome> {
        let Some(attempt) = self.find_attempt(gateway_order_id).await? else {
            return Err(reject(gateway_order_id, RejectionReason::UnknownAttempt));
        };

        if attempt.is_paid()
            && attempt.gateway_payment_id.as_deref() == Some(gateway_payment_id)
            && self
                .verifier
                .signature_matches(gateway_order_id, gateway_payment_id, signature)
        {
            let order = self.lifecycle.get_order(attempt.order_id).await?;
            if order.paid_attempt() == Some(attempt.id) {
                tracing::warn!(
                    security = true,
                    attempt_id = %attempt.id,
                    "verified payment replayed"
                );
                return Ok(CallbackOutcome::AlreadyConfirmed(order));
            }
        }

        let payment = self
            .verifier
            .authorize(
                &attempt,
                gateway_payment_id,
                signature,
                self.lifecycle.now(),
            )
            .map_err(|reason| reject(gateway_order_id, reason))?;

        match self.lifecycle.commit(payment).await {
            Ok(order) => Ok(CallbackOutcome::Confirmed(order)),
            Err(e @ CheckoutError::ConsistencyViolation(_)) => {
                tracing::error!(
                    attempt_id = %attempt.id,
                    gateway_payment_id,
                    "verified payment arrived for an order that can no longer be confirmed; refund required"
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn failed(&self, gateway_order_id: &str, reason: &str) -> Result<CallbackOutcome> {
        let attempt = self.require_attempt(gateway_order_id).await?;
        let order_id = attempt.order_id;
        let max = self.lifecycle.config().max_payment_attempts;

        let Some(update) = self.fail_attempt(attempt, reason)? else {
            return self.settled_outcome(order_id).await;
        };

        let attempts = self.lifecycle.payment_attempts(order_id).await?;
        let failed = failed_count(&attempts) + 1;

        tracing::info!(reason, failed, max, "payment attempt failed");
        if failed >= max {
            return self
                .compensate(order_id, CompensationReason::PaymentFailed, update)
                .await;
        }

        self.lifecycle.store().settle_attempt(update).await?;

        // Another decline may have settled between the count and the write.
        let attempts = self.lifecycle.payment_attempts(order_id).await?;
        if failed_count(&attempts) >= max {
            tracing::info!(max, "payment attempts exhausted by a concurrent decline");
            return self.compensate_exhausted(order_id).await;
        }

        let order = self.lifecycle.get_order(order_id).await?;
        Ok(pending_outcome(order, &attempts, max))
    }

    async fn cancelled(&self, gateway_order_id: &str) -> Result<CallbackOutcome> {
        let attempt = self.require_attempt(gateway_order_id).await?;
        let order_id = attempt.order_id;

        let Some(update) = self.fail_attempt(attempt, "cancelled")? else {
            return self.settled_outcome(order_id).await;
        };
        tracing::info!("payment cancelled by buyer");
        self.compensate(order_id, CompensationReason::PaymentCancelled, update)
            .await
    }

    /// Compensates with the failed attempt written in the same transition.
    ///
    /// If the order has already left `pending` the attempt is settled on its
    /// own and the order is reported as it stands.
    async fn compensate(
        &self,
        order_id: common::OrderId,
        reason: CompensationReason,
        update: AttemptUpdate,
    ) -> Result<CallbackOutcome> {
        let order = self.lifecycle.get_order(order_id).await?;
        if order.status() != OrderStatus::Pending {
            self.lifecycle.store().settle_attempt(update).await?;
            return Ok(outcome_for(order));
        }

        let (order, changed) = self
            .lifecycle
            .compensate_with(order_id, reason, Some(update.clone()))
            .await?;
        if !changed {
            self.lifecycle.store().settle_attempt(update).await?;
        }
        Ok(outcome_for(order))
    }

    /// Cancels an order whose attempts all failed, with every attempt
    /// already settled.
    async fn compensate_exhausted(&self, order_id: common::OrderId) -> Result<CallbackOutcome> {
        let order = self.lifecycle.get_order(order_id).await?;
        if order.status() != OrderStatus::Pending {
            return Ok(outcome_for(order));
        }

        match self
            .lifecycle
            .compensate_with(order_id, CompensationReason::PaymentFailed, None)
            .await
        {
            Ok((order, _)) => Ok(outcome_for(order)),
            Err(CheckoutError::ConsistencyViolation(_)) => {
                Ok(outcome_for(self.lifecycle.get_order(order_id).await?))
            }
            Err(e) => Err(e),
        }
    }

    /// Marks a pending attempt failed. None if it was already settled.
    fn fail_attempt(
        &self,
        mut attempt: PaymentAttempt,
        reason: &str,
    ) -> Result<Option<AttemptUpdate>> {
        if !attempt.is_pending() {
            tracing::debug!(attempt_id = %attempt.id, status = %attempt.status, "attempt already settled");
            return Ok(None);
        }
        attempt
            .mark_failed(reason, self.lifecycle.now())
            .map_err(|e| CheckoutError::Domain(e.into()))?;
        Ok(Some(AttemptUpdate::new(attempt, PaymentStatus::Pending)))
    }

    async fn settled_outcome(&self, order_id: common::OrderId) -> Result<CallbackOutcome> {
        let order = self.lifecycle.get_order(order_id).await?;
        if order.status() == OrderStatus::Pending {
            let attempts = self.lifecycle.payment_attempts(order_id).await?;
            let max = self.lifecycle.config().max_payment_attempts;
            return Ok(pending_outcome(order, &attempts, max));
        }
        Ok(outcome_for(order))
    }

    async fn find_attempt(&self, gateway_order_id: &str) -> Result<Option<PaymentAttempt>> {
        Ok(self
            .lifecycle
            .store()
            .find_attempt_by_gateway_order_id(gateway_order_id)
            .await?)
    }

    async fn require_attempt(&self, gateway_order_id: &str) -> Result<PaymentAttempt> {
        self.find_attempt(gateway_order_id)
            .await?
            .ok_or_else(|| CheckoutError::AttemptNotFound(gateway_order_id.to_string()))
    }
}

fn failed_count(attempts: &[PaymentAttempt]) -> u32 {
    attempts
        .iter()
        .filter(|a| a.status == PaymentStatus::Failed)
        .count() as u32
}

/// Outcome for a still-pending order after one of its attempts failed.
fn pending_outcome(order: Order, attempts: &[PaymentAttempt], max: u32) -> CallbackOutcome {
    if order.status() != OrderStatus::Pending {
        return outcome_for(order);
    }
    match max.saturating_sub(attempts.len() as u32) {
        0 => CallbackOutcome::AwaitingPayment(order),
        attempts_remaining => CallbackOutcome::RetryAllowed {
            order,
            attempts_remaining,
        },
    }
}

fn outcome_for(order: Order) -> CallbackOutcome {
    match order.status() {
        OrderStatus::Cancelled if order.payment_status() == PaymentStatus::Failed => {
            CallbackOutcome::Compensated(order)
        }
        _ => CallbackOutcome::AlreadyConfirmed(order),
    }
}

fn reject(gateway_order_id: &str, reason: RejectionReason) -> CheckoutError {
    tracing::warn!(
        security = true,
        gateway_order_id,
        reason = %reason,
        "payment verification rejected"
    );
    CheckoutError::VerificationFailed(reason)
}
