//! Payment attempts against the external gateway.

use chrono::{DateTime, Utc};
use common::{AttemptId, OrderId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::PaymentStatus;
use crate::value_objects::Money;

/// Errors raised when settling a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The attempt already reached a terminal status.
    #[error("Payment attempt {attempt_id} already settled as {status}")]
    AlreadySettled {
        attempt_id: AttemptId,
        status: PaymentStatus,
    },

    /// Only a paid attempt can be refunded.
    #[error("Payment attempt {attempt_id} is not paid")]
    NotPaid { attempt_id: AttemptId },
}

/// One gateway session opened for an order.
///
/// An order may accumulate several failed attempts, but at most one is ever
/// paid. Each attempt moves from pending to a terminal status exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: AttemptId,
    pub order_id: OrderId,
    /// 1-based position among the order's attempts.
    pub attempt_number: u32,
    /// Session reference minted by the gateway.
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub signature: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    /// Creates a pending attempt for a freshly opened gateway session.
    pub fn new(
        order_id: OrderId,
        attempt_number: u32,
        gateway_order_id: impl Into<String>,
        amount: Money,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            order_id,
            attempt_number,
            gateway_order_id: gateway_order_id.into(),
            gateway_payment_id: None,
            signature: None,
            amount,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }

    /// Records a verified capture.
    pub fn mark_paid(
        &mut self,
        gateway_payment_id: impl Into<String>,
        signature: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        self.ensure_pending()?;
        self.status = PaymentStatus::Paid;
        self.gateway_payment_id = Some(gateway_payment_id.into());
        self.signature = Some(signature.into());
        self.updated_at = now;
        Ok(())
    }

    /// Records a decline or cancellation reported by the gateway.
    pub fn mark_failed(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        self.ensure_pending()?;
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_refunded(&mut self, now: DateTime<Utc>) -> Result<(), PaymentError> {
        if !self.is_paid() {
            return Err(PaymentError::NotPaid {
                attempt_id: self.id,
            });
        }
        self.status = PaymentStatus::Refunded;
        self.updated_at = now;
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), PaymentError> {
        if !self.is_pending() {
            return Err(PaymentError::AlreadySettled {
                attempt_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}
