//! Payment handoff and gateway result endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use checkout::{CallbackOutcome, Contact, GatewayCallback};
use domain::{Money, PaymentAttempt, PaymentStatus};
use serde::{Deserialize, Serialize};
use store::CheckoutStore;

use super::orders::OrderResponse;
use super::{Caller, parse_order_id};
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct InitiatePaymentRequest {
    #[serde(default)]
    pub contact: Option<Contact>,
}

/// The authorized result the gateway page hands back to the buyer.
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct PaymentSessionResponse {
    pub attempt_id: String,
    pub attempt_number: u32,
    pub gateway_order_id: String,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
}

impl From<&PaymentAttempt> for PaymentSessionResponse {
    fn from(attempt: &PaymentAttempt) -> Self {
        Self {
            attempt_id: attempt.id.to_string(),
            attempt_number: attempt.attempt_number,
            gateway_order_id: attempt.gateway_order_id.clone(),
            amount: attempt.amount,
            currency: attempt.currency.clone(),
            status: attempt.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub outcome: &'static str,
    pub order: OrderResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
}

impl From<&CallbackOutcome> for CallbackResponse {
    fn from(outcome: &CallbackOutcome) -> Self {
        let attempts_remaining = match outcome {
            CallbackOutcome::RetryAllowed {
                attempts_remaining, ..
            } => Some(*attempts_remaining),
            _ => None,
        };

        Self {
            outcome: outcome.as_str(),
            order: OrderResponse::from(outcome.order()),
            attempts_remaining,
        }
    }
}

// -- Handlers --

/// POST /orders/{id}/payments
///
/// Opens a gateway session for a pending order.
#[tracing::instrument(skip(state, caller, req))]
pub async fn initiate<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentSessionResponse>), ApiError> {
    let order_id = parse_order_id(&id)?;
    caller.owns(state.lifecycle.get_order(order_id).await?)?;

    let attempt = state
        .handoff
        .initiate(order_id, req.contact.unwrap_or_default())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentSessionResponse::from(&attempt)),
    ))
}

/// POST /payments/callback
///
/// Result pushed by the gateway.
#[tracing::instrument(skip(state, callback), fields(gateway_order_id = %callback.gateway_order_id()))]
pub async fn callback<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(callback): Json<GatewayCallback>,
) -> Result<Json<CallbackResponse>, ApiError> {
    let outcome = state.callbacks.handle(callback).await?;
    Ok(Json(CallbackResponse::from(&outcome)))
}

/// POST /orders/{id}/payments/verify
///
/// The buyer returns from the gateway page.
///
/// Runs the same verification as the gateway callback, so whichever of the
/// two arrives second sees the order already confirmed.
#[tracing::instrument(skip(state, caller, req))]
pub async fn verify<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    caller.owns(state.lifecycle.get_order(order_id).await?)?;

    let attempts = state.lifecycle.payment_attempts(order_id).await?;
    if !attempts
        .iter()
        .any(|attempt| attempt.gateway_order_id == req.gateway_order_id)
    {
        return Err(ApiError::NotFound(format!(
            "No payment {} for order {order_id}",
            req.gateway_order_id
        )));
    }

    let order = state
        .callbacks
        .handle(GatewayCallback::Authorized {
            gateway_order_id: req.gateway_order_id,
            gateway_payment_id: req.gateway_payment_id,
            signature: req.signature,
        })
        .await?
        .into_confirmed()?;

    Ok(Json(OrderResponse::from(&order)))
}
