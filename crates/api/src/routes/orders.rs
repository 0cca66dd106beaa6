//! Order placement, lookup, buyer cancellation and fulfillment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use checkout::{CartLine, CreateOrderRequest};
use domain::{
    Address, Aggregate, Money, Order, OrderLineItem, OrderStatus, OrderTotals, PaymentStatus,
};
use serde::{Deserialize, Serialize};
use store::CheckoutStore;

use super::{Caller, parse_order_id};
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub discount_code: Option<String>,
    pub shipping_address: Address,
    #[serde(default)]
    pub billing_address: Option<Address>,
    /// The total shown to the buyer, in minor units.
    pub expected_total: Money,
}

/// Back-office transitions after payment.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FulfillmentAction {
    StartProcessing,
    Ship { tracking_number: String },
    Deliver,
    Cancel { reason: String },
    Refund { reason: String },
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: Option<String>,
    pub customer_id: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub lines: Vec<OrderLineItem>,
    pub totals: OrderTotals,
    pub discount_code: Option<String>,
    pub currency: String,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub cancellation_reason: Option<String>,
    pub tracking_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().map(|id| id.to_string()).unwrap_or_default(),
            order_number: order.number().map(ToString::to_string),
            customer_id: order.customer_id().map(|c| c.as_uuid().to_string()),
            status: order.status(),
            payment_status: order.payment_status(),
            lines: order.lines().to_vec(),
            totals: *order.totals(),
            discount_code: order.discount_code().map(String::from),
            currency: order.currency().to_string(),
            shipping_address: order.shipping_address().cloned(),
            billing_address: order.billing_address().cloned(),
            cancellation_reason: order.cancellation_reason().map(String::from),
            tracking_number: order.tracking_number().map(String::from),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
            version: order.version().as_i64(),
        }
    }
}

/// Response type for event envelope data.
#[derive(Debug, Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub version: i64,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

// -- Handlers --

/// POST /orders
///
/// Prices the cart, reserves every line and records a pending order.
#[tracing::instrument(skip(state, req), fields(customer_id = %caller.0.as_uuid()))]
pub async fn create<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order = state
        .lifecycle
        .create_order(CreateOrderRequest {
            customer_id: caller.0,
            lines: req.lines,
            discount_code: req.discount_code,
            shipping_address: req.shipping_address,
            billing_address: req.billing_address,
            expected_total: req.expected_total,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state, caller))]
pub async fn get<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = caller.owns(state.lifecycle.get_order(order_id).await?)?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/by-number/{number}
#[tracing::instrument(skip(state, caller))]
pub async fn get_by_number<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(number): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = caller.owns(state.lifecycle.find_by_number(&number).await?)?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/{id}/events
///
/// The order's audit trail, oldest first.
#[tracing::instrument(skip(state, caller))]
pub async fn events<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    caller.owns(state.lifecycle.get_order(order_id).await?)?;

    let envelopes = state.lifecycle.order_events(order_id).await?;
    let responses = envelopes
        .into_iter()
        .map(|e| EventEnvelopeResponse {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            version: e.version.as_i64(),
            timestamp: e.timestamp.to_rfc3339(),
            payload: e.payload,
        })
        .collect();

    Ok(Json(responses))
}

/// POST /orders/{id}/cancel
///
/// The buyer abandons a pending order.
#[tracing::instrument(skip(state, caller))]
pub async fn cancel<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .lifecycle
        .cancel_by_customer(order_id, caller.0)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/fulfillment
///
/// Moves a paid order along its status machine.
#[tracing::instrument(skip(state, action))]
pub async fn fulfillment<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(action): Json<FulfillmentAction>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let lifecycle = &state.lifecycle;

    let order = match action {
        FulfillmentAction::StartProcessing => lifecycle.start_processing(order_id).await?,
        FulfillmentAction::Ship { tracking_number } => {
            if tracking_number.trim().is_empty() {
                return Err(ApiError::BadRequest(
                    "tracking_number must not be empty".to_string(),
                ));
            }
            lifecycle.mark_shipped(order_id, &tracking_number).await?
        }
        FulfillmentAction::Deliver => lifecycle.mark_delivered(order_id).await?,
        FulfillmentAction::Cancel { reason } => lifecycle.cancel(order_id, &reason).await?,
        FulfillmentAction::Refund { reason } => lifecycle.refund(order_id, &reason).await?,
    };

    Ok(Json(OrderResponse::from(&order)))
}
