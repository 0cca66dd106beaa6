//! HTTP route handlers.

pub mod checkout;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod system;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::OrderId;
use domain::{Aggregate, CustomerId, Order};

use crate::error::ApiError;

/// Header carrying the authenticated buyer, set by the upstream auth layer.
pub const CUSTOMER_HEADER: &str = "x-customer-id";

/// The authenticated buyer making the request.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub CustomerId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CUSTOMER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {CUSTOMER_HEADER} header")))?;

        value
            .to_str()
            .ok()
            .and_then(|raw| uuid::Uuid::parse_str(raw.trim()).ok())
            .map(|uuid| Caller(CustomerId::from_uuid(uuid)))
            .ok_or_else(|| ApiError::Unauthorized(format!("invalid {CUSTOMER_HEADER} header")))
    }
}

impl Caller {
    /// Hides orders that belong to someone else behind a not-found.
    pub fn owns(&self, order: Order) -> Result<Order, ApiError> {
        if order.customer_id() == Some(self.0) {
            Ok(order)
        } else {
            let id = order.id().map(|id| id.to_string()).unwrap_or_default();
            Err(ApiError::NotFound(format!("Order {id} not found")))
        }
    }
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}
