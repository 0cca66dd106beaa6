//! Totals preview.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use checkout::QuoteRequest;
use domain::Quote;
use store::CheckoutStore;

use crate::error::ApiError;
use crate::state::AppState;

/// POST /checkout/quote
///
/// Prices a cart with catalog prices, reserving nothing.
#[tracing::instrument(skip(state, req), fields(lines = req.lines.len()))]
pub async fn quote<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<Quote>, ApiError> {
    Ok(Json(state.lifecycle.quote(&req).await?))
}
