//! Buyer-facing stock levels.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use checkout::StockLevel;
use domain::StockKey;
use serde::Deserialize;
use store::CheckoutStore;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VariantQuery {
    pub variant_id: Option<String>,
}

/// GET /inventory/{product_id}?variant_id=
///
/// Units available to new orders.
#[tracing::instrument(skip(state))]
pub async fn availability<S: CheckoutStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<String>,
    Query(query): Query<VariantQuery>,
) -> Result<Json<StockLevel>, ApiError> {
    let key = match query.variant_id.filter(|v| !v.is_empty()) {
        Some(variant_id) => StockKey::variant(product_id, variant_id),
        None => StockKey::product(product_id),
    };

    state
        .lifecycle
        .ledger()
        .availability(&key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No stock record for {key}")))
}
