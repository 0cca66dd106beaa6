//! HTTP API server for the checkout core.
//!
//! Exposes order placement, payment handoff and gateway callbacks over REST,
//! with structured logging (tracing) and Prometheus metrics.

pub mod catalog;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use store::CheckoutStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CheckoutStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/checkout/quote", post(routes::checkout::quote::<S>))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/orders/by-number/{number}",
            get(routes::orders::get_by_number::<S>),
        )
        .route("/orders/{id}/events", get(routes::orders::events::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/orders/{id}/fulfillment",
            post(routes::orders::fulfillment::<S>),
        )
        .route(
            "/orders/{id}/payments",
            post(routes::payments::initiate::<S>),
        )
        .route(
            "/orders/{id}/payments/verify",
            post(routes::payments::verify::<S>),
        )
        .route("/payments/callback", post(routes::payments::callback::<S>))
        .route(
            "/inventory/{product_id}",
            get(routes::inventory::availability::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
