//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use checkout::{
    CallbackProcessor, Catalog, CheckoutConfig, Clock, OrderLifecycle, PaymentGateway,
    PaymentHandoff, PaymentVerifier, Reconciler,
};
use store::CheckoutStore;

/// Checkout services accessible from all handlers.
pub struct AppState<S> {
    pub lifecycle: Arc<OrderLifecycle<S>>,
    pub handoff: PaymentHandoff<S>,
    pub callbacks: CallbackProcessor<S>,
}

impl<S: CheckoutStore + Clone + 'static> AppState<S> {
    /// Wires the checkout services around one store.
    pub fn new(
        store: S,
        catalog: Arc<dyn Catalog>,
        gateway: Arc<dyn PaymentGateway>,
        verifier: PaymentVerifier,
        clock: Arc<dyn Clock>,
        config: CheckoutConfig,
    ) -> Self {
        let lifecycle = Arc::new(OrderLifecycle::new(store, catalog, clock, config));

        Self {
            handoff: PaymentHandoff::new(lifecycle.clone(), gateway),
            callbacks: CallbackProcessor::new(lifecycle.clone(), verifier),
            lifecycle,
        }
    }

    /// Builds the background sweeper sharing this state's lifecycle.
    pub fn reconciler(&self, interval: Duration) -> Reconciler<S> {
        Reconciler::new(self.lifecycle.clone(), interval)
    }
}
