//! Checkout coordination core.
//!
//! This crate turns a finalized cart into a paid order without overselling:
//!
//! 1. [`OrderLifecycle::create_order`] prices the cart and reserves stock for
//!    every line, or for none.
//! 2. [`PaymentHandoff::initiate`] opens a gateway session for the pending order.
//! 3. [`CallbackProcessor::handle`] verifies the gateway result and either
//!    commits the order (stock confirmed) or compensates it (stock released).
//! 4. [`Reconciler`] releases reservations whose hold deadline passed.

pub mod callback;
pub mod clock;
pub mod config;
pub mod error;
pub mod handoff;
pub mod ledger;
pub mod lifecycle;
pub mod reconciler;
pub mod services;
pub mod verifier;

pub use callback::{CallbackOutcome, CallbackProcessor, GatewayCallback};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::CheckoutConfig;
pub use error::{CheckoutError, Result};
pub use handoff::PaymentHandoff;
pub use ledger::{InventoryLedger, StockLevel};
pub use lifecycle::{CartLine, CreateOrderRequest, OrderLifecycle, QuoteRequest};
pub use reconciler::{Reconciler, SweepReport};
pub use services::{
    Catalog, CatalogItem, Contact, GatewayError, GatewaySession, HttpPaymentGateway,
    InMemoryCatalog, InMemoryPaymentGateway, PaymentGateway, SessionRequest,
};
pub use verifier::{PaymentVerifier, RejectionReason, Verification, VerifiedPayment};
