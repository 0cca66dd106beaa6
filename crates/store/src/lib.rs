//! Persistence for the checkout core.
//!
//! Every operation on [`CheckoutStore`] is atomic. Order-level writes
//! (placing an order, committing or compensating it) touch the order row,
//! its audit events, the inventory counters and the payment attempt inside
//! one transaction, guarded by the order's version.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{AttemptId, OrderId, Version};
pub use error::{Result, StoreError};
pub use event::{EventEnvelope, EventId};
pub use memory::InMemoryCheckoutStore;
pub use postgres::PostgresCheckoutStore;
pub use store::{AttemptUpdate, CheckoutStore, Transition};
