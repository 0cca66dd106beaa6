//! Domain layer for the checkout system.
//!
//! This crate is free of I/O and provides:
//! - Value objects (`Money`, `StockKey`, `Address`)
//! - Inventory records and the reserve/release/confirm ledger operations
//! - The order total calculator
//! - The order aggregate with its status machines and audit events
//! - Payment attempts

pub mod aggregate;
pub mod error;
pub mod inventory;
pub mod order;
pub mod payment;
pub mod pricing;
pub mod value_objects;

pub use aggregate::{Aggregate, DomainEvent};
pub use error::DomainError;
pub use inventory::{InventoryError, InventoryRecord, LedgerOp, StockShortage};
pub use order::{
    CompensationReason, Order, OrderError, OrderEvent, OrderLineItem, OrderNumber, OrderStatus,
    PaymentStatus, PlaceOrder, StockSettlement,
};
pub use payment::{PaymentAttempt, PaymentError};
pub use pricing::{
    DiscountCode, DiscountInput, DiscountKind, DiscountOutcome, DiscountRejection, OrderTotals,
    PriceLine, PricingError, PricingPolicy, Quote, calculate,
};
pub use value_objects::{Address, CustomerId, Money, ProductId, StockKey, VariantId};
