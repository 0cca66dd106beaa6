//! Shared identifier types used across the checkout crates.

mod types;

pub use types::{AttemptId, OrderId, Version};
