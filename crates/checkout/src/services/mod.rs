//! External collaborator traits and their implementations.

pub mod catalog;
pub mod gateway;

pub use catalog::{Catalog, CatalogItem, InMemoryCatalog};
pub use gateway::{
    Contact, GatewayError, GatewaySession, HttpPaymentGateway, InMemoryPaymentGateway,
    PaymentGateway, SessionRequest,
};
