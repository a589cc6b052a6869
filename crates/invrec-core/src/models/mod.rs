//! Data models for the reconciliation engine.

pub mod config;
pub mod invoice;
pub mod remission;
pub mod supplier;

pub use config::EngineConfig;
pub use invoice::{
    DeletionEntry, Invoice, InvoiceStatus, LineItem, PriceAlert, PriceDeviation, SupplierRef,
};
pub use remission::{DeliveredItem, ReconciliationStatus, RemissionRecord};
pub use supplier::{PriceObservation, Supplier};
