//! Core library for supplier invoice ingestion and reconciliation.
//!
//! This crate provides:
//! - Document intake with content hashing and duplicate suppression
//! - An extraction adapter over an external AI document-understanding
//!   provider, with caching and bounded retries
//! - Normalization and field validation into a canonical invoice schema
//! - Supplier matching against a deduplicated registry
//! - Price-deviation detection with per-supplier baselines and alerts
//! - An invoice lifecycle state machine with an audited soft delete
//! - Reconciliation of delivery (remission) records against finalized
//!   invoices

pub mod error;
pub mod extraction;
pub mod identity;
pub mod intake;
pub mod lifecycle;
pub mod mocks;
pub mod models;
pub mod pipeline;
pub mod pricing;
pub mod remission;
pub mod service;
pub mod store;
pub mod supplier;
pub mod validate;

pub use error::{ExtractionError, IntakeError, InvrecError, LifecycleError, Result, StoreError};
pub use extraction::{ExtractionAdapter, ExtractionProvider, HttpExtractionProvider, RawExtraction};
pub use identity::{IdentityProvider, PrivilegedAction, StaticIdentity};
pub use intake::{DocumentIntake, IncomingDocument};
pub use lifecycle::{BulkOutcome, LifecycleManager};
pub use models::config::EngineConfig;
pub use models::invoice::{Invoice, InvoiceStatus, LineItem, PriceAlert, PriceDeviation, SupplierRef};
pub use models::remission::{DeliveredItem, ReconciliationStatus, RemissionRecord};
pub use models::supplier::{PriceObservation, Supplier};
pub use pipeline::{CancelHandle, IngestionPipeline, SubmissionOutcome};
pub use pricing::PriceReconciler;
pub use remission::RemissionReconciler;
pub use service::ReconciliationService;
pub use store::{InvoiceStore, MemoryStore, PriceStore, RemissionStore, SupplierStore};
pub use supplier::{MatchOutcome, SupplierMatcher};
pub use validate::{FieldPatch, LineItemPatch};
