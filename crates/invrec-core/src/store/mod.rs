//! Persistent store collaborator traits.
//!
//! Components receive these by `Arc<dyn ...>` reference; nothing in the
//! engine touches storage as a singleton. `MemoryStore` implements all
//! four for tests and single-process deployments.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::invoice::{DeletionEntry, Invoice, InvoiceStatus, PriceAlert};
use crate::models::remission::RemissionRecord;
use crate::models::supplier::{PriceObservation, Supplier};

pub use memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// CRUD plus version-checked update for invoices.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Insert a new invoice. Idempotent by content hash: if an invoice
    /// with the same hash already exists, the stored record is returned
    /// and the new one is discarded.
    async fn insert_invoice(&self, invoice: Invoice) -> StoreResult<Invoice>;

    async fn get_invoice(&self, id: Uuid) -> StoreResult<Option<Invoice>>;

    async fn find_by_content_hash(&self, content_hash: &str) -> StoreResult<Option<Invoice>>;

    /// Replace the stored invoice if and only if its version equals
    /// `expected_version`. On success the stored version becomes
    /// `expected_version + 1`. Fails with `VersionConflict` otherwise.
    async fn update_invoice(&self, invoice: Invoice, expected_version: u64)
    -> StoreResult<Invoice>;

    async fn list_by_status(&self, status: InvoiceStatus) -> StoreResult<Vec<Invoice>>;

    /// Append to the deletion-history log. Append-only.
    async fn append_deletion(&self, entry: DeletionEntry) -> StoreResult<()>;

    async fn deletion_history(&self, invoice_id: Uuid) -> StoreResult<Vec<DeletionEntry>>;
}

/// Supplier registry with unique-key lookup.
#[async_trait]
pub trait SupplierStore: Send + Sync {
    /// Create a supplier, guarded by the uniqueness constraints on
    /// `normalized_name_key` and `tax_id`. A concurrent creation losing
    /// the race is redirected to the winning record, never errored.
    async fn create_supplier(&self, supplier: Supplier) -> StoreResult<Supplier>;

    async fn get_supplier(&self, id: Uuid) -> StoreResult<Option<Supplier>>;

    async fn find_by_tax_id(&self, tax_id: &str) -> StoreResult<Option<Supplier>>;

    async fn find_by_name_key(&self, name_key: &str) -> StoreResult<Option<Supplier>>;

    async fn list_suppliers(&self) -> StoreResult<Vec<Supplier>>;
}

/// Append-only price observation log with range queries, plus the
/// price-change alert feed.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn append_observation(&self, observation: PriceObservation) -> StoreResult<()>;

    /// Most recent observation for (supplier, item key), if any.
    async fn latest_observation(
        &self,
        supplier_id: Uuid,
        item_key: &str,
    ) -> StoreResult<Option<PriceObservation>>;

    /// Full observation history for (supplier, item key), oldest first.
    async fn observations(
        &self,
        supplier_id: Uuid,
        item_key: &str,
    ) -> StoreResult<Vec<PriceObservation>>;

    async fn append_alert(&self, alert: PriceAlert) -> StoreResult<()>;

    /// Alerts, optionally filtered by supplier.
    async fn list_alerts(&self, supplier_id: Option<Uuid>) -> StoreResult<Vec<PriceAlert>>;
}

/// CRUD for delivery records.
#[async_trait]
pub trait RemissionStore: Send + Sync {
    async fn insert_remission(&self, record: RemissionRecord) -> StoreResult<RemissionRecord>;

    async fn get_remission(&self, id: Uuid) -> StoreResult<Option<RemissionRecord>>;

    async fn update_remission(&self, record: RemissionRecord) -> StoreResult<()>;

    /// Unmatched records for a supplier, in insertion order.
    async fn unmatched_for_supplier(&self, supplier_id: Uuid)
    -> StoreResult<Vec<RemissionRecord>>;
}
