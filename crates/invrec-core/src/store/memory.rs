//! In-memory store implementation backed by DashMap.
//!
//! Unique-key races (content hash, supplier name key, tax id) are
//! settled through the entry API: the shard lock makes the first insert
//! win and every later attempt is redirected to the stored record.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::invoice::{DeletionEntry, Invoice, InvoiceStatus, PriceAlert};
use crate::models::remission::RemissionRecord;
use crate::models::supplier::{PriceObservation, Supplier};
use crate::store::{
    InvoiceStore, PriceStore, RemissionStore, StoreResult, SupplierStore,
};

/// In-memory store for invoices, suppliers, price history, and
/// remission records.
#[derive(Default)]
pub struct MemoryStore {
    invoices: DashMap<Uuid, Invoice>,
    hash_index: DashMap<String, Uuid>,
    deletions: DashMap<Uuid, Vec<DeletionEntry>>,

    suppliers: DashMap<Uuid, Supplier>,
    name_index: DashMap<String, Uuid>,
    tax_index: DashMap<String, Uuid>,

    observations: DashMap<(Uuid, String), Vec<PriceObservation>>,
    alerts: RwLock<Vec<PriceAlert>>,

    remissions: DashMap<Uuid, (u64, RemissionRecord)>,
    remission_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn insert_invoice(&self, invoice: Invoice) -> StoreResult<Invoice> {
        match self.hash_index.entry(invoice.content_hash.clone()) {
            Entry::Occupied(existing) => {
                let existing_id = *existing.get();
                drop(existing);
                debug!(
                    invoice_id = %existing_id,
                    content_hash = %invoice.content_hash,
                    "Redirecting duplicate content hash to existing invoice"
                );
                self.invoices
                    .get(&existing_id)
                    .map(|i| i.clone())
                    .ok_or_else(|| StoreError::NotFound(existing_id.to_string()))
            }
            Entry::Vacant(slot) => {
                // Publish the record before the index so redirected
                // readers always find it.
                self.invoices.insert(invoice.id, invoice.clone());
                slot.insert(invoice.id);
                Ok(invoice)
            }
        }
    }

    async fn get_invoice(&self, id: Uuid) -> StoreResult<Option<Invoice>> {
        Ok(self.invoices.get(&id).map(|i| i.clone()))
    }

    async fn find_by_content_hash(&self, content_hash: &str) -> StoreResult<Option<Invoice>> {
        let Some(id) = self.hash_index.get(content_hash).map(|e| *e) else {
            return Ok(None);
        };
        Ok(self.invoices.get(&id).map(|i| i.clone()))
    }

    async fn update_invoice(
        &self,
        mut invoice: Invoice,
        expected_version: u64,
    ) -> StoreResult<Invoice> {
        let Some(mut stored) = self.invoices.get_mut(&invoice.id) else {
            return Err(StoreError::NotFound(invoice.id.to_string()));
        };
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: stored.version,
            });
        }
        invoice.version = expected_version + 1;
        *stored = invoice.clone();
        Ok(invoice)
    }

    async fn list_by_status(&self, status: InvoiceStatus) -> StoreResult<Vec<Invoice>> {
        Ok(self
            .invoices
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn append_deletion(&self, entry: DeletionEntry) -> StoreResult<()> {
        self.deletions
            .entry(entry.invoice_id)
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn deletion_history(&self, invoice_id: Uuid) -> StoreResult<Vec<DeletionEntry>> {
        Ok(self
            .deletions
            .get(&invoice_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl SupplierStore for MemoryStore {
    async fn create_supplier(&self, supplier: Supplier) -> StoreResult<Supplier> {
        match self.name_index.entry(supplier.normalized_name_key.clone()) {
            Entry::Occupied(existing) => {
                let winner_id = *existing.get();
                drop(existing);
                debug!(
                    supplier_id = %winner_id,
                    name_key = %supplier.normalized_name_key,
                    "Redirecting supplier creation to existing record"
                );
                self.suppliers
                    .get(&winner_id)
                    .map(|s| s.clone())
                    .ok_or_else(|| StoreError::NotFound(winner_id.to_string()))
            }
            Entry::Vacant(name_slot) => {
                if let Some(tax_id) = supplier.tax_id.clone() {
                    match self.tax_index.entry(tax_id) {
                        Entry::Occupied(existing) => {
                            let winner_id = *existing.get();
                            drop(existing);
                            return self
                                .suppliers
                                .get(&winner_id)
                                .map(|s| s.clone())
                                .ok_or_else(|| StoreError::NotFound(winner_id.to_string()));
                        }
                        Entry::Vacant(tax_slot) => {
                            self.suppliers.insert(supplier.id, supplier.clone());
                            tax_slot.insert(supplier.id);
                        }
                    }
                } else {
                    self.suppliers.insert(supplier.id, supplier.clone());
                }
                name_slot.insert(supplier.id);
                Ok(supplier)
            }
        }
    }

    async fn get_supplier(&self, id: Uuid) -> StoreResult<Option<Supplier>> {
        Ok(self.suppliers.get(&id).map(|s| s.clone()))
    }

    async fn find_by_tax_id(&self, tax_id: &str) -> StoreResult<Option<Supplier>> {
        let Some(id) = self.tax_index.get(tax_id).map(|e| *e) else {
            return Ok(None);
        };
        Ok(self.suppliers.get(&id).map(|s| s.clone()))
    }

    async fn find_by_name_key(&self, name_key: &str) -> StoreResult<Option<Supplier>> {
        let Some(id) = self.name_index.get(name_key).map(|e| *e) else {
            return Ok(None);
        };
        Ok(self.suppliers.get(&id).map(|s| s.clone()))
    }

    async fn list_suppliers(&self) -> StoreResult<Vec<Supplier>> {
        Ok(self
            .suppliers
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn append_observation(&self, observation: PriceObservation) -> StoreResult<()> {
        self.observations
            .entry((observation.supplier_id, observation.item_key.clone()))
            .or_default()
            .push(observation);
        Ok(())
    }

    async fn latest_observation(
        &self,
        supplier_id: Uuid,
        item_key: &str,
    ) -> StoreResult<Option<PriceObservation>> {
        Ok(self
            .observations
            .get(&(supplier_id, item_key.to_string()))
            .and_then(|log| log.iter().max_by_key(|o| o.observed_at).cloned()))
    }

    async fn observations(
        &self,
        supplier_id: Uuid,
        item_key: &str,
    ) -> StoreResult<Vec<PriceObservation>> {
        let mut log = self
            .observations
            .get(&(supplier_id, item_key.to_string()))
            .map(|v| v.clone())
            .unwrap_or_default();
        log.sort_by_key(|o| o.observed_at);
        Ok(log)
    }

    async fn append_alert(&self, alert: PriceAlert) -> StoreResult<()> {
        self.alerts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(alert);
        Ok(())
    }

    async fn list_alerts(&self, supplier_id: Option<Uuid>) -> StoreResult<Vec<PriceAlert>> {
        let alerts = self
            .alerts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(alerts
            .iter()
            .filter(|a| supplier_id.is_none_or(|id| a.supplier_id == id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RemissionStore for MemoryStore {
    async fn insert_remission(&self, record: RemissionRecord) -> StoreResult<RemissionRecord> {
        let seq = self.remission_seq.fetch_add(1, Ordering::Relaxed);
        self.remissions.insert(record.id, (seq, record.clone()));
        Ok(record)
    }

    async fn get_remission(&self, id: Uuid) -> StoreResult<Option<RemissionRecord>> {
        Ok(self.remissions.get(&id).map(|e| e.value().1.clone()))
    }

    async fn update_remission(&self, record: RemissionRecord) -> StoreResult<()> {
        let Some(mut stored) = self.remissions.get_mut(&record.id) else {
            return Err(StoreError::NotFound(record.id.to_string()));
        };
        stored.1 = record;
        Ok(())
    }

    async fn unmatched_for_supplier(
        &self,
        supplier_id: Uuid,
    ) -> StoreResult<Vec<RemissionRecord>> {
        let mut records: Vec<(u64, RemissionRecord)> = self
            .remissions
            .iter()
            .filter(|entry| {
                let (_, record) = entry.value();
                record.supplier_id == supplier_id && record.matched_invoice.is_none()
            })
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    use crate::models::invoice::InvoiceStatus;

    fn invoice(hash: &str) -> Invoice {
        Invoice::new(hash, "application/pdf", "tester")
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_by_content_hash() {
        let store = MemoryStore::new();
        let first = store.insert_invoice(invoice("abc123")).await.unwrap();
        let second = store.insert_invoice(invoice("abc123")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.invoices.len(), 1);
    }

    #[tokio::test]
    async fn test_version_checked_update() {
        let store = MemoryStore::new();
        let stored = store.insert_invoice(invoice("h1")).await.unwrap();
        assert_eq!(stored.version, 0);

        let mut edit = stored.clone();
        edit.status = InvoiceStatus::PendingReview;
        let updated = store.update_invoice(edit, 0).await.unwrap();
        assert_eq!(updated.version, 1);

        // Second writer still holds the stale version.
        let mut stale = stored;
        stale.status = InvoiceStatus::Validated;
        let err = store.update_invoice(stale, 0).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 0,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_supplier_creation_redirects_on_duplicate_key() {
        let store = MemoryStore::new();
        let first = store
            .create_supplier(Supplier::new("ACME Corp.", "acme", None))
            .await
            .unwrap();
        let second = store
            .create_supplier(Supplier::new("acme corp", "acme", None))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.suppliers.len(), 1);
    }

    #[tokio::test]
    async fn test_supplier_tax_id_uniqueness() {
        let store = MemoryStore::new();
        let first = store
            .create_supplier(Supplier::new("Acme", "acme", Some("TAX-1".into())))
            .await
            .unwrap();
        // Different name key, same tax id: redirected to the winner.
        let second = store
            .create_supplier(Supplier::new("Acme Trading", "acme trading", Some("TAX-1".into())))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_supplier_creation_yields_one_record() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .create_supplier(Supplier::new("ACME Corp.", "acme", None))
                    .await
                    .unwrap()
                    .id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.suppliers.len(), 1);
    }

    #[tokio::test]
    async fn test_latest_observation_wins_by_timestamp() {
        let store = MemoryStore::new();
        let supplier_id = Uuid::new_v4();
        let invoice_id = Uuid::new_v4();
        let older = PriceObservation {
            supplier_id,
            item_key: "widget".into(),
            price: Decimal::new(100, 0),
            observed_at: Utc::now() - chrono::Duration::days(30),
            source_invoice_id: invoice_id,
        };
        let newer = PriceObservation {
            supplier_id,
            item_key: "widget".into(),
            price: Decimal::new(110, 0),
            observed_at: Utc::now(),
            source_invoice_id: invoice_id,
        };
        // Append out of order; the query sorts by timestamp.
        store.append_observation(newer.clone()).await.unwrap();
        store.append_observation(older).await.unwrap();

        let latest = store
            .latest_observation(supplier_id, "widget")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.price, newer.price);

        let history = store.observations(supplier_id, "widget").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].observed_at < history[1].observed_at);
    }

    #[tokio::test]
    async fn test_deletion_log_is_append_only() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let entry = DeletionEntry {
            invoice_id: id,
            prior_status: InvoiceStatus::Validated,
            reason: "duplicate scan".into(),
            actor: "tester".into(),
            deleted_at: Utc::now(),
        };
        store.append_deletion(entry.clone()).await.unwrap();
        store.append_deletion(entry).await.unwrap();
        assert_eq!(store.deletion_history(id).await.unwrap().len(), 2);
    }
}
