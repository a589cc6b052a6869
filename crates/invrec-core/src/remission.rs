//! Reconciliation of delivery (remission) records against finalized
//! invoices.
//!
//! Matching prefers the supplier document reference; without one it
//! falls back to date-and-amount proximity. A matched delivery is then
//! compared item by item against the billed quantities.
//!
//! Matching and persistence are split the way pricing splits
//! classification from commit: `reconcile` only computes the match, and
//! `commit` writes the record after the invoice side of the mutual
//! reference has been stored.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::models::config::RemissionConfig;
use crate::models::invoice::Invoice;
use crate::models::remission::{ReconciliationStatus, RemissionRecord};
use crate::store::RemissionStore;

/// Matches unreconciled deliveries to finalized invoices.
#[derive(Clone)]
pub struct RemissionReconciler {
    remissions: Arc<dyn RemissionStore>,
    config: RemissionConfig,
}

impl RemissionReconciler {
    pub fn new(remissions: Arc<dyn RemissionStore>, config: RemissionConfig) -> Self {
        Self { remissions, config }
    }

    /// Find the delivery record for a just-finalized invoice and
    /// compare quantities. Returns the reconciled record; the caller
    /// persists it with `commit` once the invoice's remission reference
    /// is stored, so the mutual references land together.
    ///
    /// No match is a normal outcome; the delivery may simply not have
    /// arrived yet.
    pub async fn reconcile(&self, invoice: &Invoice) -> Result<Option<RemissionRecord>> {
        let Some(supplier_id) = invoice.supplier.resolved_id() else {
            return Ok(None);
        };

        let candidates = self.remissions.unmatched_for_supplier(supplier_id).await?;
        let Some(mut record) = self.pick_candidate(invoice, candidates) else {
            debug!(invoice_id = %invoice.id, supplier_id = %supplier_id, "No matching delivery record");
            return Ok(None);
        };

        record.matched_invoice = Some(invoice.id);
        record.status = if self.quantities_agree(invoice, &record) {
            ReconciliationStatus::Matched
        } else {
            ReconciliationStatus::QuantityMismatch
        };
        info!(
            invoice_id = %invoice.id,
            remission_id = %record.id,
            status = ?record.status,
            "Reconciled delivery record"
        );
        Ok(Some(record))
    }

    /// Persist a reconciled record.
    pub async fn commit(&self, record: RemissionRecord) -> Result<()> {
        self.remissions.update_remission(record).await?;
        Ok(())
    }

    /// First unmatched record whose document reference equals the
    /// invoice's; failing that, the first within the date window whose
    /// declared total is within tolerance of the invoice total.
    fn pick_candidate(
        &self,
        invoice: &Invoice,
        candidates: Vec<RemissionRecord>,
    ) -> Option<RemissionRecord> {
        if let Some(doc_ref) = invoice.document_ref.as_deref() {
            if let Some(record) = candidates
                .iter()
                .find(|r| r.document_ref.as_deref() == Some(doc_ref))
            {
                return Some(record.clone());
            }
        }

        let issue_date = invoice.issue_date?;
        let invoice_total = invoice.total_amount();
        candidates.into_iter().find(|record| {
            let Some(delivered_at) = record.delivered_at else {
                return false;
            };
            let Some(declared_total) = record.declared_total else {
                return false;
            };
            let days_apart = (delivered_at - issue_date).num_days().abs();
            days_apart <= self.config.date_window_days
                && (declared_total - invoice_total).abs() <= self.config.amount_tolerance
        })
    }

    /// Delivered quantities must equal billed quantities for every item
    /// key on either side.
    fn quantities_agree(&self, invoice: &Invoice, record: &RemissionRecord) -> bool {
        for item in &invoice.line_items {
            if record.delivered_quantity(&item.item_key) != item.quantity {
                return false;
            }
        }
        // A delivered item the invoice never billed is also a mismatch.
        record.delivered_items.iter().all(|delivered| {
            invoice
                .line_items
                .iter()
                .any(|item| item.item_key == delivered.item_key)
        })
    }
}
