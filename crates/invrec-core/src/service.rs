//! The reconciliation service: the single public entry point tying
//! intake, extraction, matching, pricing, lifecycle, and remission
//! reconciliation together over one store.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{InvrecError, LifecycleError, Result};
use crate::extraction::{ExtractionAdapter, ExtractionProvider};
use crate::identity::{IdentityProvider, PrivilegedAction};
use crate::intake::IncomingDocument;
use crate::lifecycle::{BulkOutcome, LifecycleManager};
use crate::models::config::EngineConfig;
use crate::models::invoice::{DeletionEntry, Invoice, InvoiceStatus, PriceAlert, SupplierRef};
use crate::models::supplier::Supplier;
use crate::pipeline::{CancelHandle, IngestionPipeline, SubmissionOutcome};
use crate::pricing::{PriceReconciler, PricingOutcome};
use crate::remission::RemissionReconciler;
use crate::store::{InvoiceStore, PriceStore, RemissionStore, SupplierStore};
use crate::supplier::SupplierMatcher;
use crate::validate::{self, FieldPatch};

/// Facade over the whole engine.
pub struct ReconciliationService<S> {
    store: Arc<S>,
    pipeline: IngestionPipeline,
    matcher: SupplierMatcher,
    pricer: PriceReconciler,
    lifecycle: LifecycleManager,
    identity: Arc<dyn IdentityProvider>,
}

impl<S> ReconciliationService<S>
where
    S: InvoiceStore + SupplierStore + PriceStore + RemissionStore + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<S>,
        provider: Arc<dyn ExtractionProvider>,
        identity: Arc<dyn IdentityProvider>,
        config: EngineConfig,
    ) -> Self {
        let adapter = ExtractionAdapter::new(provider, config.extraction.clone());
        let matcher = SupplierMatcher::new(store.clone(), config.matching.clone());
        let pricer = PriceReconciler::new(store.clone(), config.pricing.clone());
        let lifecycle = LifecycleManager::new(store.clone(), config.lifecycle.clone());
        let remission = RemissionReconciler::new(store.clone(), config.remission.clone());
        let pipeline = IngestionPipeline::new(
            adapter,
            matcher.clone(),
            pricer.clone(),
            lifecycle.clone(),
            remission,
            store.clone(),
            identity.clone(),
            &config,
        );
        Self {
            store,
            pipeline,
            matcher,
            pricer,
            lifecycle,
            identity,
        }
    }

    /// Submit one document for ingestion.
    pub async fn submit_document(&self, document: IncomingDocument) -> Result<Uuid> {
        self.pipeline.submit(document).await
    }

    /// Submit a batch of documents over the bounded worker pool.
    pub async fn bulk_submit(
        &self,
        documents: Vec<IncomingDocument>,
        cancel: &CancelHandle,
    ) -> Vec<SubmissionOutcome> {
        self.pipeline.bulk_submit(documents, cancel).await
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice> {
        self.store
            .get_invoice(invoice_id)
            .await?
            .ok_or(InvrecError::InvoiceNotFound(invoice_id))
    }

    pub async fn list_by_status(&self, status: InvoiceStatus) -> Result<Vec<Invoice>> {
        Ok(self.store.list_by_status(status).await?)
    }

    /// Outstanding field paths for an invoice in review.
    pub async fn get_missing_fields(&self, invoice_id: Uuid) -> Result<BTreeSet<String>> {
        Ok(self.get_invoice(invoice_id).await?.missing_fields)
    }

    /// Apply resubmitted corrections, re-run matching, pricing, and
    /// routing, and persist at the version the caller read.
    pub async fn resolve_fields(
        &self,
        invoice_id: Uuid,
        patch: &FieldPatch,
        expected_version: u64,
    ) -> Result<Invoice> {
        let mut invoice = self.get_invoice(invoice_id).await?;

        validate::apply_patch(&mut invoice, patch);
        let staged = self.reprocess(&mut invoice).await?;

        invoice.last_modified_by = self.identity.current_actor();
        let stored = self.store.update_invoice(invoice, expected_version).await?;
        if let Some(staged) = staged {
            self.pricer.commit(staged).await?;
        }
        info!(invoice_id = %invoice_id, status = stored.status.as_str(), "Applied field corrections");
        Ok(stored)
    }

    /// Confirm a suggested supplier match (or override with another
    /// registered supplier), then re-run pricing and routing.
    pub async fn confirm_supplier_match(
        &self,
        invoice_id: Uuid,
        supplier_id: Uuid,
        expected_version: u64,
    ) -> Result<Invoice> {
        self.store
            .get_supplier(supplier_id)
            .await?
            .ok_or(InvrecError::SupplierNotFound(supplier_id))?;

        let mut invoice = self.get_invoice(invoice_id).await?;

        invoice.supplier = SupplierRef::Resolved { supplier_id };
        let staged = self.reprocess(&mut invoice).await?;

        invoice.last_modified_by = self.identity.current_actor();
        let stored = self.store.update_invoice(invoice, expected_version).await?;
        if let Some(staged) = staged {
            self.pricer.commit(staged).await?;
        }
        info!(invoice_id = %invoice_id, supplier_id = %supplier_id, "Supplier match confirmed");
        Ok(stored)
    }

    /// Explicitly finalize an invoice at a known version, then attempt
    /// remission reconciliation.
    pub async fn finalize(&self, invoice_id: Uuid, expected_version: u64) -> Result<Invoice> {
        self.ensure_authorized(PrivilegedAction::Finalize)?;
        self.pipeline
            .finalize_and_reconcile(invoice_id, expected_version, &self.identity.current_actor())
            .await
    }

    /// Soft-delete an invoice with a mandatory reason.
    pub async fn delete(
        &self,
        invoice_id: Uuid,
        reason: &str,
        expected_version: u64,
    ) -> Result<Invoice> {
        self.ensure_authorized(PrivilegedAction::Delete)?;
        self.lifecycle
            .delete(invoice_id, reason, expected_version, &self.identity.current_actor())
            .await
    }

    /// Finalize a batch at each invoice's current stored version. Per-
    /// invoice isolation: one refusal never aborts the rest.
    pub async fn bulk_finalize(&self, invoice_ids: &[Uuid]) -> Result<Vec<BulkOutcome>> {
        self.ensure_authorized(PrivilegedAction::Finalize)?;
        let actor = self.identity.current_actor();

        let mut outcomes = Vec::with_capacity(invoice_ids.len());
        for &id in invoice_ids {
            let result = match self.lifecycle.current_version(id).await {
                Ok(version) => self.pipeline.finalize_and_reconcile(id, version, &actor).await,
                Err(e) => Err(e),
            };
            outcomes.push(match result {
                Ok(invoice) => BulkOutcome {
                    invoice_id: id,
                    new_version: Some(invoice.version),
                    error: None,
                },
                Err(e) => BulkOutcome {
                    invoice_id: id,
                    new_version: None,
                    error: Some(e.to_string()),
                },
            });
        }
        Ok(outcomes)
    }

    /// Delete a batch with a shared reason.
    pub async fn bulk_delete(&self, invoice_ids: &[Uuid], reason: &str) -> Result<Vec<BulkOutcome>> {
        self.ensure_authorized(PrivilegedAction::Delete)?;
        Ok(self
            .lifecycle
            .bulk_delete(invoice_ids, reason, &self.identity.current_actor())
            .await)
    }

    /// Price-change alerts, optionally for one supplier.
    pub async fn list_price_alerts(&self, supplier_id: Option<Uuid>) -> Result<Vec<PriceAlert>> {
        Ok(self.store.list_alerts(supplier_id).await?)
    }

    pub async fn list_suppliers(&self) -> Result<Vec<Supplier>> {
        Ok(self.store.list_suppliers().await?)
    }

    pub async fn deletion_history(&self, invoice_id: Uuid) -> Result<Vec<DeletionEntry>> {
        Ok(self.store.deletion_history(invoice_id).await?)
    }

    /// Re-run matching, pricing (first time only), and routing after a
    /// manual correction. Pricing runs when the supplier only now
    /// became resolved; it was recorded at ingestion otherwise. The
    /// staged observations and alerts are returned for the caller to
    /// commit once the invoice update survives its version check, so a
    /// losing writer never pollutes the append-only price log.
    async fn reprocess(&self, invoice: &mut Invoice) -> Result<Option<PricingOutcome>> {
        let priced_before = invoice
            .line_items
            .iter()
            .any(|item| item.price_deviation.is_some());

        self.matcher.resolve(invoice).await?;
        validate::validate(invoice);

        let staged = if invoice.supplier.is_resolved() && !priced_before {
            Some(self.pricer.classify_invoice(invoice).await?)
        } else {
            None
        };
        self.lifecycle.route(invoice)?;
        Ok(staged)
    }

    fn ensure_authorized(&self, action: PrivilegedAction) -> Result<()> {
        if self.identity.authorize(action) {
            Ok(())
        } else {
            Err(LifecycleError::Unauthorized {
                actor: self.identity.current_actor(),
                action: action.to_string(),
            }
            .into())
        }
    }
}
