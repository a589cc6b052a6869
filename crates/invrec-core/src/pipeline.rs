//! Ingestion pipeline: intake, extraction, normalization, validation,
//! supplier matching, price classification, and routing for one
//! document, plus the bounded-concurrency batch front end.
//!
//! Extraction success and initial persistence are atomic from the
//! caller's view: either the invoice lands in the store with its status
//! routed, or the submission errors and nothing is recorded. Staged
//! price observations are committed only after the invoice wins its
//! insert, so a duplicate submission never double-counts a baseline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::extraction::{ExtractionAdapter, ExtractionRequest, normalize};
use crate::identity::IdentityProvider;
use crate::intake::{DocumentIntake, IncomingDocument};
use crate::lifecycle::LifecycleManager;
use crate::models::config::{EngineConfig, ExtractionConfig};
use crate::models::invoice::Invoice;
use crate::pricing::PriceReconciler;
use crate::remission::RemissionReconciler;
use crate::store::InvoiceStore;
use crate::supplier::SupplierMatcher;
use crate::validate;

/// Cooperative cancellation for a batch submission. Documents whose
/// processing has not started when the flag flips are skipped;
/// in-flight documents run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-document result of a batch submission, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drives one document end to end and fans batches out over a bounded
/// worker pool.
#[derive(Clone)]
pub struct IngestionPipeline {
    intake: DocumentIntake,
    adapter: ExtractionAdapter,
    matcher: SupplierMatcher,
    pricer: PriceReconciler,
    lifecycle: LifecycleManager,
    remission: RemissionReconciler,
    invoices: Arc<dyn InvoiceStore>,
    identity: Arc<dyn IdentityProvider>,
    extraction_config: ExtractionConfig,
    max_concurrent: usize,
    auto_finalize: bool,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: ExtractionAdapter,
        matcher: SupplierMatcher,
        pricer: PriceReconciler,
        lifecycle: LifecycleManager,
        remission: RemissionReconciler,
        invoices: Arc<dyn InvoiceStore>,
        identity: Arc<dyn IdentityProvider>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            intake: DocumentIntake::new(config.intake.clone()),
            adapter,
            matcher,
            pricer,
            lifecycle,
            remission,
            invoices,
            identity,
            extraction_config: config.extraction.clone(),
            max_concurrent: config.pipeline.max_concurrent_documents.max(1),
            auto_finalize: config.lifecycle.auto_finalize,
        }
    }

    /// Submit one document. Returns the invoice id, which may belong to
    /// a previously stored invoice when the bytes are a duplicate.
    pub async fn submit(&self, document: IncomingDocument) -> Result<Uuid> {
        let content_hash = self.intake.inspect(&document)?;
        let actor = self.identity.current_actor();

        if let Some(existing) = self.invoices.find_by_content_hash(&content_hash).await? {
            info!(
                invoice_id = %existing.id,
                content_hash = %content_hash,
                "Duplicate document, returning existing invoice"
            );
            return Ok(existing.id);
        }

        let mime_type = document.mime_type.clone();
        let request = ExtractionRequest::from(document);

        let raw = match self.adapter.extract(&content_hash, &request).await {
            Ok(raw) => raw,
            Err(e) if e.is_definitive() => {
                // Park an empty Draft for manual follow-up; the error
                // travels on the invoice, not up the call stack.
                let mut parked = Invoice::new(content_hash.clone(), mime_type, &actor);
                parked.parked_error = Some(e.to_string());
                validate::validate(&mut parked);
                let stored = self.invoices.insert_invoice(parked).await?;
                warn!(invoice_id = %stored.id, error = %e, "Extraction failed, invoice parked in draft");
                return Ok(stored.id);
            }
            Err(e) => return Err(e.into()),
        };

        let mut invoice = normalize(raw, &content_hash, &mime_type, &actor, &self.extraction_config);
        validate::validate(&mut invoice);
        self.matcher.resolve(&mut invoice).await?;
        // Supplier resolution can clear the missing-supplier path.
        validate::validate(&mut invoice);
        let staged = self.pricer.classify_invoice(&mut invoice).await?;
        self.lifecycle.route(&mut invoice)?;

        let submitted_id = invoice.id;
        let stored = self.invoices.insert_invoice(invoice).await?;
        if stored.id != submitted_id {
            // Lost a concurrent duplicate-hash race; the winner already
            // recorded its own observations.
            return Ok(stored.id);
        }
        self.pricer.commit(staged).await?;
        info!(invoice_id = %stored.id, status = stored.status.as_str(), "Invoice ingested");

        if self.auto_finalize && self.lifecycle.can_auto_finalize(&stored) {
            self.finalize_and_reconcile(stored.id, stored.version, &actor)
                .await?;
        }
        Ok(stored.id)
    }

    /// Finalize an invoice and reconcile it against any pending
    /// delivery record. Used both for explicit finalization and the
    /// auto-finalize path.
    pub async fn finalize_and_reconcile(
        &self,
        invoice_id: Uuid,
        expected_version: u64,
        actor: &str,
    ) -> Result<Invoice> {
        let mut finalized = self.lifecycle.finalize(invoice_id, expected_version, actor).await?;

        if let Some(record) = self.remission.reconcile(&finalized).await? {
            finalized.remission_ref = Some(record.id);
            // Record goes in after the invoice update so a version
            // conflict never leaves the mutual reference half-applied.
            finalized = self
                .invoices
                .update_invoice(finalized.clone(), finalized.version)
                .await?;
            self.remission.commit(record).await?;
        }
        Ok(finalized)
    }

    /// Submit a batch over a bounded worker pool. Outcomes come back in
    /// input order; one failed document never aborts the rest.
    pub async fn bulk_submit(
        &self,
        documents: Vec<IncomingDocument>,
        cancel: &CancelHandle,
    ) -> Vec<SubmissionOutcome> {
        let mut outcomes: Vec<(usize, SubmissionOutcome)> = stream::iter(
            documents.into_iter().enumerate(),
        )
        .map(|(index, document)| {
            let pipeline = self.clone();
            let cancel = cancel.clone();
            async move {
                let file_name = document.file_name.clone();
                let outcome = if cancel.is_cancelled() {
                    SubmissionOutcome {
                        file_name,
                        invoice_id: None,
                        error: Some("cancelled before processing".to_string()),
                    }
                } else {
                    match pipeline.submit(document).await {
                        Ok(invoice_id) => SubmissionOutcome {
                            file_name,
                            invoice_id: Some(invoice_id),
                            error: None,
                        },
                        Err(e) => SubmissionOutcome {
                            file_name,
                            invoice_id: None,
                            error: Some(e.to_string()),
                        },
                    }
                };
                (index, outcome)
            }
        })
        .buffer_unordered(self.max_concurrent)
        .collect()
        .await;

        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionError, InvrecError};
    use crate::identity::StaticIdentity;
    use crate::mocks::MockExtractionProvider;
    use crate::models::invoice::InvoiceStatus;
    use crate::store::{MemoryStore, PriceStore};
    use pretty_assertions::assert_eq;

    fn pipeline_with(
        provider: Arc<MockExtractionProvider>,
        config: EngineConfig,
    ) -> (IngestionPipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity::new("tester"));
        let adapter = ExtractionAdapter::new(provider, config.extraction.clone());
        let pipeline = IngestionPipeline::new(
            adapter,
            SupplierMatcher::new(store.clone(), config.matching.clone()),
            PriceReconciler::new(store.clone(), config.pricing.clone()),
            LifecycleManager::new(store.clone(), config.lifecycle.clone()),
            RemissionReconciler::new(store.clone(), config.remission.clone()),
            store.clone(),
            identity,
            &config,
        );
        (pipeline, store)
    }

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.extraction.retry_base_delay_ms = 1;
        config
    }

    fn document(body: &str, file_name: &str) -> IncomingDocument {
        IncomingDocument {
            bytes: body.as_bytes().to_vec(),
            mime_type: "application/pdf".to_string(),
            file_name: Some(file_name.to_string()),
            hints: None,
        }
    }

    fn complete_doc(supplier: &str, doc_ref: &str) -> IncomingDocument {
        document(
            &format!(
                r#"{{
                    "supplier_name": "{supplier}",
                    "issue_date": "2024-03-01",
                    "document_ref": "{doc_ref}",
                    "confidence": 0.95,
                    "line_items": [
                        {{"description": "Widget", "quantity": "2", "unit_price": "10.00"}}
                    ]
                }}"#
            ),
            &format!("{doc_ref}.pdf"),
        )
    }

    #[tokio::test]
    async fn test_complete_document_lands_validated() {
        let provider = Arc::new(MockExtractionProvider::new());
        let (pipeline, store) = pipeline_with(provider, fast_config());

        let id = pipeline.submit(complete_doc("Acme", "INV-1")).await.unwrap();
        let invoice = store.get_invoice(id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Validated);
        assert!(invoice.supplier.is_resolved());
        assert!(invoice.missing_fields.is_empty());

        // First observation committed as the baseline.
        let supplier_id = invoice.supplier.resolved_id().unwrap();
        let baseline = store.latest_observation(supplier_id, "widget").await.unwrap();
        assert!(baseline.is_some());
    }

    #[tokio::test]
    async fn test_incomplete_document_lands_pending_review() {
        let provider = Arc::new(MockExtractionProvider::new());
        let (pipeline, store) = pipeline_with(provider, fast_config());

        let id = pipeline
            .submit(document(
                r#"{"supplier_name": "Acme", "confidence": 0.9}"#,
                "partial.pdf",
            ))
            .await
            .unwrap();
        let invoice = store.get_invoice(id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::PendingReview);
        assert!(invoice.missing_fields.contains("issue_date"));
        assert!(invoice.missing_fields.contains("line_items"));
    }

    #[tokio::test]
    async fn test_low_confidence_forces_review() {
        let provider = Arc::new(MockExtractionProvider::new());
        let (pipeline, store) = pipeline_with(provider, fast_config());

        let mut doc = complete_doc("Acme", "INV-9");
        let body = String::from_utf8(doc.bytes.clone()).unwrap();
        doc.bytes = body.replace("0.95", "0.40").into_bytes();

        let id = pipeline.submit(doc).await.unwrap();
        let invoice = store.get_invoice(id).await.unwrap().unwrap();
        assert!(invoice.low_confidence);
        assert_eq!(invoice.status, InvoiceStatus::PendingReview);
    }

    #[tokio::test]
    async fn test_duplicate_bytes_return_existing_invoice() {
        let provider = Arc::new(MockExtractionProvider::new());
        let (pipeline, store) = pipeline_with(provider.clone(), fast_config());

        let first = pipeline.submit(complete_doc("Acme", "INV-1")).await.unwrap();
        let second = pipeline.submit(complete_doc("Acme", "INV-1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.call_count(), 1);

        // One baseline observation, not two.
        let invoice = store.get_invoice(first).await.unwrap().unwrap();
        let supplier_id = invoice.supplier.resolved_id().unwrap();
        let history = store.observations(supplier_id, "widget").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_definitive_failure_parks_draft() {
        let provider = Arc::new(MockExtractionProvider::new());
        provider.queue_failure(ExtractionError::Unreadable("blank page".into()));
        let (pipeline, store) = pipeline_with(provider, fast_config());

        let id = pipeline
            .submit(document("not an invoice", "scan.pdf"))
            .await
            .unwrap();
        let invoice = store.get_invoice(id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert!(invoice.parked_error.as_deref().unwrap_or("").contains("blank page"));
        assert!(!invoice.missing_fields.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_transient_failure_is_an_error() {
        let provider = Arc::new(MockExtractionProvider::new());
        for _ in 0..3 {
            provider.queue_failure(ExtractionError::Timeout);
        }
        let (pipeline, store) = pipeline_with(provider, fast_config());

        let err = pipeline
            .submit(document("payload", "slow.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, InvrecError::Extraction(ExtractionError::Timeout)));
        // Nothing persisted.
        assert!(
            store
                .find_by_content_hash(&crate::intake::content_hash(b"payload"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_unsupported_mime_rejected_before_extraction() {
        let provider = Arc::new(MockExtractionProvider::new());
        let (pipeline, _) = pipeline_with(provider.clone(), fast_config());

        let mut doc = document("{}", "notes.txt");
        doc.mime_type = "text/plain".to_string();
        assert!(pipeline.submit(doc).await.is_err());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_bulk_submit_preserves_order_and_isolates_failures() {
        let provider = Arc::new(MockExtractionProvider::new());
        let (pipeline, _) = pipeline_with(provider, fast_config());

        let mut bad = document("{}", "bad.zip");
        bad.mime_type = "application/zip".to_string();
        let docs = vec![
            complete_doc("Acme", "INV-1"),
            bad,
            complete_doc("Contoso", "INV-2"),
        ];

        let outcomes = pipeline.bulk_submit(docs, &CancelHandle::new()).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].file_name.as_deref(), Some("INV-1.pdf"));
        assert!(outcomes[0].invoice_id.is_some());
        assert!(outcomes[1].error.is_some());
        assert_eq!(outcomes[2].file_name.as_deref(), Some("INV-2.pdf"));
        assert!(outcomes[2].invoice_id.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_batch_skips_unstarted_documents() {
        let provider = Arc::new(MockExtractionProvider::new());
        let (pipeline, _) = pipeline_with(provider, fast_config());

        let cancel = CancelHandle::new();
        cancel.cancel();
        let outcomes = pipeline
            .bulk_submit(vec![complete_doc("Acme", "INV-1")], &cancel)
            .await;
        assert_eq!(outcomes[0].error.as_deref(), Some("cancelled before processing"));
    }

    #[tokio::test]
    async fn test_auto_finalize_when_enabled() {
        let provider = Arc::new(MockExtractionProvider::new());
        let mut config = fast_config();
        config.lifecycle.auto_finalize = true;
        let (pipeline, store) = pipeline_with(provider, config);

        let id = pipeline.submit(complete_doc("Acme", "INV-1")).await.unwrap();
        let invoice = store.get_invoice(id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Finalized);
    }

    #[tokio::test]
    async fn test_auto_finalize_blocked_by_major_deviation() {
        let provider = Arc::new(MockExtractionProvider::new());
        let mut config = fast_config();
        config.lifecycle.auto_finalize = true;
        let (pipeline, store) = pipeline_with(provider, config);

        // Establish a 10.00 baseline, then bill at 20.00.
        pipeline.submit(complete_doc("Acme", "INV-1")).await.unwrap();
        let spiked = document(
            r#"{
                "supplier_name": "Acme",
                "issue_date": "2024-04-01",
                "document_ref": "INV-2",
                "confidence": 0.95,
                "line_items": [
                    {"description": "Widget", "quantity": "2", "unit_price": "20.00"}
                ]
            }"#,
            "INV-2.pdf",
        );
        let id = pipeline.submit(spiked).await.unwrap();
        let invoice = store.get_invoice(id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Validated);
        assert!(invoice.has_major_deviation());
        assert_eq!(store.list_alerts(None).await.unwrap().len(), 1);
    }
}
