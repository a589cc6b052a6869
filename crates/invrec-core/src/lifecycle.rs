//! Invoice lifecycle state machine.
//!
//! Draft -> PendingReview -> Validated -> Finalized, with Deleted
//! reachable from every state and terminal. All status changes go
//! through the version-checked store update.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{InvrecError, LifecycleError, Result};
use crate::models::config::LifecycleConfig;
use crate::models::invoice::{DeletionEntry, Invoice, InvoiceStatus};
use crate::store::InvoiceStore;

/// Whether the state machine permits a transition.
pub fn transition_allowed(from: InvoiceStatus, to: InvoiceStatus) -> bool {
    use InvoiceStatus::*;
    matches!(
        (from, to),
        (Draft, PendingReview)
            | (Draft, Validated)
            | (PendingReview, Validated)
            | (Draft, Deleted)
            | (PendingReview, Deleted)
            | (Validated, Finalized)
            | (Validated, Deleted)
            | (Finalized, Deleted)
    )
}

/// Check a transition, returning the state-machine error on refusal.
pub fn ensure_transition(
    from: InvoiceStatus,
    to: InvoiceStatus,
) -> std::result::Result<(), LifecycleError> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition { from, to })
    }
}

/// Per-invoice result of a bulk lifecycle operation. One failing
/// invoice never aborts the rest of the batch.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub invoice_id: Uuid,
    /// Version after the update, when the operation succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drives invoice status changes and the deletion audit log.
#[derive(Clone)]
pub struct LifecycleManager {
    invoices: Arc<dyn InvoiceStore>,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(invoices: Arc<dyn InvoiceStore>, config: LifecycleConfig) -> Self {
        Self { invoices, config }
    }

    /// Route an invoice out of Draft (or back out of PendingReview)
    /// based on its validation outcome. Mutates the status in place;
    /// the caller persists.
    pub fn route(&self, invoice: &mut Invoice) -> Result<()> {
        let target = if !invoice.missing_fields.is_empty()
            || invoice.low_confidence
            || !invoice.supplier.is_resolved()
        {
            InvoiceStatus::PendingReview
        } else {
            InvoiceStatus::Validated
        };

        if invoice.status == target {
            return Ok(());
        }
        ensure_transition(invoice.status, target).map_err(InvrecError::Lifecycle)?;
        info!(invoice_id = %invoice.id, from = invoice.status.as_str(), to = target.as_str(), "Routed invoice");
        invoice.status = target;
        Ok(())
    }

    /// Whether the invoice qualifies for automatic finalization: the
    /// feature is on, the invoice is Validated, and no line carries a
    /// Major deviation. Explicit finalize is not bound by the Major
    /// check; automatic finalize is.
    pub fn can_auto_finalize(&self, invoice: &Invoice) -> bool {
        self.config.auto_finalize
            && invoice.status == InvoiceStatus::Validated
            && !invoice.has_major_deviation()
    }

    /// Explicitly finalize a Validated invoice.
    ///
    /// A Major price deviation does not block an explicit finalize; the
    /// alert trail stands on its own.
    pub async fn finalize(
        &self,
        invoice_id: Uuid,
        expected_version: u64,
        actor: &str,
    ) -> Result<Invoice> {
        let mut invoice = self
            .invoices
            .get_invoice(invoice_id)
            .await?
            .ok_or(InvrecError::InvoiceNotFound(invoice_id))?;

        ensure_transition(invoice.status, InvoiceStatus::Finalized)
            .map_err(InvrecError::Lifecycle)?;
        if !invoice.missing_fields.is_empty() {
            return Err(LifecycleError::NotReadyToFinalize(format!(
                "missing fields: {}",
                invoice
                    .missing_fields
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
            .into());
        }
        if !invoice.supplier.is_resolved() {
            return Err(
                LifecycleError::NotReadyToFinalize("supplier not resolved".to_string()).into(),
            );
        }
        if invoice.has_major_deviation() {
            warn!(invoice_id = %invoice_id, "Finalizing despite major price deviation");
        }

        invoice.status = InvoiceStatus::Finalized;
        invoice.last_modified_by = actor.to_string();
        let stored = self.invoices.update_invoice(invoice, expected_version).await?;
        info!(invoice_id = %invoice_id, version = stored.version, "Invoice finalized");
        Ok(stored)
    }

    /// Soft-delete an invoice. The record stays in the store with
    /// status Deleted and the reason is appended to the audit log.
    ///
    /// The reason is checked before any state is read or changed.
    pub async fn delete(
        &self,
        invoice_id: Uuid,
        reason: &str,
        expected_version: u64,
        actor: &str,
    ) -> Result<Invoice> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LifecycleError::MissingDeletionReason.into());
        }

        let mut invoice = self
            .invoices
            .get_invoice(invoice_id)
            .await?
            .ok_or(InvrecError::InvoiceNotFound(invoice_id))?;

        let prior_status = invoice.status;
        ensure_transition(prior_status, InvoiceStatus::Deleted).map_err(InvrecError::Lifecycle)?;

        invoice.status = InvoiceStatus::Deleted;
        invoice.deletion_reason = Some(reason.to_string());
        invoice.last_modified_by = actor.to_string();
        let stored = self.invoices.update_invoice(invoice, expected_version).await?;

        self.invoices
            .append_deletion(DeletionEntry {
                invoice_id,
                prior_status,
                reason: reason.to_string(),
                actor: actor.to_string(),
                deleted_at: Utc::now(),
            })
            .await?;
        info!(invoice_id = %invoice_id, prior_status = prior_status.as_str(), "Invoice deleted");
        Ok(stored)
    }

    /// Delete a batch with a shared reason. Each invoice is handled
    /// independently at its current stored version; one failure never
    /// aborts the rest.
    pub async fn bulk_delete(
        &self,
        invoice_ids: &[Uuid],
        reason: &str,
        actor: &str,
    ) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(invoice_ids.len());
        for &id in invoice_ids {
            let result = match self.current_version(id).await {
                Ok(version) => self.delete(id, reason, version, actor).await,
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
        outcomes
    }

    /// Current stored version, for callers operating without a version
    /// the user supplied.
    pub async fn current_version(&self, invoice_id: Uuid) -> Result<u64> {
        Ok(self
            .invoices
            .get_invoice(invoice_id)
            .await?
            .ok_or(InvrecError::InvoiceNotFound(invoice_id))?
            .version)
    }
}
