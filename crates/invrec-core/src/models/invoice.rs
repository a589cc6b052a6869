//! Canonical invoice data model.
//!
//! All provider outputs are normalized into this schema before any
//! downstream component sees them.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Allowed difference between a stored line total and quantity x unit price.
pub const LINE_TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// A supplier invoice moving through the reconciliation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Stable invoice id.
    pub id: Uuid,

    /// Supplier identity resolution state.
    pub supplier: SupplierRef,

    /// Date the invoice was issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,

    /// Supplier-side document reference (invoice number).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ref: Option<String>,

    /// SHA-256 hash of the raw document bytes, hex encoded.
    pub content_hash: String,

    /// Declared mime type of the source document.
    pub mime_type: String,

    /// Line items in document order.
    pub line_items: Vec<LineItem>,

    /// Lifecycle state.
    pub status: InvoiceStatus,

    /// Field paths that failed validation and await manual completion.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub missing_fields: BTreeSet<String>,

    /// Mandatory reason recorded when the invoice is deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_reason: Option<String>,

    /// Overall extraction confidence (0.0 - 1.0).
    pub extraction_confidence: f32,

    /// Set when confidence fell below the configured threshold; forces
    /// the invoice into PendingReview regardless of field completeness.
    #[serde(default)]
    pub low_confidence: bool,

    /// Warnings recorded during normalization (dropped fields, total
    /// mismatches). Never silently coerced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extraction_warnings: Vec<String>,

    /// Definitive extraction failure that parked this invoice in Draft
    /// for manual re-upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parked_error: Option<String>,

    /// Remission record matched after finalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remission_ref: Option<Uuid>,

    /// Monotonic counter for optimistic concurrency.
    pub version: u64,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Actor that performed the last mutation.
    pub last_modified_by: String,
}

/// Supplier identity resolution state for an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SupplierRef {
    /// Identity as declared by the provider, not yet matched.
    Unresolved {
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tax_id: Option<String>,
    },
    /// A fuzzy match above the similarity threshold, awaiting explicit
    /// confirmation. Never auto-resolved.
    Suggested { supplier_id: Uuid, score: f64 },
    /// Confirmed or exactly matched supplier.
    Resolved { supplier_id: Uuid },
}

impl SupplierRef {
    /// Whether the supplier identity is fully resolved.
    pub fn is_resolved(&self) -> bool {
        matches!(self, SupplierRef::Resolved { .. })
    }

    /// The resolved supplier id, if any.
    pub fn resolved_id(&self) -> Option<Uuid> {
        match self {
            SupplierRef::Resolved { supplier_id } => Some(*supplier_id),
            _ => None,
        }
    }

    /// Whether any identity information is present at all.
    pub fn has_identity(&self) -> bool {
        match self {
            SupplierRef::Unresolved { raw_name, tax_id } => {
                raw_name.as_deref().is_some_and(|n| !n.trim().is_empty())
                    || tax_id.as_deref().is_some_and(|t| !t.trim().is_empty())
            }
            _ => true,
        }
    }
}

impl Default for SupplierRef {
    fn default() -> Self {
        SupplierRef::Unresolved {
            raw_name: None,
            tax_id: None,
        }
    }
}

/// A single billed line on the invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    /// Product/service description as extracted.
    pub description: String,

    /// Derived key: sku when present, otherwise the normalized description.
    pub item_key: String,

    /// Billed quantity. Must be > 0 to validate.
    pub quantity: Decimal,

    /// Unit price. Must be >= 0 to validate.
    pub unit_price: Decimal,

    /// Line total. Kept within `LINE_TOTAL_TOLERANCE` of quantity x unit price.
    pub line_total: Decimal,

    /// Price deviation classification against the supplier baseline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_deviation: Option<PriceDeviation>,
}

impl LineItem {
    /// Check the stored total against quantity x unit price.
    pub fn total_is_consistent(&self) -> bool {
        (self.line_total - self.quantity * self.unit_price).abs() <= LINE_TOTAL_TOLERANCE
    }
}

/// Price deviation severity against the most recent observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDeviation {
    /// Within the minor threshold.
    None,
    /// Recorded but non-blocking.
    Minor,
    /// Blocks auto-finalize and raises a price-change alert.
    Major,
    /// No prior observation exists; current price becomes the baseline.
    Unknown,
}

/// Invoice lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    PendingReview,
    Validated,
    Finalized,
    /// Terminal. Retained for audit history, never physically removed.
    Deleted,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::PendingReview => "pending_review",
            InvoiceStatus::Validated => "validated",
            InvoiceStatus::Finalized => "finalized",
            InvoiceStatus::Deleted => "deleted",
        }
    }
}

/// One entry in the append-only deletion-history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionEntry {
    pub invoice_id: Uuid,
    /// State the invoice was in immediately before deletion.
    pub prior_status: InvoiceStatus,
    pub reason: String,
    pub actor: String,
    pub deleted_at: DateTime<Utc>,
}

/// A blocking price-change alert raised for a Major deviation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceAlert {
    pub supplier_id: Uuid,
    pub invoice_id: Uuid,
    pub item_key: String,
    pub baseline_price: Decimal,
    pub observed_price: Decimal,
    /// Signed relative deviation, e.g. 0.30 for +30%.
    pub deviation_pct: Decimal,
    pub classification: PriceDeviation,
    pub raised_at: DateTime<Utc>,
}

impl Invoice {
    /// Create a fresh Draft invoice for a document.
    pub fn new(content_hash: impl Into<String>, mime_type: impl Into<String>, actor: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            supplier: SupplierRef::default(),
            issue_date: None,
            document_ref: None,
            content_hash: content_hash.into(),
            mime_type: mime_type.into(),
            line_items: Vec::new(),
            status: InvoiceStatus::Draft,
            missing_fields: BTreeSet::new(),
            deletion_reason: None,
            extraction_confidence: 0.0,
            low_confidence: false,
            extraction_warnings: Vec::new(),
            parked_error: None,
            remission_ref: None,
            version: 0,
            created_at: Utc::now(),
            last_modified_by: actor.to_string(),
        }
    }

    /// Sum of all line totals.
    pub fn total_amount(&self) -> Decimal {
        self.line_items.iter().map(|li| li.line_total).sum()
    }

    /// Whether any line item carries a Major deviation.
    pub fn has_major_deviation(&self) -> bool {
        self.line_items
            .iter()
            .any(|li| li.price_deviation == Some(PriceDeviation::Major))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn item(quantity: &str, unit_price: &str, line_total: &str) -> LineItem {
        LineItem {
            description: "widget".to_string(),
            item_key: "widget".to_string(),
            quantity: Decimal::from_str(quantity).unwrap(),
            unit_price: Decimal::from_str(unit_price).unwrap(),
            line_total: Decimal::from_str(line_total).unwrap(),
            price_deviation: None,
        }
    }

    #[test]
    fn test_line_total_tolerance() {
        assert!(item("3", "9.99", "29.97").total_is_consistent());
        assert!(item("3", "9.99", "29.98").total_is_consistent());
        assert!(!item("3", "9.99", "30.10").total_is_consistent());
    }

    #[test]
    fn test_tolerance_constant_is_one_cent() {
        assert_eq!(LINE_TOTAL_TOLERANCE, Decimal::from_str("0.01").unwrap());
    }

    #[test]
    fn test_supplier_ref_identity() {
        let empty = SupplierRef::Unresolved {
            raw_name: Some("  ".to_string()),
            tax_id: None,
        };
        assert!(!empty.has_identity());

        let named = SupplierRef::Unresolved {
            raw_name: Some("ACME Corp.".to_string()),
            tax_id: None,
        };
        assert!(named.has_identity());
        assert!(!named.is_resolved());

        let resolved = SupplierRef::Resolved {
            supplier_id: Uuid::new_v4(),
        };
        assert!(resolved.is_resolved());
        assert!(resolved.resolved_id().is_some());
    }

    #[test]
    fn test_total_amount() {
        let mut invoice = Invoice::new("hash", "application/pdf", "tester");
        invoice.line_items.push(item("2", "10.00", "20.00"));
        invoice.line_items.push(item("1", "5.50", "5.50"));
        assert_eq!(invoice.total_amount(), Decimal::from_str("25.50").unwrap());
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&InvoiceStatus::PendingReview).unwrap();
        assert_eq!(json, "\"pending_review\"");
    }
}
