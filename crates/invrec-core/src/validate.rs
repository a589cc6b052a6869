//! Field validation over the canonical invoice schema.
//!
//! A missing field is not an exceptional condition here; it is a normal
//! routed state. Violations are recorded as field paths on the invoice
//! and the lifecycle manager routes it to PendingReview.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::invoice::Invoice;

/// Corrected values resubmitted for an invoice in PendingReview.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_tax_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<LineItemPatch>,
}

/// A correction for one existing line item, addressed by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemPatch {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
}

/// Compute the set of missing/invalid field paths for an invoice.
pub fn missing_fields(invoice: &Invoice) -> BTreeSet<String> {
    let mut missing = BTreeSet::new();

    if !invoice.supplier.has_identity() {
        missing.insert("supplier".to_string());
    }
    if invoice.issue_date.is_none() {
        missing.insert("issue_date".to_string());
    }
    if invoice.document_ref.is_none() {
        missing.insert("document_ref".to_string());
    }
    if invoice.line_items.is_empty() {
        missing.insert("line_items".to_string());
    }
    for (idx, item) in invoice.line_items.iter().enumerate() {
        if item.quantity <= Decimal::ZERO {
            missing.insert(format!("line_items[{idx}].quantity"));
        }
        if item.unit_price < Decimal::ZERO {
            missing.insert(format!("line_items[{idx}].unit_price"));
        }
    }

    missing
}

/// Run validation and record the result on the invoice. Returns whether
/// the invoice is complete.
pub fn validate(invoice: &mut Invoice) -> bool {
    invoice.missing_fields = missing_fields(invoice);
    invoice.missing_fields.is_empty()
}

/// Apply resubmitted corrections, then re-validate.
///
/// Only the fields actually fixed clear from `missing_fields`; anything
/// still violating a rule remains outstanding.
pub fn apply_patch(invoice: &mut Invoice, patch: &FieldPatch) {
    use crate::models::invoice::SupplierRef;

    if patch.supplier_name.is_some() || patch.supplier_tax_id.is_some() {
        // Only an unresolved identity can be re-declared; a resolved or
        // suggested supplier is corrected through the matcher instead.
        if let SupplierRef::Unresolved { raw_name, tax_id } = &mut invoice.supplier {
            if let Some(name) = &patch.supplier_name {
                *raw_name = Some(name.clone());
            }
            if let Some(tax) = &patch.supplier_tax_id {
                *tax_id = Some(tax.clone());
            }
        }
    }
    if let Some(date) = patch.issue_date {
        invoice.issue_date = Some(date);
    }
    if let Some(doc_ref) = &patch.document_ref {
        invoice.document_ref = Some(doc_ref.clone());
    }
    for item_patch in &patch.line_items {
        if let Some(item) = invoice.line_items.get_mut(item_patch.index) {
            if let Some(quantity) = item_patch.quantity {
                item.quantity = quantity;
            }
            if let Some(unit_price) = item_patch.unit_price {
                item.unit_price = unit_price;
            }
            item.line_total = item.quantity * item.unit_price;
        }
    }

    validate(invoice);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::invoice::{LineItem, SupplierRef};
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn item(quantity: &str, unit_price: &str) -> LineItem {
        let quantity = Decimal::from_str(quantity).unwrap();
        let unit_price = Decimal::from_str(unit_price).unwrap();
        LineItem {
            description: "widget".to_string(),
            item_key: "widget".to_string(),
            quantity,
            unit_price,
            line_total: quantity * unit_price,
            price_deviation: None,
        }
    }

    fn complete_invoice() -> Invoice {
        let mut invoice = Invoice::new("hash", "application/pdf", "tester");
        invoice.supplier = SupplierRef::Unresolved {
            raw_name: Some("Acme".to_string()),
            tax_id: None,
        };
        invoice.issue_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        invoice.document_ref = Some("INV-1".to_string());
        invoice.line_items.push(item("2", "10.00"));
        invoice
    }

    #[test]
    fn test_complete_invoice_has_no_missing_fields() {
        let mut invoice = complete_invoice();
        assert!(validate(&mut invoice));
        assert!(invoice.missing_fields.is_empty());
    }

    #[test]
    fn test_empty_invoice_collects_all_paths() {
        let mut invoice = Invoice::new("hash", "application/pdf", "tester");
        assert!(!validate(&mut invoice));
        let expected: BTreeSet<String> = ["supplier", "issue_date", "document_ref", "line_items"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(invoice.missing_fields, expected);
    }

    #[test]
    fn test_line_item_rules() {
        let mut invoice = complete_invoice();
        invoice.line_items.push(item("0", "5.00"));
        invoice.line_items.push(item("1", "-2.00"));
        validate(&mut invoice);
        assert!(
            invoice
                .missing_fields
                .contains("line_items[1].quantity")
        );
        assert!(
            invoice
                .missing_fields
                .contains("line_items[2].unit_price")
        );
        // Zero unit price is allowed.
        invoice.line_items[0].unit_price = Decimal::ZERO;
        invoice.line_items[0].line_total = Decimal::ZERO;
        validate(&mut invoice);
        assert!(!invoice.missing_fields.contains("line_items[0].unit_price"));
    }

    #[test]
    fn test_patch_clears_only_fixed_fields() {
        let mut invoice = Invoice::new("hash", "application/pdf", "tester");
        invoice.line_items.push(item("0", "10.00"));
        validate(&mut invoice);
        assert!(invoice.missing_fields.contains("issue_date"));
        assert!(invoice.missing_fields.contains("line_items[0].quantity"));

        let patch = FieldPatch {
            issue_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..FieldPatch::default()
        };
        apply_patch(&mut invoice, &patch);

        assert!(!invoice.missing_fields.contains("issue_date"));
        // Untouched violations remain outstanding.
        assert!(invoice.missing_fields.contains("line_items[0].quantity"));
        assert!(invoice.missing_fields.contains("supplier"));
    }

    #[test]
    fn test_line_item_patch_recomputes_total() {
        let mut invoice = complete_invoice();
        invoice.line_items[0].quantity = Decimal::ZERO;
        validate(&mut invoice);

        let patch = FieldPatch {
            line_items: vec![LineItemPatch {
                index: 0,
                quantity: Some(Decimal::from_str("4").unwrap()),
                unit_price: None,
            }],
            ..FieldPatch::default()
        };
        apply_patch(&mut invoice, &patch);

        assert!(invoice.missing_fields.is_empty());
        assert_eq!(
            invoice.line_items[0].line_total,
            Decimal::from_str("40.00").unwrap()
        );
        assert!(invoice.line_items[0].total_is_consistent());
    }
}
