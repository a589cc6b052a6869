//! Delivery (remission) records reconciled against finalized invoices.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A delivery record from the receiving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemissionRecord {
    pub id: Uuid,

    pub supplier_id: Uuid,

    /// Supplier document reference, when the delivery note carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ref: Option<String>,

    /// Date the goods were received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<NaiveDate>,

    /// Total declared on the delivery note, used for amount-proximity
    /// matching when no document reference is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_total: Option<Decimal>,

    /// Received quantities per item key.
    pub delivered_items: Vec<DeliveredItem>,

    /// Invoice this record was matched against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_invoice: Option<Uuid>,

    pub status: ReconciliationStatus,
}

impl RemissionRecord {
    pub fn new(supplier_id: Uuid, delivered_items: Vec<DeliveredItem>) -> Self {
        Self {
            id: Uuid::new_v4(),
            supplier_id,
            document_ref: None,
            delivered_at: None,
            declared_total: None,
            delivered_items,
            matched_invoice: None,
            status: ReconciliationStatus::Unmatched,
        }
    }

    /// Received quantity for an item key, summed across entries.
    pub fn delivered_quantity(&self, item_key: &str) -> Decimal {
        self.delivered_items
            .iter()
            .filter(|d| d.item_key == item_key)
            .map(|d| d.quantity)
            .sum()
    }
}

/// One received item line on a delivery note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredItem {
    pub item_key: String,
    pub quantity: Decimal,
}

/// Outcome of matching a delivery against a finalized invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Unmatched,
    Matched,
    /// Billed and received quantities disagree for at least one item.
    QuantityMismatch,
}
