//! Supplier registry and price observation models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A supplier in the registry.
///
/// Exactly one record may exist per `normalized_name_key`, and per
/// `tax_id` when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub id: Uuid,

    /// Legal name as first seen on an invoice.
    pub legal_name: String,

    /// Case-folded, punctuation- and suffix-stripped name. Unique.
    pub normalized_name_key: String,

    /// Tax identifier. Unique when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Supplier {
    pub fn new(
        legal_name: impl Into<String>,
        normalized_name_key: impl Into<String>,
        tax_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            legal_name: legal_name.into(),
            normalized_name_key: normalized_name_key.into(),
            tax_id,
            created_at: Utc::now(),
        }
    }
}

/// An immutable price-at-time-of-invoice record.
///
/// Append-only; never mutated or deleted. `source_invoice_id` is a weak
/// reference so the observation log never owns invoices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
    pub supplier_id: Uuid,
    pub item_key: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
    pub source_invoice_id: Uuid,
}
