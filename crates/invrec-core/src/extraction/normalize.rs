//! Normalization of provider output into the canonical invoice schema.
//!
//! Anything the provider returns that cannot be mapped is dropped with
//! a recorded warning, never silently coerced.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

use crate::extraction::{RawExtraction, RawLineItem};
use crate::models::config::ExtractionConfig;
use crate::models::invoice::{Invoice, LINE_TOTAL_TOLERANCE, LineItem, SupplierRef};

lazy_static! {
    static ref NON_ALNUM: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// Date formats seen across extraction providers, most specific first.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

/// Map a raw provider response into a canonical Draft invoice.
pub fn normalize(
    raw: RawExtraction,
    content_hash: &str,
    mime_type: &str,
    actor: &str,
    config: &ExtractionConfig,
) -> Invoice {
    let mut invoice = Invoice::new(content_hash, mime_type, actor);
    let mut warnings = Vec::new();

    invoice.extraction_confidence = raw.confidence;
    if raw.confidence < config.min_confidence {
        invoice.low_confidence = true;
        debug!(
            confidence = raw.confidence,
            threshold = config.min_confidence,
            "Extraction confidence below threshold"
        );
    }

    invoice.supplier = SupplierRef::Unresolved {
        raw_name: non_empty(raw.supplier_name),
        tax_id: non_empty(raw.supplier_tax_id),
    };

    if let Some(date_str) = non_empty(raw.issue_date) {
        match parse_issue_date(&date_str) {
            Some(date) => invoice.issue_date = Some(date),
            None => warnings.push(format!("unparseable issue_date: {date_str}")),
        }
    }

    invoice.document_ref = non_empty(raw.document_ref);

    for key in sorted_keys(&raw.extra) {
        warnings.push(format!("dropped unmapped provider field: {key}"));
    }

    for (idx, raw_item) in raw.line_items.into_iter().enumerate() {
        invoice
            .line_items
            .push(normalize_line_item(idx, raw_item, &mut warnings));
    }

    invoice.extraction_warnings = warnings;
    invoice
}

fn normalize_line_item(idx: usize, raw: RawLineItem, warnings: &mut Vec<String>) -> LineItem {
    let description = raw.description.unwrap_or_default().trim().to_string();
    if description.is_empty() {
        warnings.push(format!("line_items[{idx}].description missing"));
    }

    let item_key = derive_item_key(raw.sku.as_deref(), &description);

    let quantity = match raw.quantity {
        Some(q) => q,
        None => {
            warnings.push(format!("line_items[{idx}].quantity missing"));
            Decimal::ZERO
        }
    };
    let unit_price = match raw.unit_price {
        Some(p) => p,
        None => {
            warnings.push(format!("line_items[{idx}].unit_price missing"));
            Decimal::ZERO
        }
    };

    let computed = quantity * unit_price;
    let line_total = match raw.line_total {
        Some(declared) if (declared - computed).abs() > LINE_TOTAL_TOLERANCE => {
            warnings.push(format!(
                "line_items[{idx}].line_total {declared} differs from quantity x unit_price {computed}"
            ));
            computed
        }
        Some(declared) => declared,
        None => computed,
    };

    for key in sorted_keys(&raw.extra) {
        warnings.push(format!(
            "dropped unmapped provider field: line_items[{idx}].{key}"
        ));
    }

    LineItem {
        description,
        item_key,
        quantity,
        unit_price,
        line_total,
        price_deviation: None,
    }
}

/// Derive the pricing key for a line item: the sku when present,
/// otherwise the normalized description.
pub fn derive_item_key(sku: Option<&str>, description: &str) -> String {
    if let Some(sku) = sku {
        let sku = sku.trim();
        if !sku.is_empty() {
            return sku.to_lowercase();
        }
    }
    let lowered = description.to_lowercase();
    NON_ALNUM.replace_all(&lowered, " ").trim().to_string()
}

/// Parse a provider-formatted date against the known formats.
pub fn parse_issue_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn sorted_keys(map: &std::collections::HashMap<String, serde_json::Value>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}
