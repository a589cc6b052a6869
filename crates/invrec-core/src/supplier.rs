//! Supplier matching: declared identity against the registry.
//!
//! Match order: exact tax id, exact normalized name key, similarity
//! above the configured threshold (suggested only, requires explicit
//! confirmation), then new-supplier creation.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::models::config::MatchingConfig;
use crate::models::invoice::{Invoice, SupplierRef};
use crate::models::supplier::Supplier;
use crate::store::SupplierStore;

lazy_static! {
    static ref NON_ALNUM: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// Legal-form suffixes stripped from the end of supplier names.
const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "ltd", "limited", "corp", "corporation", "co", "company",
    "gmbh", "ag", "kg", "sa", "sarl", "srl", "bv", "nv", "plc", "oy", "ab",
];

/// How the matcher settled a supplier identity.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// The invoice already carried a resolved supplier.
    AlreadyResolved(Uuid),
    /// Exact match on tax id or name key.
    Resolved(Uuid),
    /// Fuzzy match awaiting explicit confirmation.
    Suggested { supplier_id: Uuid, score: f64 },
    /// No match; a new registry record was created (or an earlier
    /// concurrent creator won and we were redirected to it).
    Created(Uuid),
    /// The invoice carries no supplier identity at all.
    NoIdentity,
}

/// Resolves declared supplier identities against the registry.
#[derive(Clone)]
pub struct SupplierMatcher {
    suppliers: Arc<dyn SupplierStore>,
    config: MatchingConfig,
}

impl SupplierMatcher {
    pub fn new(suppliers: Arc<dyn SupplierStore>, config: MatchingConfig) -> Self {
        Self { suppliers, config }
    }

    /// Resolve the invoice's supplier reference in place.
    pub async fn resolve(&self, invoice: &mut Invoice) -> Result<MatchOutcome> {
        let (raw_name, tax_id) = match &invoice.supplier {
            SupplierRef::Resolved { supplier_id } => {
                return Ok(MatchOutcome::AlreadyResolved(*supplier_id));
            }
            SupplierRef::Suggested { supplier_id, score } => {
                // A pending suggestion stays pending until confirmed.
                return Ok(MatchOutcome::Suggested {
                    supplier_id: *supplier_id,
                    score: *score,
                });
            }
            SupplierRef::Unresolved { raw_name, tax_id } => (raw_name.clone(), tax_id.clone()),
        };

        if let Some(tax_id) = tax_id.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(supplier) = self.suppliers.find_by_tax_id(tax_id).await? {
                debug!(supplier_id = %supplier.id, tax_id, "Exact tax id match");
                invoice.supplier = SupplierRef::Resolved {
                    supplier_id: supplier.id,
                };
                return Ok(MatchOutcome::Resolved(supplier.id));
            }
        }

        let Some(raw_name) = raw_name.filter(|n| !n.trim().is_empty()) else {
            return Ok(MatchOutcome::NoIdentity);
        };
        let name_key = normalize_supplier_name(&raw_name);
        if name_key.is_empty() {
            return Ok(MatchOutcome::NoIdentity);
        }

        if let Some(supplier) = self.suppliers.find_by_name_key(&name_key).await? {
            debug!(supplier_id = %supplier.id, name_key = %name_key, "Exact name key match");
            invoice.supplier = SupplierRef::Resolved {
                supplier_id: supplier.id,
            };
            return Ok(MatchOutcome::Resolved(supplier.id));
        }

        if let Some((candidate, score)) = self.best_similarity(&name_key).await? {
            if score >= self.config.similarity_threshold {
                info!(
                    supplier_id = %candidate.id,
                    score,
                    raw_name = %raw_name,
                    "Suggesting fuzzy supplier match, confirmation required"
                );
                invoice.supplier = SupplierRef::Suggested {
                    supplier_id: candidate.id,
                    score,
                };
                return Ok(MatchOutcome::Suggested {
                    supplier_id: candidate.id,
                    score,
                });
            }
        }

        let created = self
            .suppliers
            .create_supplier(Supplier::new(raw_name.trim(), name_key, tax_id))
            .await?;
        info!(supplier_id = %created.id, legal_name = %created.legal_name, "Registered supplier");
        invoice.supplier = SupplierRef::Resolved {
            supplier_id: created.id,
        };
        Ok(MatchOutcome::Created(created.id))
    }

    async fn best_similarity(&self, name_key: &str) -> Result<Option<(Supplier, f64)>> {
        let mut best: Option<(Supplier, f64)> = None;
        for supplier in self.suppliers.list_suppliers().await? {
            let score = name_similarity(name_key, &supplier.normalized_name_key);
            if best.as_ref().is_none_or(|(_, b)| score > *b) {
                best = Some((supplier, score));
            }
        }
        Ok(best)
    }
}

/// Normalize a supplier name into its registry key: case-fold, strip
/// punctuation, drop trailing legal-form suffixes.
pub fn normalize_supplier_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let cleaned = NON_ALNUM.replace_all(&lowered, " ");
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    while tokens.len() > 1 && LEGAL_SUFFIXES.contains(tokens.last().unwrap_or(&"")) {
        tokens.pop();
    }
    tokens.join(" ")
}

/// Name similarity in [0, 1] based on Levenshtein edit distance.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
