//! Price-deviation detection against per-supplier baselines.
//!
//! Classification and persistence are split: `classify_invoice` reads
//! baselines and stages the new observations and alerts without writing
//! anything, and `commit` appends them only after the invoice itself
//! has been persisted. A submission that loses the duplicate-hash race
//! never pollutes the observation log.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::config::PricingConfig;
use crate::models::invoice::{Invoice, PriceAlert, PriceDeviation};
use crate::models::supplier::PriceObservation;
use crate::store::PriceStore;

/// Staged side effects of classifying one invoice. Committed only after
/// the invoice wins its insert.
#[derive(Debug, Default)]
pub struct PricingOutcome {
    pub observations: Vec<PriceObservation>,
    pub alerts: Vec<PriceAlert>,
}

impl PricingOutcome {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.alerts.is_empty()
    }
}

/// Classifies line-item prices against the most recent observation for
/// the same (supplier, item key).
#[derive(Clone)]
pub struct PriceReconciler {
    prices: Arc<dyn PriceStore>,
    config: PricingConfig,
}

impl PriceReconciler {
    pub fn new(prices: Arc<dyn PriceStore>, config: PricingConfig) -> Self {
        Self { prices, config }
    }

    /// Classify one observed price against a baseline. Returns the
    /// signed relative deviation and its severity. A missing or zero
    /// baseline yields `Unknown` with zero deviation.
    pub fn classify(&self, baseline: Option<Decimal>, observed: Decimal) -> (Decimal, PriceDeviation) {
        let Some(baseline) = baseline.filter(|b| !b.is_zero()) else {
            return (Decimal::ZERO, PriceDeviation::Unknown);
        };
        let deviation_pct = (observed - baseline) / baseline;
        let magnitude = deviation_pct.abs();
        let severity = if magnitude >= self.config.major_threshold {
            PriceDeviation::Major
        } else if magnitude >= self.config.minor_threshold {
            PriceDeviation::Minor
        } else {
            PriceDeviation::None
        };
        (deviation_pct, severity)
    }

    /// Annotate every line item with its deviation classification and
    /// stage the observations and alerts that should be recorded once
    /// the invoice is persisted.
    ///
    /// Only runs against a resolved supplier; the caller guards that.
    pub async fn classify_invoice(&self, invoice: &mut Invoice) -> Result<PricingOutcome> {
        let Some(supplier_id) = invoice.supplier.resolved_id() else {
            return Ok(PricingOutcome::default());
        };

        let mut outcome = PricingOutcome::default();
        let now = Utc::now();

        for item in &mut invoice.line_items {
            if item.item_key.is_empty() {
                continue;
            }
            let baseline = self
                .prices
                .latest_observation(supplier_id, &item.item_key)
                .await?;

            let (deviation_pct, severity) =
                self.classify(baseline.as_ref().map(|o| o.price), item.unit_price);
            item.price_deviation = Some(severity);

            match severity {
                PriceDeviation::Major => {
                    let baseline_price = baseline.map(|o| o.price).unwrap_or_default();
                    warn!(
                        invoice_id = %invoice.id,
                        supplier_id = %supplier_id,
                        item_key = %item.item_key,
                        %baseline_price,
                        observed = %item.unit_price,
                        deviation_pct = %deviation_pct,
                        "Major price deviation, auto-finalize blocked"
                    );
                    outcome.alerts.push(PriceAlert {
                        supplier_id,
                        invoice_id: invoice.id,
                        item_key: item.item_key.clone(),
                        baseline_price,
                        observed_price: item.unit_price,
                        deviation_pct,
                        classification: severity,
                        raised_at: now,
                    });
                }
                PriceDeviation::Unknown => {
                    info!(
                        supplier_id = %supplier_id,
                        item_key = %item.item_key,
                        price = %item.unit_price,
                        "First observation, price becomes the baseline"
                    );
                }
                _ => {}
            }

            outcome.observations.push(PriceObservation {
                supplier_id,
                item_key: item.item_key.clone(),
                price: item.unit_price,
                observed_at: now,
                source_invoice_id: invoice.id,
            });
        }

        Ok(outcome)
    }

    /// Append the staged observations and alerts.
    pub async fn commit(&self, outcome: PricingOutcome) -> Result<()> {
        for observation in outcome.observations {
            self.prices.append_observation(observation).await?;
        }
        for alert in outcome.alerts {
            self.prices.append_alert(alert).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::invoice::{LineItem, SupplierRef};
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn reconciler(store: &Arc<MemoryStore>) -> PriceReconciler {
        PriceReconciler::new(store.clone(), PricingConfig::default())
    }

    fn invoice_for(supplier_id: Uuid, unit_price: &str) -> Invoice {
        let mut invoice = Invoice::new("hash", "application/pdf", "tester");
        invoice.supplier = SupplierRef::Resolved { supplier_id };
        let price = dec(unit_price);
        invoice.line_items.push(LineItem {
            description: "widget".to_string(),
            item_key: "widget".to_string(),
            quantity: Decimal::ONE,
            unit_price: price,
            line_total: price,
            price_deviation: None,
        });
        invoice
    }

    async fn seed_baseline(store: &Arc<MemoryStore>, supplier_id: Uuid, price: &str) {
        store
            .append_observation(PriceObservation {
                supplier_id,
                item_key: "widget".to_string(),
                price: dec(price),
                observed_at: Utc::now(),
                source_invoice_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_classification_bands() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);
        let baseline = Some(dec("100.00"));

        // 4% -> unchanged, 12% -> minor, 30% -> major.
        assert_eq!(reconciler.classify(baseline, dec("104.00")).1, PriceDeviation::None);
        assert_eq!(reconciler.classify(baseline, dec("112.00")).1, PriceDeviation::Minor);
        assert_eq!(reconciler.classify(baseline, dec("130.00")).1, PriceDeviation::Major);
        // Thresholds are inclusive.
        assert_eq!(reconciler.classify(baseline, dec("105.00")).1, PriceDeviation::Minor);
        assert_eq!(reconciler.classify(baseline, dec("115.00")).1, PriceDeviation::Major);
        // Decreases count by magnitude.
        assert_eq!(reconciler.classify(baseline, dec("80.00")).1, PriceDeviation::Major);
    }

    #[test]
    fn test_zero_or_missing_baseline_is_unknown() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);
        assert_eq!(reconciler.classify(None, dec("10.00")).1, PriceDeviation::Unknown);
        assert_eq!(
            reconciler.classify(Some(Decimal::ZERO), dec("10.00")).1,
            PriceDeviation::Unknown
        );
    }

    #[tokio::test]
    async fn test_first_observation_becomes_baseline() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);
        let supplier_id = Uuid::new_v4();

        let mut invoice = invoice_for(supplier_id, "10.00");
        let outcome = reconciler.classify_invoice(&mut invoice).await.unwrap();
        assert_eq!(invoice.line_items[0].price_deviation, Some(PriceDeviation::Unknown));
        assert!(outcome.alerts.is_empty());
        reconciler.commit(outcome).await.unwrap();

        let mut second = invoice_for(supplier_id, "10.40");
        let outcome = reconciler.classify_invoice(&mut second).await.unwrap();
        assert_eq!(second.line_items[0].price_deviation, Some(PriceDeviation::None));
        assert!(outcome.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_major_deviation_raises_alert() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);
        let supplier_id = Uuid::new_v4();
        seed_baseline(&store, supplier_id, "100.00").await;

        let mut invoice = invoice_for(supplier_id, "130.00");
        let outcome = reconciler.classify_invoice(&mut invoice).await.unwrap();

        assert!(invoice.has_major_deviation());
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.alerts[0].deviation_pct, dec("0.30"));

        // Nothing lands in the store until commit.
        assert!(store.list_alerts(None).await.unwrap().is_empty());
        reconciler.commit(outcome).await.unwrap();
        let alerts = store.list_alerts(Some(supplier_id)).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].observed_price, dec("130.00"));
    }

    #[tokio::test]
    async fn test_unresolved_supplier_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);

        let mut invoice = Invoice::new("hash", "application/pdf", "tester");
        invoice.line_items.push(LineItem {
            description: "widget".to_string(),
            item_key: "widget".to_string(),
            quantity: Decimal::ONE,
            unit_price: dec("10.00"),
            line_total: dec("10.00"),
            price_deviation: None,
        });
        let outcome = reconciler.classify_invoice(&mut invoice).await.unwrap();
        assert!(outcome.is_empty());
        assert_eq!(invoice.line_items[0].price_deviation, None);
    }

    #[tokio::test]
    async fn test_latest_observation_is_the_baseline() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(&store);
        let supplier_id = Uuid::new_v4();
        seed_baseline(&store, supplier_id, "100.00").await;

        // Move the baseline with an intermediate commit.
        let mut bump = invoice_for(supplier_id, "110.00");
        let outcome = reconciler.classify_invoice(&mut bump).await.unwrap();
        reconciler.commit(outcome).await.unwrap();

        // 113 vs the new 110 baseline is under 5%, not 13% vs 100.
        let mut invoice = invoice_for(supplier_id, "113.00");
        reconciler.classify_invoice(&mut invoice).await.unwrap();
        assert_eq!(invoice.line_items[0].price_deviation, Some(PriceDeviation::None));
    }
}
