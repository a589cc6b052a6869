//! Extraction adapter: the boundary to the external AI
//! document-understanding capability.
//!
//! The provider is called exactly once per distinct content hash; the
//! result is cached so identical bytes+hints replay the stored response
//! instead of re-invoking the provider. Transient failures are retried
//! with exponential backoff; definitive failures are not.

pub mod http;
pub mod normalize;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::ExtractionError;
use crate::intake::IncomingDocument;
use crate::models::config::ExtractionConfig;

pub use http::HttpExtractionProvider;
pub use normalize::normalize;

/// A single extraction request forwarded to the provider.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
    pub hints: Option<String>,
}

impl From<IncomingDocument> for ExtractionRequest {
    fn from(document: IncomingDocument) -> Self {
        Self {
            bytes: document.bytes,
            mime_type: document.mime_type,
            file_name: document.file_name,
            hints: document.hints,
        }
    }
}

/// Loosely-typed provider output, before normalization into the
/// canonical schema. Unknown fields are captured so they can be dropped
/// with a recorded warning rather than silently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawExtraction {
    pub supplier_name: Option<String>,
    pub supplier_tax_id: Option<String>,
    /// Issue date as the provider printed it; parsed during normalization.
    pub issue_date: Option<String>,
    pub document_ref: Option<String>,
    #[serde(default)]
    pub line_items: Vec<RawLineItem>,
    #[serde(default)]
    pub confidence: f32,
    /// Provider fields with no canonical mapping.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// One provider-reported line item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLineItem {
    pub description: Option<String>,
    pub sku: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub line_total: Option<Decimal>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// The external extraction capability.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError>;
}

/// Wraps a provider with per-content-hash caching and a bounded
/// retry-with-backoff policy.
#[derive(Clone)]
pub struct ExtractionAdapter {
    provider: Arc<dyn ExtractionProvider>,
    config: ExtractionConfig,
    cache: Arc<DashMap<String, Arc<OnceCell<RawExtraction>>>>,
}

impl ExtractionAdapter {
    pub fn new(provider: Arc<dyn ExtractionProvider>, config: ExtractionConfig) -> Self {
        Self {
            provider,
            config,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Extract the document, consulting the cache first.
    ///
    /// Concurrent callers with the same content hash share one provider
    /// call; failed attempts are not cached and may be retried by a
    /// later submission.
    pub async fn extract(
        &self,
        content_hash: &str,
        request: &ExtractionRequest,
    ) -> Result<RawExtraction, ExtractionError> {
        let cell = self
            .cache
            .entry(content_hash.to_string())
            .or_default()
            .clone();
        cell.get_or_try_init(|| self.call_with_retry(content_hash, request))
            .await
            .cloned()
    }

    async fn call_with_retry(
        &self,
        content_hash: &str,
        request: &ExtractionRequest,
    ) -> Result<RawExtraction, ExtractionError> {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let mut attempt: u32 = 1;

        loop {
            let result = match tokio::time::timeout(timeout, self.provider.extract(request)).await {
                Ok(result) => result,
                Err(_) => Err(ExtractionError::Timeout),
            };

            match result {
                Ok(raw) => {
                    info!(
                        content_hash = %content_hash,
                        attempt,
                        confidence = raw.confidence,
                        line_items = raw.line_items.len(),
                        "Extraction succeeded"
                    );
                    return Ok(raw);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = Duration::from_millis(
                        self.config.retry_base_delay_ms * 2u64.pow(attempt - 1),
                    );
                    warn!(
                        content_hash = %content_hash,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient extraction failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        content_hash = %content_hash,
                        error = %e,
                        attempt,
                        "Extraction failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockExtractionProvider;
    use pretty_assertions::assert_eq;

    fn fast_config() -> ExtractionConfig {
        ExtractionConfig {
            retry_base_delay_ms: 1,
            ..ExtractionConfig::default()
        }
    }

    fn request(body: &str) -> ExtractionRequest {
        ExtractionRequest {
            bytes: body.as_bytes().to_vec(),
            mime_type: "application/pdf".to_string(),
            file_name: None,
            hints: None,
        }
    }

    const RAW_JSON: &str = r#"{
        "supplier_name": "ACME Corp.",
        "issue_date": "2024-03-01",
        "document_ref": "INV-100",
        "confidence": 0.95,
        "line_items": [
            {"description": "widget", "quantity": "2", "unit_price": "10.00"}
        ]
    }"#;

    #[tokio::test]
    async fn test_provider_called_once_per_content_hash() {
        let provider = Arc::new(MockExtractionProvider::new());
        let adapter = ExtractionAdapter::new(provider.clone(), fast_config());
        let req = request(RAW_JSON);

        let first = adapter.extract("hash-1", &req).await.unwrap();
        let second = adapter.extract("hash-1", &req).await.unwrap();
        assert_eq!(provider.call_count(), 1);
        assert_eq!(first.document_ref, second.document_ref);

        adapter.extract("hash-2", &req).await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(MockExtractionProvider::new());
        provider.queue_failure(ExtractionError::RateLimited);
        provider.queue_failure(ExtractionError::Unavailable("provider returned 502".into()));
        let adapter = ExtractionAdapter::new(provider.clone(), fast_config());

        let raw = adapter.extract("hash-1", &request(RAW_JSON)).await.unwrap();
        assert_eq!(raw.supplier_name.as_deref(), Some("ACME Corp."));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempts() {
        let provider = Arc::new(MockExtractionProvider::new());
        for _ in 0..3 {
            provider.queue_failure(ExtractionError::RateLimited);
        }
        let adapter = ExtractionAdapter::new(provider.clone(), fast_config());

        let err = adapter
            .extract("hash-1", &request(RAW_JSON))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::RateLimited));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_definitive_failures_are_not_retried() {
        let provider = Arc::new(MockExtractionProvider::new());
        provider.queue_failure(ExtractionError::Malformed("not json".into()));
        let adapter = ExtractionAdapter::new(provider.clone(), fast_config());

        let err = adapter
            .extract("hash-1", &request(RAW_JSON))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let provider = Arc::new(MockExtractionProvider::new());
        provider.queue_failure(ExtractionError::Unreadable("blurry".into()));
        let adapter = ExtractionAdapter::new(provider.clone(), fast_config());

        let req = request(RAW_JSON);
        assert!(adapter.extract("hash-1", &req).await.is_err());
        // A later resubmission of the same document may succeed.
        assert!(adapter.extract("hash-1", &req).await.is_ok());
        assert_eq!(provider.call_count(), 2);
    }

    #[test]
    fn test_unknown_provider_fields_are_captured() {
        let raw: RawExtraction = serde_json::from_str(
            r#"{"supplier_name": "Acme", "payment_terms": "NET 30", "confidence": 0.9}"#,
        )
        .unwrap();
        assert!(raw.extra.contains_key("payment_terms"));
    }
}
