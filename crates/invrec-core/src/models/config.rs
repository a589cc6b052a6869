//! Configuration structures for the reconciliation engine.
//!
//! Every business threshold the pipeline consults lives here as a
//! named, documented field with a testable default.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main configuration for the invrec engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Document intake limits.
    pub intake: IntakeConfig,

    /// Extraction adapter behavior.
    pub extraction: ExtractionConfig,

    /// Supplier matching thresholds.
    pub matching: MatchingConfig,

    /// Price deviation thresholds.
    pub pricing: PricingConfig,

    /// Lifecycle behavior.
    pub lifecycle: LifecycleConfig,

    /// Batch pipeline limits.
    pub pipeline: PipelineConfig,

    /// Remission matching windows.
    pub remission: RemissionConfig,

    /// External extraction provider endpoint.
    pub provider: ProviderConfig,
}

/// Document intake limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Accepted declared mime types.
    pub allowed_mime_types: Vec<String>,

    /// Maximum payload size in bytes.
    pub max_document_bytes: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: vec![
                "application/pdf".to_string(),
                "image/png".to_string(),
                "image/jpeg".to_string(),
                "image/tiff".to_string(),
            ],
            max_document_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Extraction adapter behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Minimum confidence to skip the low-confidence review flag.
    pub min_confidence: f32,

    /// Timeout for a single provider call, in seconds.
    pub request_timeout_secs: u64,

    /// Maximum attempts for transient failures (timeouts, rate limits).
    pub max_attempts: u32,

    /// Base delay for exponential retry backoff, in milliseconds.
    pub retry_base_delay_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.70,
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}

/// Supplier matching thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum name similarity (0.0 - 1.0) for a suggested match.
    /// Matches at or above this score still require explicit confirmation.
    pub similarity_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
        }
    }
}

/// Price deviation thresholds, as fractions of the baseline price.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Below this absolute deviation the price counts as unchanged.
    pub minor_threshold: Decimal,

    /// At or above this absolute deviation the change is Major and
    /// blocks auto-finalize.
    pub major_threshold: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            minor_threshold: Decimal::new(5, 2),
            major_threshold: Decimal::new(15, 2),
        }
    }
}

/// Lifecycle behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Finalize validated invoices automatically when no line item is
    /// classified Major.
    pub auto_finalize: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            auto_finalize: false,
        }
    }
}

/// Batch pipeline limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded worker pool size for batch submissions. Caps load on the
    /// external extraction service.
    pub max_concurrent_documents: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 4,
        }
    }
}

/// Remission matching windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemissionConfig {
    /// Maximum distance in days between issue date and delivery date
    /// for date+amount proximity matching.
    pub date_window_days: i64,

    /// Maximum difference between the invoice total and the declared
    /// delivery total for proximity matching.
    pub amount_tolerance: Decimal,
}

impl Default for RemissionConfig {
    fn default() -> Self {
        Self {
            date_window_days: 7,
            amount_tolerance: Decimal::new(1, 2),
        }
    }
}

/// External extraction provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Extraction endpoint URL.
    pub base_url: String,

    /// Environment variable holding the API key, if the endpoint
    /// requires one.
    pub api_key_env: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090/v1/extract".to_string(),
            api_key_env: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_default_thresholds() {
        let config = EngineConfig::default();
        assert_eq!(
            config.pricing.minor_threshold,
            Decimal::from_str("0.05").unwrap()
        );
        assert_eq!(
            config.pricing.major_threshold,
            Decimal::from_str("0.15").unwrap()
        );
        assert_eq!(config.matching.similarity_threshold, 0.85);
        assert_eq!(config.extraction.max_attempts, 3);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"pipeline": {"max_concurrent_documents": 16}}"#).unwrap();
        assert_eq!(config.pipeline.max_concurrent_documents, 16);
        assert_eq!(config.extraction.min_confidence, 0.70);
    }
}
