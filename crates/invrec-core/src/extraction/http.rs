//! HTTP-backed extraction provider.
//!
//! Posts the raw document bytes to a configured endpoint and decodes
//! the JSON response as a `RawExtraction`. HTTP failures are mapped
//! onto the extraction error taxonomy so the adapter's retry policy
//! applies uniformly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use tracing::debug;

use crate::error::ExtractionError;
use crate::extraction::{ExtractionProvider, ExtractionRequest, RawExtraction};
use crate::models::config::{ExtractionConfig, ProviderConfig};

/// Extraction provider speaking plain HTTP to an external service.
pub struct HttpExtractionProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpExtractionProvider {
    /// Build a provider from config. The API key, when configured, is
    /// read from the named environment variable.
    pub fn new(
        provider: &ProviderConfig,
        extraction: &ExtractionConfig,
    ) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(extraction.request_timeout_secs))
            .build()
            .map_err(|e| ExtractionError::Unreadable(e.to_string()))?;

        let api_key = match &provider.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                ExtractionError::Unreadable(format!("env var {var} required for extraction API"))
            })?),
            None => None,
        };

        Ok(Self {
            client,
            base_url: provider.base_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ExtractionProvider for HttpExtractionProvider {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
        let mut builder = self
            .client
            .post(&self.base_url)
            .header(header::CONTENT_TYPE, request.mime_type.clone())
            .body(request.bytes.clone());

        if let Some(hints) = &request.hints {
            builder = builder.header("x-extraction-hints", hints.clone());
        }
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ExtractionError::Timeout
            } else {
                ExtractionError::Unreadable(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(status = %status, url = %self.base_url, "Extraction provider responded");

        match status {
            StatusCode::TOO_MANY_REQUESTS => return Err(ExtractionError::RateLimited),
            s if s.is_server_error() => {
                return Err(ExtractionError::Unavailable(format!("provider returned {s}")));
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(ExtractionError::Unreadable(format!(
                    "provider returned {s}: {body}"
                )));
            }
            _ => {}
        }

        response
            .json::<RawExtraction>()
            .await
            .map_err(|e| ExtractionError::Malformed(e.to_string()))
    }
}
