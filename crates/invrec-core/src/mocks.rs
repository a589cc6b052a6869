//! Mock extraction provider for tests, examples, and offline CLI runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::ExtractionError;
use crate::extraction::{ExtractionProvider, ExtractionRequest, RawExtraction};

/// Scripted extraction provider.
///
/// By default it decodes the document bytes themselves as a JSON
/// `RawExtraction`, so a test "document" is simply the response it
/// should produce. Failures can be queued to exercise the retry policy,
/// and a fixed response can override the decode path.
#[derive(Default)]
pub struct MockExtractionProvider {
    queued_failures: Mutex<VecDeque<ExtractionError>>,
    fixed_response: Mutex<Option<RawExtraction>>,
    calls: AtomicUsize,
}

impl MockExtractionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always return this response instead of decoding document bytes.
    pub fn with_response(raw: RawExtraction) -> Self {
        Self {
            fixed_response: Mutex::new(Some(raw)),
            ..Self::default()
        }
    }

    /// Queue a failure returned (once) before any success.
    pub fn queue_failure(&self, error: ExtractionError) {
        self.queued_failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(error);
    }

    /// Number of extraction calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionProvider for MockExtractionProvider {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self
            .queued_failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
        {
            return Err(error);
        }

        if let Some(raw) = self
            .fixed_response
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
        {
            return Ok(raw);
        }

        serde_json::from_slice(&request.bytes)
            .map_err(|e| ExtractionError::Malformed(e.to_string()))
    }
}
