//! Error types for the invrec-core library.

use thiserror::Error;
use uuid::Uuid;

use crate::models::invoice::InvoiceStatus;

/// Main error type for the invrec library.
#[derive(Error, Debug)]
pub enum InvrecError {
    /// Document intake rejection.
    #[error("intake error: {0}")]
    Intake(#[from] IntakeError),

    /// Extraction provider failure.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Persistent store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invoice lifecycle violation.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Referenced invoice does not exist.
    #[error("invoice not found: {0}")]
    InvoiceNotFound(Uuid),

    /// Referenced supplier does not exist.
    #[error("supplier not found: {0}")]
    SupplierNotFound(Uuid),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Local validation failures raised before any external call.
#[derive(Error, Debug)]
pub enum IntakeError {
    /// The declared mime type is not accepted.
    #[error("unsupported mime type: {0}")]
    UnsupportedMimeType(String),

    /// Payload exceeds the configured size limit.
    #[error("document too large: {size} bytes (limit {limit})")]
    Oversize { size: usize, limit: usize },

    /// Zero-byte payload.
    #[error("document is empty")]
    Empty,
}

/// Failures reported by the external extraction capability.
///
/// `Timeout`, `RateLimited`, and `Unavailable` are transient and
/// retried per policy; `Unreadable` and `Malformed` are definitive and
/// never retried.
#[derive(Error, Debug, Clone)]
pub enum ExtractionError {
    /// The provider could not read the document at all.
    #[error("document unreadable: {0}")]
    Unreadable(String),

    /// The provider call timed out.
    #[error("extraction timed out")]
    Timeout,

    /// The provider rejected the call due to rate limiting.
    #[error("extraction provider rate limited")]
    RateLimited,

    /// The provider reported a server-side failure.
    #[error("extraction provider unavailable: {0}")]
    Unavailable(String),

    /// The provider returned a response that cannot be decoded.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ExtractionError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExtractionError::Timeout
                | ExtractionError::RateLimited
                | ExtractionError::Unavailable(_)
        )
    }

    /// Whether the invoice should be parked in Draft for manual re-upload.
    pub fn is_definitive(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors from the persistent store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Optimistic-concurrency check failed; caller must reload and retry.
    #[error("version conflict: expected {expected}, stored {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// A unique-key constraint was violated.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The targeted record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Invoice state-machine violations.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The requested transition is not in the state machine.
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    /// Deletion requires a non-empty reason.
    #[error("deletion requires a non-empty reason")]
    MissingDeletionReason,

    /// Finalize preconditions not met.
    #[error("invoice not ready to finalize: {0}")]
    NotReadyToFinalize(String),

    /// The caller is not allowed to perform the operation.
    #[error("actor {actor} is not authorized to {action}")]
    Unauthorized { actor: String, action: String },
}

/// Result type for the invrec library.
pub type Result<T> = std::result::Result<T, InvrecError>;
