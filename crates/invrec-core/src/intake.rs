//! Document intake: local validation and content hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::IntakeError;
use crate::models::config::IntakeConfig;

/// An uploaded document before any processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingDocument {
    /// Raw document bytes.
    pub bytes: Vec<u8>,

    /// Declared mime type.
    pub mime_type: String,

    /// Original file name, for reporting only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Free-form hints forwarded to the extraction provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<String>,
}

/// Validates uploads and assigns content hashes. Rejections happen here,
/// before any external call.
#[derive(Debug, Clone)]
pub struct DocumentIntake {
    config: IntakeConfig,
}

impl DocumentIntake {
    pub fn new(config: IntakeConfig) -> Self {
        Self { config }
    }

    /// Validate the document and return its content hash.
    pub fn inspect(&self, document: &IncomingDocument) -> Result<String, IntakeError> {
        if document.bytes.is_empty() {
            return Err(IntakeError::Empty);
        }
        if document.bytes.len() > self.config.max_document_bytes {
            return Err(IntakeError::Oversize {
                size: document.bytes.len(),
                limit: self.config.max_document_bytes,
            });
        }
        if !self
            .config
            .allowed_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&document.mime_type))
        {
            return Err(IntakeError::UnsupportedMimeType(document.mime_type.clone()));
        }

        let hash = content_hash(&document.bytes);
        debug!(
            content_hash = %hash,
            size = document.bytes.len(),
            mime = %document.mime_type,
            "Document accepted"
        );
        Ok(hash)
    }
}

/// SHA-256 of the raw bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pdf(bytes: &[u8]) -> IncomingDocument {
        IncomingDocument {
            bytes: bytes.to_vec(),
            mime_type: "application/pdf".to_string(),
            file_name: None,
            hints: None,
        }
    }

    #[test]
    fn test_hash_is_stable_for_identical_bytes() {
        let intake = DocumentIntake::new(IntakeConfig::default());
        let a = intake.inspect(&pdf(b"same bytes")).unwrap();
        let b = intake.inspect(&pdf(b"same bytes")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_rejects_unsupported_mime_type() {
        let intake = DocumentIntake::new(IntakeConfig::default());
        let doc = IncomingDocument {
            bytes: b"zip".to_vec(),
            mime_type: "application/zip".to_string(),
            file_name: None,
            hints: None,
        };
        assert!(matches!(
            intake.inspect(&doc),
            Err(IntakeError::UnsupportedMimeType(_))
        ));
    }

    #[test]
    fn test_rejects_oversize_and_empty() {
        let config = IntakeConfig {
            max_document_bytes: 4,
            ..IntakeConfig::default()
        };
        let intake = DocumentIntake::new(config);
        assert!(matches!(
            intake.inspect(&pdf(b"12345")),
            Err(IntakeError::Oversize { size: 5, limit: 4 })
        ));
        assert!(matches!(intake.inspect(&pdf(b"")), Err(IntakeError::Empty)));
    }

    #[test]
    fn test_known_sha256() {
        // sha256("abc")
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
