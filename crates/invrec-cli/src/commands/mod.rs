//! CLI commands.

pub mod batch;
pub mod config;
pub mod submit;

use std::path::Path;
use std::sync::Arc;

use invrec_core::mocks::MockExtractionProvider;
use invrec_core::{
    EngineConfig, ExtractionProvider, HttpExtractionProvider, IdentityProvider, IncomingDocument,
    MemoryStore, ReconciliationService, StaticIdentity,
};

pub type Service = ReconciliationService<MemoryStore>;

/// Load config from the given path, falling back to defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<EngineConfig> {
    match config_path {
        Some(path) => Ok(EngineConfig::from_file(Path::new(path))?),
        None => Ok(EngineConfig::default()),
    }
}

/// Build the service over an in-memory store.
///
/// With `mock` set, documents are expected to contain the extraction
/// response itself as JSON; useful for demos and tests without a
/// provider endpoint.
pub fn build_service(config: EngineConfig, mock: bool) -> anyhow::Result<Service> {
    let provider: Arc<dyn ExtractionProvider> = if mock {
        Arc::new(MockExtractionProvider::new())
    } else {
        Arc::new(HttpExtractionProvider::new(
            &config.provider,
            &config.extraction,
        )?)
    };
    let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity::new(actor_name()));
    Ok(ReconciliationService::new(
        Arc::new(MemoryStore::new()),
        provider,
        identity,
        config,
    ))
}

fn actor_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "invrec-cli".to_string())
}

/// Read a document from disk with a mime type derived from the file
/// extension. Mock fixtures pass as PDFs regardless of extension.
pub fn read_document(path: &Path, hints: Option<String>, mock: bool) -> anyhow::Result<IncomingDocument> {
    let bytes = std::fs::read(path)?;
    let mime_type = if mock {
        "application/pdf".to_string()
    } else {
        declared_mime(path)?
    };
    Ok(IncomingDocument {
        bytes,
        mime_type,
        file_name: path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string()),
        hints,
    })
}

fn declared_mime(path: &Path) -> anyhow::Result<String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let mime = match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        _ => anyhow::bail!("Unsupported file format: {}", extension),
    };
    Ok(mime.to_string())
}
