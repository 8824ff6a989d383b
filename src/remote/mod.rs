//! The OCR service seen from the pipeline: two fallible remote operations.
//!
//! The pipeline never speaks HTTP itself. It holds an
//! `Arc<dyn RemoteProcessor>` and calls [`RemoteProcessor::submit`] then
//! [`RemoteProcessor::extract`], each wrapped in a
//! [`crate::retry::RetryPolicy`]. Tests substitute deterministic stubs;
//! production uses [`mistral::MistralClient`].

pub mod mistral;

use crate::error::RemoteError;
use crate::output::OcrResponse;
use crate::pipeline::input::Document;
use async_trait::async_trait;

pub use mistral::MistralClient;

/// A handle the service can run OCR against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentRef {
    /// Signed URL of an uploaded document (PDF).
    DocumentUrl(String),
    /// Inline or remote image URL (usually a `data:` URL).
    ImageUrl(String),
}

impl DocumentRef {
    pub fn url(&self) -> &str {
        match self {
            DocumentRef::DocumentUrl(u) | DocumentRef::ImageUrl(u) => u,
        }
    }
}

/// Opaque OCR backend.
#[async_trait]
pub trait RemoteProcessor: Send + Sync {
    /// Make `document` addressable by the service.
    async fn submit(&self, document: &Document) -> Result<DocumentRef, RemoteError>;

    /// Run OCR on a submitted document with the given model.
    async fn extract(&self, reference: &DocumentRef, model: &str) -> Result<OcrResponse, RemoteError>;
}
