//! Error types for the mistral-ocr library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`RemoteError`]: a single call to the OCR service failed. Classified
//!   at the HTTP boundary into *transient* (rate limit, 5xx, oversized
//!   payload, connection trouble) and *permanent* (bad request, invalid key).
//!   Only transient errors are retried by [`crate::retry::RetryPolicy`].
//!
//! * [`OcrError`]: **Fatal**: the conversion cannot proceed at all
//!   (missing file, unreadable PDF, no API key, remote call exhausted).
//!   Returned as `Err(OcrError)` from the top-level entry points.
//!
//! * [`ChunkError`]: **Non-fatal**: one chunk of a split document failed
//!   after every outer attempt. Stored inside
//!   [`crate::output::PipelineOutcome`] so the remaining chunks still
//!   produce output.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A classified failure of one remote call.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The service signalled a temporary condition (429, 5xx, 413, 408).
    #[error("OCR service returned HTTP {status}: {message}")]
    Transient { status: u16, message: String },

    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("Connection to '{endpoint}' failed: {detail}")]
    Connection { endpoint: String, detail: String },

    /// The service rejected the request; retrying cannot help.
    #[error("OCR service rejected the request{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

impl RemoteError {
    /// Map an HTTP status code and response body to the error taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 413 | 429 | 500 | 502 | 503 | 504 => RemoteError::Transient { status, message },
            _ => RemoteError::Permanent {
                status: Some(status),
                message,
            },
        }
    }

    /// Whether [`crate::retry::RetryPolicy`] should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Transient { .. } | RemoteError::Connection { .. }
        )
    }

    /// HTTP status code, when the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Transient { status, .. } => Some(*status),
            RemoteError::Permanent { status, .. } => *status,
            RemoteError::Connection { .. } => None,
        }
    }

    /// Actionable guidance for the user, distinct per failure kind.
    pub fn hint(&self) -> &'static str {
        match self.status() {
            Some(502) => "The server is temporarily unavailable (overloaded or under maintenance). Retry later.",
            Some(413) => "The file is too large. Split it with --split or reduce its size.",
            Some(429) => "Too many requests. Wait a moment and retry later.",
            Some(401) | Some(403) => "Verify that your MISTRAL_API_KEY is valid and has not expired.",
            Some(s) if s >= 500 => "The OCR service had an internal error. Retry later.",
            Some(_) => "Check that the file format is supported and the model name is correct.",
            None => "Check your network connection and retry.",
        }
    }
}

/// The remote step that failed inside a single-shot conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Uploading the document and obtaining a signed reference.
    Upload,
    /// Running OCR on the uploaded reference.
    Ocr,
    /// Asking the chat model for structured JSON.
    Structured,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Upload => "upload",
            Stage::Ocr => "OCR",
            Stage::Structured => "structured extraction",
        })
    }
}

/// All fatal errors returned by the mistral-ocr library.
///
/// Chunk-level failures use [`ChunkError`] and are stored in
/// [`crate::output::PipelineOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The extension is not one of `.pdf`, `.jpg`, `.jpeg`, `.png`.
    #[error("Unsupported file format '{extension}' for '{path}'\nSupported formats: .pdf, .jpg, .jpeg, .png")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// The document is empty, corrupt, or not what its extension claims.
    #[error("Invalid document '{name}': {detail}\nMake sure the file is not corrupted and can be opened.")]
    InvalidDocument { name: String, detail: String },

    // ── Configuration errors ──────────────────────────────────────────────
    /// Neither `--api-key` nor `MISTRAL_API_KEY` supplied a credential.
    #[error("Mistral AI API key is required.\nProvide it with --api-key or set the MISTRAL_API_KEY environment variable.")]
    MissingApiKey,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library (needed only for splitting).
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Splitting PDFs requires the pdfium shared library.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium (file or directory).\n\
  • Or place libpdfium next to the executable or in the working directory.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Remote errors ─────────────────────────────────────────────────────
    /// A remote step exhausted its retries or hit a non-retryable error.
    #[error("{stage} failed for '{document}': {source}\nHint: {}", .source.hint())]
    Conversion {
        stage: Stage,
        document: String,
        #[source]
        source: RemoteError,
    },

    /// Every chunk failed after all outer attempts; output would be empty.
    #[error("All {total} chunks failed after {attempts} attempts each.\nFirst error: {first_error}\nRetry later, or check the file and your API key.")]
    AllChunksFailed {
        total: usize,
        attempts: u32,
        first_error: String,
    },

    /// Some chunks succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::PipelineOutcome::into_result`] when
    /// the caller wants to treat any chunk failure as an error.
    #[error("{failed}/{total} chunks failed during conversion: {ordinals:?}")]
    PartialFailure {
        failed: usize,
        total: usize,
        ordinals: Vec<usize>,
    },

    /// The chat model did not return parseable JSON.
    #[error("Structured extraction returned invalid JSON: {detail}\nTry a different --structured-model.")]
    InvalidStructuredOutput { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrError {
    pub(crate) fn conversion(stage: Stage, document: &str, source: RemoteError) -> Self {
        OcrError::Conversion {
            stage,
            document: document.to_string(),
            source,
        }
    }

    pub(crate) fn write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OcrError::OutputWriteFailed {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single chunk.
///
/// The overall pipeline continues unless ALL chunks fail.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ChunkError {
    /// Every outer attempt for this chunk failed.
    #[error("Chunk {ordinal}: failed after {attempts} attempts: {detail}")]
    Failed {
        ordinal: usize,
        attempts: u32,
        detail: String,
    },
}

impl ChunkError {
    pub fn ordinal(&self) -> usize {
        match self {
            ChunkError::Failed { ordinal, .. } => *ordinal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        for s in [408, 413, 429, 500, 502, 503, 504] {
            assert!(RemoteError::from_status(s, "x").is_retryable(), "{s}");
        }
        for s in [400, 401, 403, 404, 422] {
            assert!(!RemoteError::from_status(s, "x").is_retryable(), "{s}");
        }
    }

    #[test]
    fn connection_errors_are_retryable() {
        let e = RemoteError::Connection {
            endpoint: "https://api.mistral.ai".into(),
            detail: "timed out".into(),
        };
        assert!(e.is_retryable());
        assert_eq!(e.status(), None);
        assert!(e.hint().contains("network"));
    }

    #[test]
    fn hints_are_distinct_per_kind() {
        let bad_gateway = RemoteError::from_status(502, "").hint();
        let too_large = RemoteError::from_status(413, "").hint();
        let rate_limited = RemoteError::from_status(429, "").hint();
        let unauthorized = RemoteError::from_status(401, "").hint();
        assert!(too_large.contains("--split"));
        assert!(unauthorized.contains("MISTRAL_API_KEY"));
        assert_ne!(bad_gateway, rate_limited);
        assert_ne!(too_large, unauthorized);
    }

    #[test]
    fn permanent_display_includes_status() {
        let e = RemoteError::from_status(400, "bad document");
        let msg = e.to_string();
        assert!(msg.contains("HTTP 400"), "got: {msg}");
        assert!(msg.contains("bad document"));
    }

    #[test]
    fn conversion_display_carries_hint() {
        let e = OcrError::conversion(Stage::Upload, "report", RemoteError::from_status(413, "too big"));
        let msg = e.to_string();
        assert!(msg.contains("upload failed for 'report'"), "got: {msg}");
        assert!(msg.contains("--split"), "got: {msg}");
    }

    #[test]
    fn partial_failure_display() {
        let e = OcrError::PartialFailure {
            failed: 1,
            total: 5,
            ordinals: vec![3],
        };
        assert!(e.to_string().contains("1/5"));
    }

    #[test]
    fn chunk_error_ordinal() {
        let e = ChunkError::Failed {
            ordinal: 4,
            attempts: 3,
            detail: "boom".into(),
        };
        assert_eq!(e.ordinal(), 4);
        assert!(e.to_string().starts_with("Chunk 4"));
    }
}
