//! # mistral-ocr
//!
//! Convert PDFs and images to Markdown (or structured JSON) with the
//! Mistral OCR API.
//!
//! Recognition happens remotely. This crate handles everything around it:
//! loading and validating input, retrying flaky remote calls with
//! exponential backoff, and splitting large PDFs into page-range chunks that
//! are converted independently and merged back in order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Input     extension dispatch + magic-byte check
//!  ├─ 2. Split     (optional) pdfium page-range chunks, spawn_blocking
//!  ├─ 3. Submit    upload + signed URL (PDF) or data URL (image)   ┐ RetryPolicy
//!  ├─ 4. Extract   POST /v1/ocr                                    ┘ per call
//!  ├─ 5. Merge     chunk Markdown in ordinal order, "\n\n" between
//!  └─ 6. Output    atomic write; optional JSON via a chat model
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mistral_ocr::{convert_chunked, ConversionConfig, PipelineStatus};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Key from MISTRAL_API_KEY
//!     let config = ConversionConfig::builder().chunk_count(20).build()?;
//!     let outcome = convert_chunked("big-report.pdf", &config).await?;
//!     if outcome.status() == PipelineStatus::Partial {
//!         eprintln!("missing chunks: {:?}", outcome.failed_ordinals());
//!     }
//!     println!("{}", outcome.merged().unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mistral-ocr` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! mistral-ocr = { version = "0.2", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod chunked;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod remote;
pub mod retry;
pub mod structured;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use chunked::{ChunkState, ChunkedPipeline};
pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::{
    convert, convert_chunked, convert_chunked_to_file, convert_sync, convert_to_file, SingleShotConverter,
};
pub use error::{ChunkError, OcrError, RemoteError, Stage};
pub use output::{ChunkOutput, ConversionOutput, OcrPage, OcrResponse, PipelineOutcome, PipelineStatus, UsageInfo};
pub use pipeline::input::{Document, DocumentKind, ImageKind};
pub use pipeline::split::{plan_chunks, Chunk, ChunkRange, DocumentSplitter, PdfiumSplitter};
pub use progress::{ChunkProgressCallback, NoopProgressCallback, ProgressCallback};
pub use remote::{DocumentRef, MistralClient, RemoteProcessor};
pub use retry::RetryPolicy;
pub use structured::{
    extract_structured, extract_structured_to_file, LlmStructuredExtractor, StructuredExtractor, StructuredOutput,
    StructuredSource,
};
