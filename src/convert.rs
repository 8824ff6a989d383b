//! Single-shot conversion and the top-level entry points.
//!
//! [`SingleShotConverter`] turns one document into Markdown with two remote
//! steps, each wrapped in the configured [`RetryPolicy`]:
//!
//! ```text
//! Document ──submit──▶ DocumentRef ──extract──▶ OcrResponse ──join──▶ Markdown
//!            (Upload)                  (OCR)
//! ```
//!
//! The free functions ([`convert`], [`convert_to_file`], [`convert_chunked`],
//! …) load the input file, resolve collaborators from the
//! [`ConversionConfig`] and dispatch to the single-shot converter or the
//! [`ChunkedPipeline`].

use crate::chunked::ChunkedPipeline;
use crate::config::ConversionConfig;
use crate::error::{OcrError, RemoteError, Stage};
use crate::output::{write_atomic, ChunkOutput, ConversionOutput, OcrResponse, PipelineOutcome, PipelineStatus};
use crate::pipeline::input::{load_document, Document};
use crate::pipeline::split::{DocumentSplitter, PdfiumSplitter};
use crate::remote::{DocumentRef, MistralClient, RemoteProcessor};
use crate::retry::RetryPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Directory name, next to the merged output, that receives per-chunk Markdown.
pub const CHUNK_OUTPUT_DIR: &str = "chunk_outputs";

/// Converts one document with one submit and one extract.
#[derive(Clone)]
pub struct SingleShotConverter {
    processor: Arc<dyn RemoteProcessor>,
    retry: RetryPolicy,
    model: String,
}

impl std::fmt::Debug for SingleShotConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleShotConverter")
            .field("retry", &self.retry)
            .field("model", &self.model)
            .finish()
    }
}

impl SingleShotConverter {
    pub fn new(processor: Arc<dyn RemoteProcessor>, retry: RetryPolicy, model: impl Into<String>) -> Self {
        Self {
            processor,
            retry,
            model: model.into(),
        }
    }

    /// Build from configuration. Fails with [`OcrError::MissingApiKey`] when
    /// no processor is injected and no key can be found.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, OcrError> {
        Ok(Self::new(
            resolve_processor(config)?,
            config.retry_policy(),
            config.ocr_model.clone(),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Submit and extract, then join the pages.
    ///
    /// Calling this twice on the same document against a deterministic
    /// backend yields the same Markdown.
    pub async fn convert(&self, document: &Document) -> Result<ConversionOutput, OcrError> {
        let start = Instant::now();
        let reference = self.submit(document).await?;
        let response = self.extract(document, &reference).await?;
        let output = assemble(response, start);
        info!(
            "Converted '{}': {} pages, {} chars in {}ms",
            document.name,
            output.pages.len(),
            output.markdown.len(),
            output.duration_ms
        );
        Ok(output)
    }

    /// The upload step under retry.
    pub async fn submit(&self, document: &Document) -> Result<DocumentRef, OcrError> {
        let label = format!("{}: upload", document.name);
        self.retry
            .execute(&label, || self.processor.submit(document), RemoteError::is_retryable)
            .await
            .map_err(|e| OcrError::conversion(Stage::Upload, &document.name, e))
    }

    /// The OCR step under retry.
    pub async fn extract(&self, document: &Document, reference: &DocumentRef) -> Result<OcrResponse, OcrError> {
        let label = format!("{}: OCR", document.name);
        let response = self
            .retry
            .execute(
                &label,
                || self.processor.extract(reference, &self.model),
                RemoteError::is_retryable,
            )
            .await
            .map_err(|e| OcrError::conversion(Stage::Ocr, &document.name, e))?;
        debug!("'{}': service returned {} pages", document.name, response.pages.len());
        Ok(response)
    }
}

fn assemble(response: OcrResponse, start: Instant) -> ConversionOutput {
    let markdown = response.combined_markdown();
    let mut pages = response.pages;
    pages.sort_by_key(|p| p.index);
    ConversionOutput {
        markdown,
        pages,
        usage: response.usage_info,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Injected processor first, otherwise a Mistral client (needs an API key).
pub fn resolve_processor(config: &ConversionConfig) -> Result<Arc<dyn RemoteProcessor>, OcrError> {
    if let Some(ref processor) = config.processor {
        return Ok(Arc::clone(processor));
    }
    Ok(Arc::new(MistralClient::from_config(config)?))
}

/// Injected splitter first, otherwise pdfium.
pub fn resolve_splitter(config: &ConversionConfig) -> Arc<dyn DocumentSplitter> {
    match config.splitter {
        Some(ref splitter) => Arc::clone(splitter),
        None => Arc::new(PdfiumSplitter::new(config.split_dir.clone())),
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Convert a PDF or image to Markdown in one shot.
///
/// # Example
/// ```rust,no_run
/// use mistral_ocr::{convert, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::builder().api_key("sk-...").build()?;
/// let output = convert("scan.png", &config).await?;
/// println!("{}", output.markdown);
/// # Ok(())
/// # }
/// ```
pub async fn convert(input: impl AsRef<Path>, config: &ConversionConfig) -> Result<ConversionOutput, OcrError> {
    let document = load_document(input).await?;
    let converter = SingleShotConverter::from_config(config)?;
    converter.convert(&document).await
}

/// Convert and write the Markdown to `output` atomically.
pub async fn convert_to_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, OcrError> {
    let result = convert(input, config).await?;
    write_atomic(output.as_ref(), result.markdown.as_bytes()).await?;
    info!("Wrote {}", output.as_ref().display());
    Ok(result)
}

/// Convert a document through the chunked pipeline.
///
/// PDFs are split into up to `config.chunk_count` chunks. Images have no
/// pages to split and are converted in one shot, reported as a single chunk.
pub async fn convert_chunked(input: impl AsRef<Path>, config: &ConversionConfig) -> Result<PipelineOutcome, OcrError> {
    let document = load_document(input).await?;
    run_chunked(&document, config).await
}

pub(crate) async fn run_chunked(document: &Document, config: &ConversionConfig) -> Result<PipelineOutcome, OcrError> {
    if !document.is_pdf() {
        info!("'{}' is an image; converting without splitting", document.name);
        let start = Instant::now();
        let converter = SingleShotConverter::from_config(config)?;
        let output = converter.convert(document).await?;
        return Ok(PipelineOutcome {
            outputs: vec![ChunkOutput {
                ordinal: 1,
                pages: 0..1,
                markdown: output.markdown,
                attempts: 1,
            }],
            failures: Vec::new(),
            total_chunks: 1,
            duration_ms: start.elapsed().as_millis() as u64,
        });
    }

    ChunkedPipeline::from_config(config)?.run(document).await
}

/// Run the chunked pipeline and write the merged Markdown to `output`.
///
/// Per-chunk Markdown goes to `config.chunk_output_dir`, or to
/// `chunk_outputs/` next to `output` when unset. The merged file is only
/// written when at least one chunk succeeded.
pub async fn convert_chunked_to_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<PipelineOutcome, OcrError> {
    let output = output.as_ref();
    let mut config = config.clone();
    if config.chunk_output_dir.is_none() {
        config.chunk_output_dir = Some(default_chunk_output_dir(output));
    }

    let outcome = convert_chunked(input, &config).await?;
    if outcome.status() == PipelineStatus::Failed {
        return Err(outcome.all_failed_error(config.chunk_retries.saturating_add(1)));
    }

    let merged = outcome.merged().unwrap_or_default();
    write_atomic(output, merged.as_bytes()).await?;
    info!(
        "Wrote {} ({}/{} chunks)",
        output.display(),
        outcome.outputs.len(),
        outcome.total_chunks
    );
    Ok(outcome)
}

fn default_chunk_output_dir(output: &Path) -> PathBuf {
    output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(CHUNK_OUTPUT_DIR)
}

/// Blocking wrapper around [`convert`].
///
/// Creates a temporary tokio runtime; do not call from inside one.
pub fn convert_sync(input: impl AsRef<Path>, config: &ConversionConfig) -> Result<ConversionOutput, OcrError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| OcrError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, config))
}
