//! End-to-end tests against the live Mistral API.
//!
//! These tests read documents from `./test_cases/` and spend real API
//! credits. They are gated behind `E2E_ENABLED` and `MISTRAL_API_KEY` so
//! they never run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 MISTRAL_API_KEY=... cargo test --test e2e -- --nocapture
//!
//! Splitting tests additionally need libpdfium (see `PDFIUM_LIB_PATH`).

use mistral_ocr::{
    convert, convert_chunked, convert_chunked_to_file, extract_structured, ConversionConfig, PipelineStatus,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Route library logs to the test output; `RUST_LOG=mistral_ocr=debug` for detail.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mistral_ocr=info")),
        )
        .with_test_writer()
        .try_init();
}

/// Skip unless E2E_ENABLED and MISTRAL_API_KEY are set and the input exists.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        if std::env::var("MISTRAL_API_KEY").is_err() {
            println!("SKIP: MISTRAL_API_KEY is not set");
            return;
        }
        init_tracing();
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn assert_markdown_sane(md: &str, context: &str) {
    assert!(!md.trim().is_empty(), "[{context}] Markdown is empty");
    assert!(
        !md.contains("\n\n\n\n\n"),
        "[{context}] Output has runs of blank lines"
    );
    println!("[{context}] ✓  {} bytes", md.len());
}

fn config() -> ConversionConfig {
    ConversionConfig::builder()
        .max_retries(2)
        .retry_delay_ms(1000)
        .build()
        .expect("valid config")
}

// ── Single-shot ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_convert_small_pdf() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));

    let output = convert(&path, &config()).await.expect("conversion should succeed");

    assert!(!output.pages.is_empty());
    assert_markdown_sane(&output.markdown, "irs_form_1040");
    assert!(output.markdown.contains("1040"), "Form number should survive OCR");

    std::fs::write(output_dir().join("irs_form_1040.md"), &output.markdown).ok();
}

#[tokio::test]
async fn test_convert_image() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("receipt.png"));

    let output = convert(&path, &config()).await.expect("conversion should succeed");
    assert_eq!(output.pages.len(), 1);
    assert_markdown_sane(&output.markdown, "receipt");
}

#[tokio::test]
async fn test_invalid_key_is_reported_not_retried() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));

    let config = ConversionConfig::builder()
        .api_key("definitely-not-a-key")
        .max_retries(3)
        .build()
        .unwrap();
    let start = std::time::Instant::now();
    let err = convert(&path, &config).await.expect_err("bad key must fail");

    assert!(err.to_string().contains("MISTRAL_API_KEY"), "{err}");
    assert!(start.elapsed().as_secs() < 10, "401 must not be retried");
}

// ── Chunked ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chunked_arxiv_paper() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = ConversionConfig::builder()
        .chunk_count(5)
        .concurrency(2)
        .max_retries(2)
        .build()
        .unwrap();
    let outcome = convert_chunked(&path, &config).await.expect("split should succeed");

    // 15 pages / 5 per chunk
    assert_eq!(outcome.total_chunks, 3);
    assert_eq!(outcome.status(), PipelineStatus::Complete, "{:?}", outcome.failures);

    let merged = outcome.merged().expect("complete run has output");
    assert_markdown_sane(&merged, "arxiv chunked");
    assert!(merged.contains("Attention"), "Title should survive OCR");
}

#[tokio::test]
async fn test_chunked_to_file_writes_chunk_outputs() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));
    let out = output_dir().join("arxiv_chunked.md");

    let config = ConversionConfig::builder().chunk_count(8).build().unwrap();
    let outcome = convert_chunked_to_file(&path, &out, &config)
        .await
        .expect("conversion should succeed");

    assert!(out.exists());
    let chunk_dir = output_dir().join("chunk_outputs");
    for output in &outcome.outputs {
        let name = format!("attention_is_all_you_need_chunk_{:03}.md", output.ordinal);
        assert!(chunk_dir.join(&name).exists(), "missing {name}");
    }
}

// ── Structured ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_structured_image() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("receipt.png"));

    let output = extract_structured(&path, &config())
        .await
        .expect("structured extraction should succeed");

    assert!(output.data.is_object() || output.data.is_array(), "{}", output.data);
    println!("{}", serde_json::to_string_pretty(&output.data).unwrap());
}
