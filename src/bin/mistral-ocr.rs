//! CLI binary for mistral-ocr.
//!
//! Maps flags onto `ConversionConfig`, picks the single-shot, chunked or
//! structured entry point, and reports the result.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mistral_ocr::config::{API_KEY_ENV, DEFAULT_API_BASE, DEFAULT_OCR_MODEL, DEFAULT_STRUCTURED_MODEL};
use mistral_ocr::pipeline::input::{default_output_path, detect_kind};
use mistral_ocr::{
    convert_chunked_to_file, convert_to_file, extract_structured_to_file, ChunkProgressCallback,
    ConversionConfig, DocumentKind, OcrError, PipelineStatus, ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Chunk progress bar ───────────────────────────────────────────────────────

/// Live bar for the chunked pipeline. Chunks may finish out of order when
/// `--concurrency` is above 1.
struct CliProgress {
    bar: ProgressBar,
    started: Mutex<HashMap<usize, Instant>>,
    retries: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Splitting");
        bar.set_message("reading PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            started: Mutex::new(HashMap::new()),
            retries: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, ordinal: usize) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&ordinal))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ChunkProgressCallback for CliProgress {
    fn on_pipeline_start(&self, total_chunks: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos:>3}/{len} chunks  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_chunks as u64);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn on_chunk_start(&self, ordinal: usize, _total: usize, attempt: u32) {
        if let Ok(mut m) = self.started.lock() {
            m.entry(ordinal).or_insert_with(Instant::now);
        }
        if attempt > 1 {
            self.bar.set_message(format!("chunk {ordinal} (attempt {attempt})"));
        } else {
            self.bar.set_message(format!("chunk {ordinal}"));
        }
    }

    fn on_chunk_retry(&self, ordinal: usize, next_attempt: u32, delay: Duration) {
        self.retries.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Chunk {:>3}  retrying (attempt {}) in {:.0}s",
            yellow("↻"),
            ordinal,
            next_attempt,
            delay.as_secs_f64()
        ));
    }

    fn on_chunk_complete(&self, ordinal: usize, total: usize, markdown_len: usize) {
        let secs = self.elapsed(ordinal);
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            green("✓"),
            ordinal,
            total,
            dim(&format!("{markdown_len:>6} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, ordinal: usize, total: usize, error: &str) {
        let secs = self.elapsed(ordinal);
        let first_line = error.lines().next().unwrap_or_default();
        let msg: String = if first_line.chars().count() > 80 {
            format!("{}\u{2026}", first_line.chars().take(79).collect::<String>())
        } else {
            first_line.to_string()
        };
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            ordinal,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_pipeline_complete(&self, total_chunks: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_chunks.saturating_sub(success_count);
        let retries = self.retries.load(Ordering::SeqCst);
        let retry_note = if retries > 0 {
            dim(&format!("  ({retries} chunk retries)"))
        } else {
            String::new()
        };
        if failed == 0 {
            eprintln!("{} {} chunks converted{}", green("✔"), bold(&success_count.to_string()), retry_note);
        } else {
            eprintln!(
                "{} {}/{} chunks converted  ({} failed){}",
                if success_count == 0 { red("✘") } else { yellow("⚠") },
                bold(&success_count.to_string()),
                total_chunks,
                red(&failed.to_string()),
                retry_note
            );
        }
    }
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a PDF (writes document.md next to it)
  mistral-ocr document.pdf

  # Convert an image to a chosen file
  mistral-ocr receipt.jpg -o receipt.md

  # Large PDF: split into chunks and convert each independently
  mistral-ocr --split --chunks 20 book.pdf -o book.md

  # Structured JSON instead of Markdown
  mistral-ocr --structured invoice.png

ENVIRONMENT VARIABLES:
  MISTRAL_API_KEY   Mistral API key (same as --api-key)
  PDFIUM_LIB_PATH   pdfium library file or directory (needed for --split)
  RUST_LOG          Log filter, e.g. RUST_LOG=mistral_ocr=debug

RETRIES:
  Each API call is retried on 408/413/429/5xx and network errors with
  exponential backoff (--max-retries, --retry-delay, doubling each time).
  With --split, a chunk that still fails is re-run whole up to
  --chunk-retries more times, waiting 2s, 4s, … between runs. Failed chunks
  are listed and the rest of the document is still written.
"#;

const TROUBLESHOOTING: &str = "Troubleshooting:
  1. Check your network connection.
  2. Verify that your API key is valid (--api-key or MISTRAL_API_KEY).
  3. For large files, try --split (and a higher --chunks).
  4. If the service is overloaded (429/502/503), retry later or raise --max-retries.
  5. Make sure the file is a readable PDF, JPEG or PNG.";

/// OCR PDFs and images to Markdown or JSON with the Mistral OCR API.
#[derive(Parser, Debug)]
#[command(
    name = "mistral-ocr",
    version,
    about = "OCR PDFs and images to Markdown or JSON with the Mistral OCR API",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF, JPEG or PNG file to convert.
    file: PathBuf,

    /// Output path. Default: the input with a .md (or .json) extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Mistral API key.
    #[arg(short = 'k', long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Split the PDF into chunks and convert each independently.
    #[arg(short, long)]
    split: bool,

    /// Target number of chunks when splitting.
    #[arg(short, long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    chunks: u64,

    /// OCR model.
    #[arg(short, long, default_value = DEFAULT_OCR_MODEL)]
    model: String,

    /// Produce structured JSON instead of Markdown.
    #[arg(short = 'j', long)]
    structured: bool,

    /// Chat model used with --structured.
    #[arg(long, default_value = DEFAULT_STRUCTURED_MODEL)]
    structured_model: String,

    /// Retries per API call on transient errors.
    #[arg(short = 'r', long, default_value_t = 3)]
    max_retries: u32,

    /// Initial retry delay in seconds (doubles on each retry).
    #[arg(short = 'd', long, default_value_t = 2.0)]
    retry_delay: f64,

    /// Whole-chunk re-runs after a chunk's first run fails (with --split).
    #[arg(long, default_value_t = 2)]
    chunk_retries: u32,

    /// Chunks converted at once (with --split).
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Also save the split chunk PDFs in this directory.
    #[arg(long)]
    split_dir: Option<PathBuf>,

    /// Mistral API base URL.
    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Enable DEBUG-level logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress everything except errors.
    #[arg(short, long)]
    quiet: bool,

    /// Disable progress display.
    #[arg(long)]
    no_progress: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The chat provider used by --structured reads the key from the
    // environment; export it before any worker threads exist.
    if let Some(ref key) = cli.api_key {
        if std::env::var(API_KEY_ENV).map(|v| &v != key).unwrap_or(true) {
            std::env::set_var(API_KEY_ENV, key);
        }
    }

    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start async runtime: {e}", red("error:"));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&cli, show_progress)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    let kind = detect_kind(&cli.file)?;
    let chunked = cli.split && kind == DocumentKind::Pdf;
    if cli.split && !chunked && !cli.quiet {
        eprintln!("{} images are never split; converting in one request", dim("note:"));
    }

    let progress: Option<ProgressCallback> = if show_progress && chunked {
        Some(CliProgress::new() as Arc<dyn ChunkProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, chunked, progress)?;

    if cli.structured {
        let output = cli.output.clone().unwrap_or_else(|| default_output_path(&cli.file, "json"));
        let bar = (show_progress && !chunked).then(|| spinner("Extracting structured data…"));
        let result = extract_structured_to_file(&cli.file, &output, &config).await;
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        result.context("Structured extraction failed")?;
        if !cli.quiet {
            if kind == DocumentKind::Pdf {
                eprintln!("{} Markdown saved to {}", green("✔"), bold(&display(&default_output_path(&output, "md"))));
            }
            eprintln!("{} Structured data saved to {}", green("✔"), bold(&display(&output)));
        }
        return Ok(());
    }

    let output = cli.output.clone().unwrap_or_else(|| default_output_path(&cli.file, "md"));

    if chunked {
        let outcome = convert_chunked_to_file(&cli.file, &output, &config)
            .await
            .context("Chunked conversion failed")?;
        if !cli.quiet {
            if outcome.status() == PipelineStatus::Partial {
                eprintln!(
                    "{} Chunks {:?} failed; their pages are missing from the output.",
                    yellow("⚠"),
                    outcome.failed_ordinals()
                );
            }
            eprintln!(
                "{}  {}/{} chunks  {}ms  →  {}",
                if outcome.status() == PipelineStatus::Complete { green("✔") } else { yellow("⚠") },
                outcome.outputs.len(),
                outcome.total_chunks,
                outcome.duration_ms,
                bold(&display(&output)),
            );
            if let Some(ref dir) = config.chunk_output_dir {
                eprintln!("   {} {}", dim("chunk files:"), display(dir));
            }
        }
    } else {
        let bar = show_progress.then(|| spinner(&format!("Converting {}…", display(&cli.file))));
        let result = convert_to_file(&cli.file, &output, &config).await;
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        let result = result.context("Conversion failed")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} pages  {}ms  →  {}",
                green("✔"),
                result.pages.len(),
                result.duration_ms,
                bold(&display(&output)),
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, chunked: bool, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .api_base(cli.api_base.clone())
        .ocr_model(cli.model.clone())
        .structured_model(cli.structured_model.clone())
        .max_retries(cli.max_retries)
        .retry_delay_secs(cli.retry_delay)
        .split(chunked)
        .chunk_count(usize::try_from(cli.chunks).unwrap_or(usize::MAX))
        .chunk_retries(cli.chunk_retries)
        .concurrency(cli.concurrency)
        .api_timeout_secs(cli.timeout);

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref dir) = cli.split_dir {
        builder = builder.split_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;
    if chunked && config.chunk_output_dir.is_none() {
        let output = cli.output.clone().unwrap_or_else(|| default_output_path(&cli.file, "md"));
        config.chunk_output_dir = Some(
            output
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .join(mistral_ocr::convert::CHUNK_OUTPUT_DIR),
        );
    }
    Ok(config)
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Print the error chain, the service hint if any, and the checklist.
fn report_error(err: &anyhow::Error) {
    eprintln!("{} {err}", red("error:"));
    for cause in err.chain().skip(1) {
        eprintln!("  {} {cause}", dim("caused by:"));
    }

    let needs_checklist = err
        .chain()
        .filter_map(|c| c.downcast_ref::<OcrError>())
        .any(|e| {
            matches!(
                e,
                OcrError::Conversion { .. } | OcrError::AllChunksFailed { .. } | OcrError::InvalidStructuredOutput { .. }
            )
        });
    if needs_checklist {
        eprintln!("\n{TROUBLESHOOTING}");
    }
}
