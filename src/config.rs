//! Configuration types for OCR conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Every knob lives in one struct so a
//! CLI invocation, a library call and a test can all describe a run the same
//! way.
//!
//! Collaborators (`processor`, `splitter`, `structurer`) are injectable: a
//! pre-built instance takes precedence over the default Mistral/pdfium
//! implementations.

use crate::error::OcrError;
use crate::pipeline::split::DocumentSplitter;
use crate::progress::ProgressCallback;
use crate::remote::RemoteProcessor;
use crate::retry::RetryPolicy;
use crate::structured::StructuredExtractor;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable consulted when no explicit API key is configured.
pub const API_KEY_ENV: &str = "MISTRAL_API_KEY";

/// Default Mistral API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.mistral.ai";

/// Default OCR model.
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";

/// Default chat model for structured extraction.
pub const DEFAULT_STRUCTURED_MODEL: &str = "pixtral-12b-latest";

/// Configuration for an OCR conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use mistral_ocr::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .chunk_count(20)
///     .max_retries(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_count, 20);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Explicit API key. Takes precedence over `MISTRAL_API_KEY`.
    pub api_key: Option<String>,

    /// Base URL of the Mistral API. Default: `https://api.mistral.ai`.
    pub api_base: String,

    /// OCR model identifier. Default: `mistral-ocr-latest`.
    pub ocr_model: String,

    /// Chat model used for structured extraction. Default: `pixtral-12b-latest`.
    pub structured_model: String,

    /// Retries per remote call on a transient failure. Default: 3.
    ///
    /// Permanent errors (bad request, invalid key) are never retried.
    pub max_retries: u32,

    /// Delay before the first retry of a remote call, in milliseconds. Default: 2000.
    pub retry_delay_ms: u64,

    /// Multiplier applied to the delay after each retry. Default: 2.0.
    ///
    /// With the defaults the waits are 2 s → 4 s → 8 s.
    pub backoff_factor: f64,

    /// Route PDFs through the chunked pipeline where an entry point offers
    /// both paths (structured mode, the CLI). Default: false.
    pub split: bool,

    /// Target number of chunks when splitting a PDF. Default: 100.
    ///
    /// Fewer chunks are produced when the document has fewer pages.
    pub chunk_count: usize,

    /// Whole-chunk re-attempts after the first one fails. Default: 2.
    pub chunk_retries: u32,

    /// Linear delay unit between chunk attempts, in milliseconds. Default: 2000.
    ///
    /// The first attempt starts at once; the k-th re-run waits
    /// `k × chunk_retry_delay_ms` (2 s, then 4 s with the defaults).
    pub chunk_retry_delay_ms: u64,

    /// Chunks processed at once. Default: 1 (sequential).
    ///
    /// Sequential processing keeps well inside the service's rate limits.
    /// Raise it for large documents when your quota allows.
    pub concurrency: usize,

    /// Per-request HTTP timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Directory receiving the split chunk PDFs. Default: None (kept in memory).
    pub split_dir: Option<PathBuf>,

    /// Directory receiving per-chunk Markdown as each chunk succeeds.
    pub chunk_output_dir: Option<PathBuf>,

    /// Sampling temperature for structured extraction. Default: 0.0.
    pub temperature: f32,

    /// Pre-constructed OCR backend. Takes precedence over the Mistral client.
    pub processor: Option<Arc<dyn RemoteProcessor>>,

    /// Pre-constructed splitter. Takes precedence over pdfium.
    pub splitter: Option<Arc<dyn DocumentSplitter>>,

    /// Pre-constructed structured extractor. Takes precedence over the LLM provider.
    pub structurer: Option<Arc<dyn StructuredExtractor>>,

    /// Optional per-chunk progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            ocr_model: DEFAULT_OCR_MODEL.to_string(),
            structured_model: DEFAULT_STRUCTURED_MODEL.to_string(),
            max_retries: 3,
            retry_delay_ms: 2000,
            backoff_factor: 2.0,
            split: false,
            chunk_count: 100,
            chunk_retries: 2,
            chunk_retry_delay_ms: 2000,
            concurrency: 1,
            api_timeout_secs: 120,
            split_dir: None,
            chunk_output_dir: None,
            temperature: 0.0,
            processor: None,
            splitter: None,
            structurer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("ocr_model", &self.ocr_model)
            .field("structured_model", &self.structured_model)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("backoff_factor", &self.backoff_factor)
            .field("split", &self.split)
            .field("chunk_count", &self.chunk_count)
            .field("chunk_retries", &self.chunk_retries)
            .field("chunk_retry_delay_ms", &self.chunk_retry_delay_ms)
            .field("concurrency", &self.concurrency)
            .field("split_dir", &self.split_dir)
            .field("chunk_output_dir", &self.chunk_output_dir)
            .field("processor", &self.processor.as_ref().map(|_| "<dyn RemoteProcessor>"))
            .field("splitter", &self.splitter.as_ref().map(|_| "<dyn DocumentSplitter>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The inner, per-remote-call retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_delay_ms),
            self.backoff_factor,
        )
    }

    /// Linear delay unit between whole-chunk attempts.
    pub fn chunk_retry_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_retry_delay_ms)
    }

    /// Resolve the API key: explicit setting first, then `MISTRAL_API_KEY`.
    ///
    /// Called before any remote request so a missing credential is reported
    /// without touching the network.
    pub fn resolve_api_key(&self) -> Result<String, OcrError> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.to_string());
        }
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(OcrError::MissingApiKey),
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn ocr_model(mut self, model: impl Into<String>) -> Self {
        self.config.ocr_model = model.into();
        self
    }

    pub fn structured_model(mut self, model: impl Into<String>) -> Self {
        self.config.structured_model = model.into();
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    /// Convenience for the CLI's `--retry-delay <seconds>`.
    pub fn retry_delay_secs(mut self, secs: f64) -> Self {
        self.config.retry_delay_ms = (secs.max(0.0) * 1000.0).round() as u64;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    pub fn split(mut self, enabled: bool) -> Self {
        self.config.split = enabled;
        self
    }

    pub fn chunk_count(mut self, n: usize) -> Self {
        self.config.chunk_count = n;
        self
    }

    pub fn chunk_retries(mut self, n: u32) -> Self {
        self.config.chunk_retries = n;
        self
    }

    pub fn chunk_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.chunk_retry_delay_ms = ms;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn split_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.split_dir = Some(dir.into());
        self
    }

    pub fn chunk_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.chunk_output_dir = Some(dir.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn RemoteProcessor>) -> Self {
        self.config.processor = Some(processor);
        self
    }

    pub fn splitter(mut self, splitter: Arc<dyn DocumentSplitter>) -> Self {
        self.config.splitter = Some(splitter);
        self
    }

    pub fn structurer(mut self, structurer: Arc<dyn StructuredExtractor>) -> Self {
        self.config.structurer = Some(structurer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, OcrError> {
        let c = &self.config;
        if c.chunk_count == 0 {
            return Err(OcrError::InvalidConfig(
                "Chunk count must be ≥ 1".into(),
            ));
        }
        if !c.backoff_factor.is_finite() || c.backoff_factor < 1.0 {
            return Err(OcrError::InvalidConfig(format!(
                "Backoff factor must be ≥ 1.0, got {}",
                c.backoff_factor
            )));
        }
        if c.ocr_model.trim().is_empty() {
            return Err(OcrError::InvalidConfig("OCR model must not be empty".into()));
        }
        if !c.api_base.starts_with("http://") && !c.api_base.starts_with("https://") {
            return Err(OcrError::InvalidConfig(format!(
                "API base must be an HTTP/HTTPS URL, got '{}'",
                c.api_base
            )));
        }
        Ok(self.config)
    }
}

/// Serialises tests that read or write `MISTRAL_API_KEY`.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let c = ConversionConfig::default();
        assert_eq!(c.ocr_model, "mistral-ocr-latest");
        assert_eq!(c.structured_model, "pixtral-12b-latest");
        assert_eq!(c.chunk_count, 100);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_delay_ms, 2000);
        assert_eq!(c.chunk_retries, 2);
        assert_eq!(c.concurrency, 1);
        assert!(!c.split);
    }

    #[test]
    fn builder_rejects_zero_chunks() {
        let err = ConversionConfig::builder().chunk_count(0).build().unwrap_err();
        assert!(matches!(err, OcrError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_shrinking_backoff() {
        assert!(ConversionConfig::builder().backoff_factor(0.5).build().is_err());
        assert!(ConversionConfig::builder().backoff_factor(f64::NAN).build().is_err());
        assert!(ConversionConfig::builder().backoff_factor(1.0).build().is_ok());
    }

    #[test]
    fn builder_clamps_concurrency_and_trims_base() {
        let c = ConversionConfig::builder()
            .concurrency(0)
            .api_base("http://localhost:8080/")
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.api_base, "http://localhost:8080");
    }

    #[test]
    fn retry_delay_secs_converts_to_ms() {
        let c = ConversionConfig::builder().retry_delay_secs(1.5).build().unwrap();
        assert_eq!(c.retry_delay_ms, 1500);
        assert_eq!(c.retry_policy().delay_for(0), Duration::from_millis(1500));
    }

    #[test]
    fn explicit_api_key_wins() {
        let c = ConversionConfig::builder().api_key("sk-explicit").build().unwrap();
        assert_eq!(c.resolve_api_key().unwrap(), "sk-explicit");
    }

    #[test]
    fn api_key_falls_back_to_env() {
        let _env = lock_env();
        let previous = std::env::var(API_KEY_ENV).ok();

        std::env::set_var(API_KEY_ENV, "sk-from-env");
        let c = ConversionConfig::builder().build().unwrap();
        assert_eq!(c.resolve_api_key().unwrap(), "sk-from-env");

        // A blank explicit key does not shadow the variable.
        let c = ConversionConfig::builder().api_key("  ").build().unwrap();
        assert_eq!(c.resolve_api_key().unwrap(), "sk-from-env");

        std::env::set_var(API_KEY_ENV, " ");
        assert!(matches!(c.resolve_api_key(), Err(OcrError::MissingApiKey)));

        match previous {
            Some(v) => std::env::set_var(API_KEY_ENV, v),
            None => std::env::remove_var(API_KEY_ENV),
        }
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ConversionConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
