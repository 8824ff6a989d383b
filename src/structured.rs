//! Structured extraction: OCR Markdown → JSON through a chat model.
//!
//! ```text
//! image ──OCR──▶ markdown ─┐
//!   └──────── image ───────┴─▶ chat model ──▶ strip fences ──▶ serde_json::Value
//!
//! PDF ──convert (single shot or chunked)──▶ markdown ──▶ chat model ──▶ …
//! ```
//!
//! The chat call goes through `edgequake-llm` and runs under the same
//! [`RetryPolicy`] as OCR requests.

use crate::config::{ConversionConfig, API_KEY_ENV};
use crate::convert::{run_chunked, SingleShotConverter};
use crate::error::{OcrError, RemoteError, Stage};
use crate::output::{write_atomic, PipelineStatus};
use crate::pipeline::input::{default_output_path, load_document, Document};
use crate::prompts::{document_prompt, image_prompt, STRUCTURED_SYSTEM_PROMPT};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, ConfigProviderType, ImageData, LLMProvider, OpenAICompatibleProvider, ProviderConfig,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Completion budget for the JSON answer.
const MAX_COMPLETION_TOKENS: usize = 8192;

/// What the chat model gets to see.
#[derive(Debug, Clone, Copy)]
pub enum StructuredSource<'a> {
    /// An image plus the Markdown OCR produced for it.
    Image {
        document: &'a Document,
        ocr_markdown: &'a str,
    },
    /// Markdown of a converted PDF.
    Markdown(&'a str),
}

/// Turns OCR output into JSON.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(&self, source: StructuredSource<'_>) -> Result<Value, OcrError>;
}

/// [`StructuredExtractor`] backed by an `edgequake-llm` chat provider.
pub struct LlmStructuredExtractor {
    provider: Arc<dyn LLMProvider>,
    retry: RetryPolicy,
    temperature: f32,
}

impl LlmStructuredExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, retry: RetryPolicy, temperature: f32) -> Self {
        Self {
            provider,
            retry,
            temperature,
        }
    }

    /// Create a chat provider for `config.structured_model` against
    /// `{api_base}/v1/chat/completions`.
    ///
    /// The provider reads its credential from `MISTRAL_API_KEY` and this
    /// constructor never writes the process environment. An explicit
    /// `config.api_key` that differs from the exported value is rejected:
    /// export it before starting worker threads (the binary does this for
    /// `--api-key`) or pass a provider to [`Self::new`].
    pub fn from_config(config: &ConversionConfig) -> Result<Self, OcrError> {
        let key = config.resolve_api_key()?;
        if std::env::var(API_KEY_ENV).ok().as_deref() != Some(key.as_str()) {
            return Err(OcrError::InvalidConfig(format!(
                "structured extraction reads its key from {API_KEY_ENV}, which does not hold the configured key; \
                 export it there or inject a structurer"
            )));
        }
        let provider = OpenAICompatibleProvider::from_config(chat_provider_config(config)).map_err(|e| {
            OcrError::InvalidConfig(format!(
                "cannot create chat provider for '{}': {e}",
                config.structured_model
            ))
        })?;
        Ok(Self::new(Arc::new(provider), config.retry_policy(), config.temperature))
    }

    fn build_messages(source: StructuredSource<'_>) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(STRUCTURED_SYSTEM_PROMPT)];
        match source {
            StructuredSource::Image { document, ocr_markdown } => {
                let image = ImageData::new(document.base64(), document.kind.mime_type());
                messages.push(ChatMessage::user_with_images(image_prompt(ocr_markdown), vec![image]));
            }
            StructuredSource::Markdown(markdown) => {
                messages.push(ChatMessage::user(document_prompt(markdown)));
            }
        }
        messages
    }
}

#[async_trait]
impl StructuredExtractor for LlmStructuredExtractor {
    async fn extract(&self, source: StructuredSource<'_>) -> Result<Value, OcrError> {
        let messages = Self::build_messages(source);
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(MAX_COMPLETION_TOKENS),
            ..Default::default()
        };

        let content = self
            .retry
            .execute(
                "structured extraction",
                || async {
                    self.provider
                        .chat(&messages, Some(&options))
                        .await
                        .map(|r| r.content)
                        .map_err(|e| classify_llm_error(&e.to_string()))
                },
                RemoteError::is_retryable,
            )
            .await
            .map_err(|e| OcrError::conversion(Stage::Structured, "chat", e))?;

        debug!("Chat model returned {} chars", content.len());
        parse_json_response(&content)
    }
}

/// Provider settings for Mistral's OpenAI-compatible chat endpoint.
fn chat_provider_config(config: &ConversionConfig) -> ProviderConfig {
    ProviderConfig {
        name: "mistral".into(),
        display_name: "Mistral".into(),
        provider_type: ConfigProviderType::OpenAICompatible,
        api_key_env: Some(API_KEY_ENV.into()),
        base_url: Some(format!("{}/v1", config.api_base.trim_end_matches('/'))),
        base_url_env: None,
        default_llm_model: Some(config.structured_model.clone()),
        ..Default::default()
    }
}

/// Map a provider error message onto the retry taxonomy.
///
/// Provider errors carry no structured status. A status is only read when
/// it follows `HTTP`, `status` or `API` (`"mistral API error 503: …"`), so
/// stray numbers in a message body are ignored. Transport wording maps to
/// [`RemoteError::Connection`]; anything unrecognised is permanent.
pub(crate) fn classify_llm_error(message: &str) -> RemoteError {
    static STATUS: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(?:http|status(?:\s*code)?|api(?:\s+error)?)\s*[:=]?\s*([45]\d\d)\b").expect("valid regex")
    });

    if let Some(status) = STATUS
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
    {
        return RemoteError::from_status(status, message);
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("rate limit") {
        return RemoteError::Transient {
            status: 429,
            message: message.to_string(),
        };
    }
    let transport = ["network error", "connection", "timed out", "timeout"];
    if transport.iter().any(|w| lower.contains(w)) {
        return RemoteError::Connection {
            endpoint: "chat completion".into(),
            detail: message.to_string(),
        };
    }
    RemoteError::Permanent {
        status: None,
        message: message.to_string(),
    }
}

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n(.*?)\n?\s*```\s*$").expect("valid regex"));

/// Remove a surrounding ```` ```json ```` fence, if any.
pub fn strip_json_fences(text: &str) -> &str {
    match FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Parse the model's answer, tolerating fences and surrounding chatter.
pub fn parse_json_response(text: &str) -> Result<Value, OcrError> {
    let body = strip_json_fences(text);
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first) => {
            // Fall back to the outermost object when prose surrounds it.
            if let (Some(open), Some(close)) = (body.find('{'), body.rfind('}')) {
                if open < close {
                    if let Ok(value) = serde_json::from_str(&body[open..=close]) {
                        return Ok(value);
                    }
                }
            }
            Err(OcrError::InvalidStructuredOutput {
                detail: first.to_string(),
            })
        }
    }
}

/// Result of structured extraction.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredOutput {
    pub data: Value,
    /// The OCR Markdown the JSON was derived from.
    pub markdown: String,
}

fn resolve_structurer(config: &ConversionConfig) -> Result<Arc<dyn StructuredExtractor>, OcrError> {
    if let Some(ref structurer) = config.structurer {
        return Ok(Arc::clone(structurer));
    }
    Ok(Arc::new(LlmStructuredExtractor::from_config(config)?))
}

/// OCR a document and ask the chat model for JSON.
///
/// PDFs go through the chunked pipeline when `config.split` is set; a run
/// in which every chunk failed is an error.
pub async fn extract_structured(input: impl AsRef<Path>, config: &ConversionConfig) -> Result<StructuredOutput, OcrError> {
    let document = load_document(input).await?;
    let structurer = resolve_structurer(config)?;

    if document.is_pdf() {
        let markdown = if config.split {
            let outcome = run_chunked(&document, config).await?;
            if outcome.status() == PipelineStatus::Failed {
                return Err(outcome.all_failed_error(config.chunk_retries.saturating_add(1)));
            }
            outcome.merged().unwrap_or_default()
        } else {
            SingleShotConverter::from_config(config)?.convert(&document).await?.markdown
        };
        info!("Requesting structured JSON for '{}'", document.name);
        let data = structurer.extract(StructuredSource::Markdown(&markdown)).await?;
        Ok(StructuredOutput { data, markdown })
    } else {
        let ocr = SingleShotConverter::from_config(config)?.convert(&document).await?;
        info!("Requesting structured JSON for image '{}'", document.name);
        let data = structurer
            .extract(StructuredSource::Image {
                document: &document,
                ocr_markdown: &ocr.markdown,
            })
            .await?;
        Ok(StructuredOutput {
            data,
            markdown: ocr.markdown,
        })
    }
}

/// Run [`extract_structured`] and write pretty-printed JSON to `output`.
///
/// For PDFs the intermediate Markdown is kept next to the JSON
/// (same stem, `.md`).
pub async fn extract_structured_to_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<StructuredOutput, OcrError> {
    let input = input.as_ref();
    let output = output.as_ref();
    let result = extract_structured(input, config).await?;

    if crate::pipeline::input::detect_kind(input)?.extension() == "pdf" {
        let md_path = default_output_path(output, "md");
        write_atomic(&md_path, result.markdown.as_bytes()).await?;
        info!("Wrote {}", md_path.display());
    }

    let json = to_pretty_json(&result.data)?;
    write_atomic(output, json.as_bytes()).await?;
    info!("Wrote {}", output.display());
    Ok(result)
}

/// Pretty-print with four-space indentation.
fn to_pretty_json(value: &Value) -> Result<String, OcrError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| OcrError::Internal(format!("JSON serialisation: {e}")))?;
    String::from_utf8(buf).map_err(|e| OcrError::Internal(format!("JSON serialisation: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_json_fences(text), "{\"a\": 1}");
        assert_eq!(strip_json_fences("```\n[1, 2]\n```\n"), "[1, 2]");
        assert_eq!(strip_json_fences("  {\"b\": 2} "), "{\"b\": 2}");
    }

    #[test]
    fn parses_fenced_and_chatty_answers() {
        let v = parse_json_response("```json\n{\"total\": 12.5}\n```").unwrap();
        assert_eq!(v["total"], 12.5);

        let v = parse_json_response("Here you go: {\"items\": [\"x\"]} Hope this helps").unwrap();
        assert_eq!(v["items"][0], "x");
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_json_response("I cannot do that."),
            Err(OcrError::InvalidStructuredOutput { .. })
        ));
    }

    #[test]
    fn llm_errors_are_classified() {
        assert!(classify_llm_error("HTTP 429 Too Many Requests").is_retryable());
        assert!(classify_llm_error("API error: mistral API error 503: overloaded").is_retryable());
        assert!(classify_llm_error("Rate limit exceeded: slow down").is_retryable());
        assert!(!classify_llm_error("API error: mistral API 401: Unauthorized").is_retryable());
        assert!(!classify_llm_error("Authentication error: invalid api key").is_retryable());
        assert!(classify_llm_error("Network error: connection reset by peer").is_retryable());
        assert!(classify_llm_error("Request timed out").is_retryable());
    }

    #[test]
    fn stray_numbers_are_not_statuses() {
        // Token counts and page numbers that look like 4xx/5xx.
        let err = classify_llm_error("Token limit exceeded: max 500, got 512");
        assert!(matches!(err, RemoteError::Permanent { status: None, .. }));
        assert!(!classify_llm_error("Invalid request: page 404 of the prompt is empty").is_retryable());
        assert_eq!(classify_llm_error("status=502 bad gateway").status(), Some(502));
    }

    #[test]
    fn unknown_errors_are_permanent() {
        let err = classify_llm_error("Unknown error: model produced no choices");
        assert!(!err.is_retryable());
        assert!(!classify_llm_error("Serialization error: expected value").is_retryable());
    }

    #[test]
    fn chat_provider_targets_configured_base() {
        let config = ConversionConfig::builder()
            .api_base("http://localhost:9000/")
            .structured_model("pixtral-large-latest")
            .build()
            .unwrap();
        let pc = chat_provider_config(&config);
        assert_eq!(pc.base_url.as_deref(), Some("http://localhost:9000/v1"));
        assert_eq!(pc.base_url_env, None);
        assert_eq!(pc.api_key_env.as_deref(), Some(API_KEY_ENV));
        assert_eq!(pc.default_llm_model.as_deref(), Some("pixtral-large-latest"));
    }

    #[test]
    fn from_config_never_rewrites_the_environment() {
        let _env = crate::config::lock_env();
        let previous = std::env::var(API_KEY_ENV).ok();
        std::env::set_var(API_KEY_ENV, "sk-exported");

        let mismatched = ConversionConfig::builder().api_key("sk-other").build().unwrap();
        let err = LlmStructuredExtractor::from_config(&mismatched).err();
        let after = std::env::var(API_KEY_ENV).ok();

        let matching = ConversionConfig::builder().api_key("sk-exported").build().unwrap();
        let built = LlmStructuredExtractor::from_config(&matching).is_ok();
        let from_env = LlmStructuredExtractor::from_config(&ConversionConfig::default()).is_ok();

        match previous {
            Some(v) => std::env::set_var(API_KEY_ENV, v),
            None => std::env::remove_var(API_KEY_ENV),
        }
        assert!(matches!(err, Some(OcrError::InvalidConfig(_))));
        assert_eq!(after.as_deref(), Some("sk-exported"));
        assert!(built);
        assert!(from_env);
    }

    #[test]
    fn pretty_json_uses_four_spaces() {
        let json = to_pretty_json(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(json, "{\n    \"a\": 1\n}");
    }
}
