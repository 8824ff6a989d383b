//! HTTP client for the Mistral OCR API.
//!
//! ## Request flow
//!
//! ```text
//! PDF   ── POST /v1/files (multipart, purpose=ocr) ──▶ file id
//!       ── GET  /v1/files/{id}/url?expiry=1        ──▶ signed URL
//!       ── POST /v1/ocr  {document_url}            ──▶ pages[].markdown
//!
//! Image ── data:<mime>;base64,…  (built locally, no upload)
//!       ── POST /v1/ocr  {image_url}               ──▶ pages[].markdown
//! ```
//!
//! Every failure is classified into a [`RemoteError`] here, at the lowest
//! layer, so the retry policy above only has to ask `is_retryable()`.

use crate::config::ConversionConfig;
use crate::error::{OcrError, RemoteError};
use crate::output::OcrResponse;
use crate::pipeline::input::{Document, DocumentKind};
use crate::remote::{DocumentRef, RemoteProcessor};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hours a signed upload URL stays valid.
const SIGNED_URL_EXPIRY_HOURS: u32 = 1;

/// Longest response-body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 300;

/// Mistral OCR API client.
#[derive(Clone)]
pub struct MistralClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl fmt::Debug for MistralClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MistralClient")
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: OcrDocument<'a>,
    include_image_base64: bool,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OcrDocument<'a> {
    DocumentUrl { document_url: &'a str },
    ImageUrl { image_url: &'a str },
}

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Deserialize)]
struct SignedUrl {
    url: String,
}

impl MistralClient {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, OcrError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build a client from the configuration, resolving the API key.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, OcrError> {
        let key = config.resolve_api_key()?;
        Self::new(
            key,
            config.api_base.clone(),
            Duration::from_secs(config.api_timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn upload(&self, document: &Document) -> Result<String, RemoteError> {
        let url = self.endpoint("/v1/files");
        info!(
            "Uploading {} ({} bytes) to Mistral OCR service",
            document.file_name(),
            document.bytes.len()
        );

        let part = Part::bytes(document.bytes.to_vec())
            .file_name(document.file_name())
            .mime_str(document.kind.mime_type())
            .map_err(|e| RemoteError::Permanent {
                status: None,
                message: format!("invalid upload part: {e}"),
            })?;
        let form = Form::new().text("purpose", "ocr").part("file", part);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let file: UploadedFile = read_json(&url, response).await?;
        debug!("Uploaded {} as file {}", document.file_name(), file.id);
        Ok(file.id)
    }

    async fn signed_url(&self, file_id: &str) -> Result<String, RemoteError> {
        let url = self.endpoint(&format!("/v1/files/{file_id}/url"));
        let response = self
            .http
            .get(&url)
            .query(&[("expiry", SIGNED_URL_EXPIRY_HOURS)])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let signed: SignedUrl = read_json(&url, response).await?;
        Ok(signed.url)
    }
}

#[async_trait]
impl RemoteProcessor for MistralClient {
    async fn submit(&self, document: &Document) -> Result<DocumentRef, RemoteError> {
        match document.kind {
            DocumentKind::Pdf => {
                let file_id = self.upload(document).await?;
                let url = self.signed_url(&file_id).await?;
                Ok(DocumentRef::DocumentUrl(url))
            }
            DocumentKind::Image(_) => Ok(DocumentRef::ImageUrl(document.data_url())),
        }
    }

    async fn extract(&self, reference: &DocumentRef, model: &str) -> Result<OcrResponse, RemoteError> {
        let url = self.endpoint("/v1/ocr");
        let document = match reference {
            DocumentRef::DocumentUrl(u) => OcrDocument::DocumentUrl { document_url: u },
            DocumentRef::ImageUrl(u) => OcrDocument::ImageUrl { image_url: u },
        };
        let body = OcrRequest {
            model,
            document,
            include_image_base64: false,
        };

        info!("Processing document with Mistral OCR ({model})");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let ocr: OcrResponse = read_json(&url, response).await?;
        if let Some(ref usage) = ocr.usage_info {
            debug!(
                "OCR usage: {:?} pages, {:?} bytes",
                usage.pages_processed, usage.doc_size_bytes
            );
        }
        Ok(ocr)
    }
}

/// Check the status and decode a JSON body, classifying any failure.
async fn read_json<T: serde::de::DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let err = RemoteError::from_status(status.as_u16(), excerpt(&body));
        warn!(
            "{} returned HTTP {}: {}",
            endpoint,
            status.as_u16(),
            err.hint()
        );
        return Err(err);
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(endpoint, e))?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Permanent {
        status: Some(status.as_u16()),
        message: format!("malformed response from {endpoint}: {e}"),
    })
}

/// Classify an error that produced no HTTP status.
fn transport_error(endpoint: &str, e: reqwest::Error) -> RemoteError {
    if e.is_decode() || e.is_builder() {
        RemoteError::Permanent {
            status: None,
            message: e.to_string(),
        }
    } else {
        RemoteError::Connection {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        }
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY {
        let cut: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
        format!("{cut}\u{2026}")
    } else {
        trimmed.to_string()
    }
}
