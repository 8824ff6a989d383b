//! Result types: single-shot conversions and chunked pipeline outcomes.

use crate::error::{ChunkError, OcrError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::ops::Range;
use std::path::Path;

/// Separator placed between pages and between merged chunks.
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// One page of OCR output as returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    /// 0-based page index within the submitted document.
    pub index: usize,
    pub markdown: String,
}

/// Usage accounting reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(default)]
    pub pages_processed: Option<u64>,
    #[serde(default)]
    pub doc_size_bytes: Option<u64>,
}

/// Raw OCR response for one submitted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResponse {
    pub pages: Vec<OcrPage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage_info: Option<UsageInfo>,
}

impl OcrResponse {
    /// Join every page's Markdown with a blank line, in page order.
    pub fn combined_markdown(&self) -> String {
        let mut pages: Vec<&OcrPage> = self.pages.iter().collect();
        pages.sort_by_key(|p| p.index);
        pages
            .iter()
            .map(|p| p.markdown.as_str())
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR)
    }
}

/// Result of converting one document (or one chunk) in a single shot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Page Markdown joined with blank lines.
    pub markdown: String,
    pub pages: Vec<OcrPage>,
    pub usage: Option<UsageInfo>,
    pub duration_ms: u64,
}

/// A chunk that converted successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOutput {
    /// 1-based chunk ordinal.
    pub ordinal: usize,
    /// 0-based, half-open page range in the source document.
    pub pages: Range<usize>,
    pub markdown: String,
    /// Outer attempts used, including the successful one.
    pub attempts: u32,
}

/// Aggregate status of a chunked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    /// Every chunk succeeded.
    Complete,
    /// At least one chunk succeeded and at least one failed.
    Partial,
    /// No chunk succeeded.
    Failed,
}

/// Everything a chunked run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Successful chunks in ascending ordinal order.
    pub outputs: Vec<ChunkOutput>,
    /// Failed chunks in ascending ordinal order.
    pub failures: Vec<ChunkError>,
    /// Number of chunks the document was split into.
    pub total_chunks: usize,
    pub duration_ms: u64,
}

impl PipelineOutcome {
    pub fn status(&self) -> PipelineStatus {
        match (self.outputs.is_empty(), self.failures.is_empty()) {
            (true, _) => PipelineStatus::Failed,
            (false, true) => PipelineStatus::Complete,
            (false, false) => PipelineStatus::Partial,
        }
    }

    /// Ordinals of the chunks that failed, ascending.
    pub fn failed_ordinals(&self) -> Vec<usize> {
        self.failures.iter().map(ChunkError::ordinal).collect()
    }

    /// Successful outputs joined in ordinal order with a blank line between
    /// chunks. `None` when every chunk failed.
    pub fn merged(&self) -> Option<String> {
        if self.outputs.is_empty() {
            return None;
        }
        Some(merge_blocks(self.outputs.iter().map(|o| o.markdown.as_str())))
    }

    /// Treat any chunk failure as an error.
    pub fn into_result(self) -> Result<String, OcrError> {
        match self.status() {
            PipelineStatus::Complete => Ok(self.merged().unwrap_or_default()),
            PipelineStatus::Partial => Err(OcrError::PartialFailure {
                failed: self.failures.len(),
                total: self.total_chunks,
                ordinals: self.failed_ordinals(),
            }),
            PipelineStatus::Failed => Err(self.all_failed_error(0)),
        }
    }

    pub(crate) fn all_failed_error(&self, attempts: u32) -> OcrError {
        let (attempts, first_error) = match self.failures.first() {
            Some(ChunkError::Failed { attempts, detail, .. }) => (*attempts, detail.clone()),
            None => (attempts, "Unknown error".to_string()),
        };
        OcrError::AllChunksFailed {
            total: self.total_chunks,
            attempts,
            first_error,
        }
    }
}

/// Join text blocks with exactly one blank line between consecutive blocks.
pub fn merge_blocks<'a>(blocks: impl IntoIterator<Item = &'a str>) -> String {
    blocks.into_iter().collect::<Vec<_>>().join(BLOCK_SEPARATOR)
}

/// Write `contents` to `path` through a temporary file in the same
/// directory, so readers never observe a half-written output.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), OcrError> {
    let path = path.to_path_buf();
    let contents = contents.to_vec();
    tokio::task::spawn_blocking(move || {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| OcrError::write_failed(&path, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| OcrError::write_failed(&path, e))?;
        tmp.write_all(&contents)
            .map_err(|e| OcrError::write_failed(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| OcrError::write_failed(&path, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| OcrError::Internal(format!("Write task panicked: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(ordinal: usize, text: &str) -> ChunkOutput {
        ChunkOutput {
            ordinal,
            pages: ordinal - 1..ordinal,
            markdown: text.to_string(),
            attempts: 1,
        }
    }

    fn failure(ordinal: usize) -> ChunkError {
        ChunkError::Failed {
            ordinal,
            attempts: 3,
            detail: "HTTP 503".into(),
        }
    }

    #[test]
    fn combined_markdown_orders_pages() {
        let resp = OcrResponse {
            pages: vec![
                OcrPage { index: 1, markdown: "second".into() },
                OcrPage { index: 0, markdown: "first".into() },
            ],
            model: None,
            usage_info: None,
        };
        assert_eq!(resp.combined_markdown(), "first\n\nsecond");
    }

    #[test]
    fn status_derivation() {
        let complete = PipelineOutcome {
            outputs: vec![output(1, "a")],
            failures: vec![],
            total_chunks: 1,
            duration_ms: 0,
        };
        assert_eq!(complete.status(), PipelineStatus::Complete);

        let partial = PipelineOutcome {
            outputs: vec![output(1, "a")],
            failures: vec![failure(2)],
            total_chunks: 2,
            duration_ms: 0,
        };
        assert_eq!(partial.status(), PipelineStatus::Partial);
        assert_eq!(partial.failed_ordinals(), vec![2]);

        let failed = PipelineOutcome {
            outputs: vec![],
            failures: vec![failure(1)],
            total_chunks: 1,
            duration_ms: 0,
        };
        assert_eq!(failed.status(), PipelineStatus::Failed);
        assert!(failed.merged().is_none());
    }

    #[test]
    fn into_result_surfaces_partial_failure() {
        let partial = PipelineOutcome {
            outputs: vec![output(1, "a"), output(3, "c")],
            failures: vec![failure(2)],
            total_chunks: 3,
            duration_ms: 0,
        };
        match partial.into_result() {
            Err(OcrError::PartialFailure { ordinals, .. }) => assert_eq!(ordinals, vec![2]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn all_failed_reports_first_error() {
        let failed = PipelineOutcome {
            outputs: vec![],
            failures: vec![failure(1), failure(2)],
            total_chunks: 2,
            duration_ms: 0,
        };
        match failed.all_failed_error(3) {
            OcrError::AllChunksFailed { total, first_error, .. } => {
                assert_eq!(total, 2);
                assert_eq!(first_error, "HTTP 503");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn atomic_write_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.md");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn usage_info_tolerates_missing_fields() {
        let usage: UsageInfo = serde_json::from_str(r#"{"pages_processed": 4}"#).unwrap();
        assert_eq!(usage.pages_processed, Some(4));
        assert_eq!(usage.doc_size_bytes, None);
    }
}
