//! Document splitting: partition a PDF into contiguous page-range chunks.
//!
//! Planning is pure arithmetic ([`plan_chunks`]) and independent of any PDF
//! library, so the partition invariants can be tested exhaustively. The
//! byte-level work (copying each page range into a fresh PDF) is done by
//! [`PdfiumSplitter`] on the blocking thread pool, because pdfium is a
//! synchronous C library.
//!
//! ## Sizing rule
//!
//! `pages_per_chunk = max(1, ceil(total / target))`, then
//! `chunks = ceil(total / pages_per_chunk)`. Asking for more chunks than
//! there are pages therefore collapses to one page per chunk rather than
//! producing empty chunks.

use crate::error::OcrError;
use crate::pipeline::input::{Document, DocumentKind};
use crate::pipeline::pdfium::bind_pdfium;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::ops::Range;
use std::path::PathBuf;
use tracing::{debug, info};

/// One planned chunk: a 1-based ordinal and a half-open, 0-based page range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRange {
    pub ordinal: usize,
    pub pages: Range<usize>,
}

impl ChunkRange {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// A contiguous slice of a source document, ready to submit on its own.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 1-based position in the source document's page order.
    pub ordinal: usize,
    /// Number of chunks the source was split into.
    pub total: usize,
    /// 0-based, half-open page range within the source document.
    pub pages: Range<usize>,
    /// The chunk as a standalone document.
    pub document: Document,
}

/// Name given to the sub-document for chunk `ordinal` of `stem`.
pub fn chunk_name(stem: &str, ordinal: usize) -> String {
    format!("{stem}_chunk_{ordinal:03}")
}

/// Plan the partition of `total_pages` into at most `target_chunk_count` chunks.
pub fn plan_chunks(total_pages: usize, target_chunk_count: usize) -> Result<Vec<ChunkRange>, OcrError> {
    if target_chunk_count == 0 {
        return Err(OcrError::InvalidConfig(
            "Chunk count must be ≥ 1".into(),
        ));
    }
    if total_pages == 0 {
        return Err(OcrError::InvalidDocument {
            name: "<document>".into(),
            detail: "document has no pages".into(),
        });
    }

    let pages_per_chunk = total_pages.div_ceil(target_chunk_count).max(1);
    let actual = total_pages.div_ceil(pages_per_chunk);

    Ok((0..actual)
        .map(|i| {
            let start = i * pages_per_chunk;
            let end = ((i + 1) * pages_per_chunk).min(total_pages);
            ChunkRange {
                ordinal: i + 1,
                pages: start..end,
            }
        })
        .collect())
}

/// Splits a paginated document into chunks.
#[async_trait]
pub trait DocumentSplitter: Send + Sync {
    /// Split `document` into at most `target_chunk_count` chunks.
    ///
    /// Fails with [`OcrError::InvalidDocument`] when the document has no
    /// pages or cannot be parsed.
    async fn split(&self, document: &Document, target_chunk_count: usize) -> Result<Vec<Chunk>, OcrError>;
}

/// pdfium-backed splitter.
#[derive(Debug, Clone, Default)]
pub struct PdfiumSplitter {
    /// When set, each chunk PDF is also written here as `{stem}_chunk_NNN.pdf`.
    pub split_dir: Option<PathBuf>,
}

impl PdfiumSplitter {
    pub fn new(split_dir: Option<PathBuf>) -> Self {
        Self { split_dir }
    }
}

#[async_trait]
impl DocumentSplitter for PdfiumSplitter {
    async fn split(&self, document: &Document, target_chunk_count: usize) -> Result<Vec<Chunk>, OcrError> {
        if !document.is_pdf() {
            return Err(OcrError::InvalidDocument {
                name: document.name.clone(),
                detail: "only PDF documents can be split".into(),
            });
        }

        let doc = document.clone();
        let chunks = tokio::task::spawn_blocking(move || split_pdf_blocking(&doc, target_chunk_count))
            .await
            .map_err(|e| OcrError::Internal(format!("Split task panicked: {}", e)))??;

        if let Some(ref dir) = self.split_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| OcrError::write_failed(dir, e))?;
            for chunk in &chunks {
                let path = dir.join(chunk.document.file_name());
                tokio::fs::write(&path, &chunk.document.bytes)
                    .await
                    .map_err(|e| OcrError::write_failed(&path, e))?;
            }
            info!(
                "Wrote {} chunk PDFs to {}",
                chunks.len(),
                dir.display()
            );
        }

        Ok(chunks)
    }
}

/// Blocking implementation of PDF splitting.
fn split_pdf_blocking(document: &Document, target_chunk_count: usize) -> Result<Vec<Chunk>, OcrError> {
    let invalid = |detail: String| OcrError::InvalidDocument {
        name: document.name.clone(),
        detail,
    };

    let pdfium = bind_pdfium()?;
    let source = pdfium
        .load_pdf_from_byte_slice(&document.bytes[..], None)
        .map_err(|e| invalid(format!("cannot parse PDF: {e:?}")))?;

    let total_pages = source.pages().len() as usize;
    let plan = plan_chunks(total_pages, target_chunk_count).map_err(|e| match e {
        OcrError::InvalidDocument { detail, .. } => invalid(detail),
        other => other,
    })?;

    info!(
        "Splitting '{}' ({} pages) into {} chunks of up to {} pages",
        document.name,
        total_pages,
        plan.len(),
        plan.first().map(ChunkRange::len).unwrap_or(0)
    );

    let total = plan.len();
    let mut chunks = Vec::with_capacity(total);

    for range in plan {
        let first = PdfPageIndex::try_from(range.pages.start)
            .map_err(|_| invalid(format!("page {} out of range", range.pages.start + 1)))?;
        let last = PdfPageIndex::try_from(range.pages.end - 1)
            .map_err(|_| invalid(format!("page {} out of range", range.pages.end)))?;

        let mut out = pdfium
            .create_new_pdf()
            .map_err(|e| OcrError::Internal(format!("pdfium create: {e:?}")))?;
        out.pages_mut()
            .copy_page_range_from_document(&source, first..=last, 0)
            .map_err(|e| invalid(format!("copying pages {}-{}: {e:?}", range.pages.start + 1, range.pages.end)))?;
        let bytes = out
            .save_to_bytes()
            .map_err(|e| OcrError::Internal(format!("pdfium save: {e:?}")))?;

        debug!(
            "Chunk {}/{}: pages {}-{} → {} bytes",
            range.ordinal,
            total,
            range.pages.start + 1,
            range.pages.end,
            bytes.len()
        );

        chunks.push(Chunk {
            ordinal: range.ordinal,
            total,
            pages: range.pages,
            document: Document::new(
                chunk_name(&document.name, range.ordinal),
                DocumentKind::Pdf,
                bytes,
            ),
        });
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(total: usize, target: usize) {
        let plan = plan_chunks(total, target).unwrap();
        assert!(!plan.is_empty());
        assert!(plan.len() <= target.max(1));
        assert_eq!(plan.iter().map(ChunkRange::len).sum::<usize>(), total);
        assert_eq!(plan[0].pages.start, 0);
        assert_eq!(plan.last().unwrap().pages.end, total);
        for (i, chunk) in plan.iter().enumerate() {
            assert_eq!(chunk.ordinal, i + 1);
            assert!(!chunk.is_empty(), "empty chunk for total={total} target={target}");
        }
        for pair in plan.windows(2) {
            assert_eq!(pair[0].pages.end, pair[1].pages.start, "gap or overlap");
        }
    }

    #[test]
    fn partition_invariants_hold_for_small_grid() {
        for total in 1..=60 {
            for target in 1..=70 {
                assert_partition(total, target);
            }
        }
    }

    #[test]
    fn more_chunks_than_pages_collapses_to_single_pages() {
        let plan = plan_chunks(7, 100).unwrap();
        assert_eq!(plan.len(), 7);
        assert!(plan.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn last_chunk_holds_remainder() {
        // ceil(10/3) = 4 pages per chunk → 4, 4, 2
        let plan = plan_chunks(10, 3).unwrap();
        let sizes: Vec<usize> = plan.iter().map(ChunkRange::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn rounding_up_can_yield_fewer_chunks_than_requested() {
        // ceil(10/4) = 3 pages per chunk → ceil(10/3) = 4 chunks, as asked.
        assert_eq!(plan_chunks(10, 4).unwrap().len(), 4);
        // ceil(9/4) = 3 pages per chunk → only 3 chunks.
        assert_eq!(plan_chunks(9, 4).unwrap().len(), 3);
    }

    #[test]
    fn even_division_has_full_last_chunk() {
        let plan = plan_chunks(12, 4).unwrap();
        assert!(plan.iter().all(|c| c.len() == 3));
    }

    #[test]
    fn zero_pages_is_invalid_document() {
        assert!(matches!(
            plan_chunks(0, 5),
            Err(OcrError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn zero_target_is_invalid_config() {
        assert!(matches!(plan_chunks(5, 0), Err(OcrError::InvalidConfig(_))));
    }

    #[test]
    fn chunk_names_are_zero_padded() {
        assert_eq!(chunk_name("report", 7), "report_chunk_007");
        assert_eq!(chunk_name("report", 120), "report_chunk_120");
    }

    #[tokio::test]
    async fn splitting_an_image_is_rejected() {
        let doc = Document::new(
            "scan",
            DocumentKind::Image(crate::pipeline::input::ImageKind::Png),
            vec![0x89, b'P', b'N', b'G'],
        );
        let err = PdfiumSplitter::default().split(&doc, 4).await.unwrap_err();
        assert!(matches!(err, OcrError::InvalidDocument { .. }));
    }
}
