//! Input loading: turn a user-supplied path into an immutable [`Document`].
//!
//! The file is read exactly once, up front. Dispatch is by extension
//! (`.pdf` vs `.jpg`/`.jpeg`/`.png`), and the leading bytes are checked
//! against the claimed format so a mislabelled file fails here with a
//! meaningful error instead of as an opaque HTTP 400 from the service.

use crate::error::OcrError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Raster formats accepted by the OCR endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }

    fn image_format(&self) -> image::ImageFormat {
        match self {
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// What kind of document a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// A paginated PDF; eligible for chunking.
    Pdf,
    /// A single raster image; always processed in one shot.
    Image(ImageKind),
}

impl DocumentKind {
    /// Dispatch on a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "png" => Some(DocumentKind::Image(ImageKind::Png)),
            "jpg" | "jpeg" => Some(DocumentKind::Image(ImageKind::Jpeg)),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Image(kind) => kind.mime_type(),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Image(ImageKind::Png) => "png",
            DocumentKind::Image(ImageKind::Jpeg) => "jpg",
        }
    }
}

/// A loaded document. Cloning is cheap: the bytes are shared.
#[derive(Debug, Clone)]
pub struct Document {
    /// File stem, used for upload names and derived file names.
    pub name: String,
    pub kind: DocumentKind,
    pub bytes: Arc<[u8]>,
}

impl Document {
    pub fn new(name: impl Into<String>, kind: DocumentKind, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            kind,
            bytes: bytes.into(),
        }
    }

    /// File name (stem + extension) presented to the upload endpoint.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.kind.extension())
    }

    /// `data:` URL embedding the bytes, for image OCR and vision chat.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.kind.mime_type(), self.base64())
    }

    /// Standard base64 encoding of the raw bytes.
    pub fn base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn is_pdf(&self) -> bool {
        self.kind == DocumentKind::Pdf
    }
}

/// Resolve the document kind for `path` from its extension.
pub fn detect_kind(path: &Path) -> Result<DocumentKind, OcrError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    DocumentKind::from_extension(ext).ok_or_else(|| OcrError::UnsupportedFormat {
        path: path.to_path_buf(),
        extension: if ext.is_empty() {
            "<none>".to_string()
        } else {
            format!(".{}", ext.to_ascii_lowercase())
        },
    })
}

/// Read and validate a local document.
pub async fn load_document(path: impl AsRef<Path>) -> Result<Document, OcrError> {
    let path = path.as_ref();
    let kind = detect_kind(path)?;

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OcrError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(OcrError::InvalidDocument {
                name: path.display().to_string(),
                detail: e.to_string(),
            })
        }
    };

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    validate_bytes(&name, kind, &bytes)?;
    debug!(
        "Loaded {} ({} bytes, {})",
        path.display(),
        bytes.len(),
        kind.mime_type()
    );

    Ok(Document::new(name, kind, bytes))
}

/// Check that the bytes are non-empty and look like the claimed format.
fn validate_bytes(name: &str, kind: DocumentKind, bytes: &[u8]) -> Result<(), OcrError> {
    if bytes.is_empty() {
        return Err(OcrError::InvalidDocument {
            name: name.to_string(),
            detail: "file is empty".into(),
        });
    }

    match kind {
        DocumentKind::Pdf => {
            if !bytes.starts_with(b"%PDF") {
                let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
                return Err(OcrError::InvalidDocument {
                    name: name.to_string(),
                    detail: format!("not a PDF (first bytes: {magic:?})"),
                });
            }
        }
        DocumentKind::Image(expected) => match image::guess_format(bytes) {
            Ok(found) if found == expected.image_format() => {}
            Ok(found) => {
                return Err(OcrError::InvalidDocument {
                    name: name.to_string(),
                    detail: format!(
                        "extension says {} but content is {:?}",
                        expected.mime_type(),
                        found
                    ),
                })
            }
            Err(e) => {
                return Err(OcrError::InvalidDocument {
                    name: name.to_string(),
                    detail: format!("unrecognised image data: {e}"),
                })
            }
        },
    }

    Ok(())
}

/// Default output path: the input with its extension replaced.
pub fn default_output_path(input: &Path, extension: &str) -> PathBuf {
    input.with_extension(extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn extension_dispatch() {
        assert_eq!(DocumentKind::from_extension("PDF"), Some(DocumentKind::Pdf));
        assert_eq!(
            DocumentKind::from_extension("jpeg"),
            Some(DocumentKind::Image(ImageKind::Jpeg))
        );
        assert_eq!(
            DocumentKind::from_extension("Jpg"),
            Some(DocumentKind::Image(ImageKind::Jpeg))
        );
        assert_eq!(
            DocumentKind::from_extension("png"),
            Some(DocumentKind::Image(ImageKind::Png))
        );
        assert_eq!(DocumentKind::from_extension("docx"), None);
    }

    #[test]
    fn unsupported_extension_is_reported() {
        let err = detect_kind(Path::new("notes.TXT")).unwrap_err();
        match err {
            OcrError::UnsupportedFormat { extension, .. } => assert_eq!(extension, ".txt"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            detect_kind(Path::new("README")),
            Err(OcrError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_and_mislabelled() {
        assert!(validate_bytes("a", DocumentKind::Pdf, b"").is_err());
        assert!(validate_bytes("a", DocumentKind::Pdf, b"hello").is_err());
        assert!(validate_bytes("a", DocumentKind::Pdf, b"%PDF-1.7\n").is_ok());
        assert!(validate_bytes("a", DocumentKind::Image(ImageKind::Png), PNG_MAGIC).is_ok());
        assert!(validate_bytes("a", DocumentKind::Image(ImageKind::Jpeg), JPEG_MAGIC).is_ok());
        assert!(validate_bytes("a", DocumentKind::Image(ImageKind::Jpeg), PNG_MAGIC).is_err());
    }

    #[test]
    fn data_url_uses_detected_mime() {
        let doc = Document::new("scan", DocumentKind::Image(ImageKind::Png), PNG_MAGIC.to_vec());
        assert!(doc.data_url().starts_with("data:image/png;base64,"));
        assert_eq!(doc.file_name(), "scan.png");
    }

    #[tokio::test]
    async fn load_missing_file() {
        let err = load_document("/definitely/not/here.pdf").await.unwrap_err();
        assert!(matches!(err, OcrError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn load_valid_pdf_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%%EOF\n").unwrap();

        let doc = load_document(&path).await.unwrap();
        assert_eq!(doc.name, "paper");
        assert!(doc.is_pdf());
        assert_eq!(doc.file_name(), "paper.pdf");
    }

    #[test]
    fn default_output_replaces_extension() {
        assert_eq!(
            default_output_path(Path::new("/tmp/scan.jpeg"), "md"),
            PathBuf::from("/tmp/scan.md")
        );
    }
}
