//! Locate and bind the pdfium shared library.
//!
//! pdfium is only needed to split large PDFs; single-shot conversion never
//! touches it. Lookup order:
//!
//! 1. `PDFIUM_LIB_PATH`: a library file or a directory containing one
//! 2. the directory of the running executable
//! 3. the current working directory
//! 4. the system library search path

use crate::error::OcrError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable pointing at an existing pdfium library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium, returning a descriptive error when no library is found.
pub fn bind_pdfium() -> Result<Pdfium, OcrError> {
    if let Some(value) = std::env::var_os(PDFIUM_LIB_PATH_ENV) {
        let path = PathBuf::from(value);
        return bind_at(&path).map_err(|e| {
            OcrError::PdfiumBindingFailed(format!(
                "{PDFIUM_LIB_PATH_ENV}={} could not be loaded: {e:?}",
                path.display()
            ))
        });
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(dir);
    }
    candidates.push(PathBuf::from("./"));

    for dir in &candidates {
        if let Ok(pdfium) = bind_at(dir) {
            debug!("Bound pdfium from {}", dir.display());
            return Ok(pdfium);
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| OcrError::PdfiumBindingFailed(format!("{e:?}")))
}

fn bind_at(path: &Path) -> Result<Pdfium, PdfiumError> {
    let lib = if path.is_dir() {
        PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(path))
    } else {
        path.to_path_buf()
    };
    Pdfium::bind_to_library(lib).map(Pdfium::new)
}
