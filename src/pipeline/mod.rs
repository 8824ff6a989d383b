//! Local document handling: everything that happens before and around the
//! remote calls.
//!
//! 1. [`input`]  loads a file, dispatches on its extension and checks the
//!    magic bytes
//! 2. [`split`]  plans page ranges and cuts a PDF into chunk PDFs
//! 3. [`pdfium`] binds the pdfium library used by the splitter

pub mod input;
pub mod pdfium;
pub mod split;
