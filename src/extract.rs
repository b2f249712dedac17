//! Per-page text extraction for PDF documents.
//!
//! The loader only needs an ordered list of page texts; [`PageSource`] is
//! that seam. [`PdfPageSource`] reads the file from disk and hands the bytes
//! to `pdf-extract`. Tests substitute in-memory sources with call counters.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a PDF (missing %PDF header)")]
    NotPdf,
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Produces the text of each page of a document, in page order.
pub trait PageSource: Send + Sync {
    fn pages(&self, path: &Path) -> Result<Vec<String>, ExtractError>;
}

/// Extracts pages from a PDF on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfPageSource;

impl PageSource for PdfPageSource {
    fn pages(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let bytes = std::fs::read(path)?;
        extract_pdf_pages(&bytes)
    }
}

/// Splits a PDF into page texts.
///
/// `pdf-extract` panics on some malformed inputs; those panics are caught
/// and reported as [`ExtractError::Pdf`].
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractError::NotPdf);
    }
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes));
    match result {
        Ok(Ok(pages)) if pages.is_empty() => Err(ExtractError::Pdf("document has no pages".to_string())),
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("extractor panicked on malformed input".to_string())),
    }
}
