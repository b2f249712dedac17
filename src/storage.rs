//! Materialized documents in the upload directory.
//!
//! Every job works on its own copy under `storage.upload_dir`. The
//! [`DocumentHandle`] owns that copy and deletes it when dropped, whichever
//! way the job ends.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::AnalysisError;

/// Copies `source` into `upload_dir` as `financial_document_<uuid>.pdf`.
pub fn stage_document(upload_dir: &Path, source: &Path) -> Result<DocumentHandle> {
    std::fs::create_dir_all(upload_dir)
        .with_context(|| format!("Failed to create upload dir: {}", upload_dir.display()))?;
    let target = upload_dir.join(format!("financial_document_{}.pdf", uuid::Uuid::new_v4()));
    std::fs::copy(source, &target).with_context(|| {
        format!(
            "Failed to copy {} into {}",
            source.display(),
            upload_dir.display()
        )
    })?;
    debug!(path = %target.display(), "document staged");
    Ok(DocumentHandle::new(target))
}

/// Checks that `raw` names an existing `.pdf` file inside `upload_dir` and
/// returns its canonical path.
pub fn validate_document_path(upload_dir: &Path, raw: &str) -> Result<PathBuf, AnalysisError> {
    let candidate = Path::new(raw);
    let is_pdf = candidate
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf {
        return Err(AnalysisError::InvalidDocument(
            "only PDF files are supported".to_string(),
        ));
    }

    let root = upload_dir.canonicalize().map_err(|_| {
        AnalysisError::InvalidDocument(format!(
            "upload directory {} does not exist",
            upload_dir.display()
        ))
    })?;
    let path = candidate
        .canonicalize()
        .map_err(|_| AnalysisError::InvalidDocument(format!("document not found: {}", raw)))?;

    if !path.starts_with(&root) {
        return Err(AnalysisError::InvalidDocument(format!(
            "document must be inside {}",
            upload_dir.display()
        )));
    }
    if !path.is_file() {
        return Err(AnalysisError::InvalidDocument(format!("not a file: {}", raw)));
    }
    Ok(path)
}

/// Scoped owner of a materialized document. Dropping it removes the file;
/// removal failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct DocumentHandle {
    path: PathBuf,
}

impl DocumentHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_str(&self) -> String {
        self.path.display().to_string()
    }

    /// Releases ownership without removing the file. Used when the job that
    /// will own the document runs in another process.
    pub fn keep(self) -> PathBuf {
        let this = std::mem::ManuallyDrop::new(self);
        this.path.clone()
    }
}

impl Drop for DocumentHandle {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "document removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove document"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn staged_copy_is_removed_on_drop() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("report.pdf");
        std::fs::write(&source, b"%PDF-1.4 fake").unwrap();
        let uploads = tmp.path().join("uploads");

        let staged_path = {
            let handle = stage_document(&uploads, &source).unwrap();
            let name = handle.path().file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("financial_document_"));
            assert!(name.ends_with(".pdf"));
            assert!(handle.path().exists());
            handle.path().to_path_buf()
        };

        assert!(!staged_path.exists());
        assert!(source.exists());
    }

    #[test]
    fn handle_removes_file_during_unwind() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.pdf");
        std::fs::write(&path, b"x").unwrap();
        let moved = path.clone();
        let result = std::panic::catch_unwind(move || {
            let _handle = DocumentHandle::new(moved);
            panic!("job blew up");
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn kept_handle_leaves_file_in_place() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keep.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let kept = DocumentHandle::new(&path).keep();
        assert_eq!(kept, path);
        assert!(path.exists());
    }

    #[test]
    fn dropping_already_removed_file_is_quiet() {
        let tmp = TempDir::new().unwrap();
        let handle = DocumentHandle::new(tmp.path().join("gone.pdf"));
        drop(handle);
    }

    #[test]
    fn validation_rules() {
        let tmp = TempDir::new().unwrap();
        let uploads = tmp.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let inside = uploads.join("a.pdf");
        std::fs::write(&inside, b"%PDF").unwrap();
        let outside = tmp.path().join("b.pdf");
        std::fs::write(&outside, b"%PDF").unwrap();
        let text = uploads.join("notes.txt");
        std::fs::write(&text, b"hi").unwrap();

        assert!(validate_document_path(&uploads, inside.to_str().unwrap()).is_ok());
        assert!(validate_document_path(&uploads, outside.to_str().unwrap()).is_err());
        assert!(validate_document_path(&uploads, text.to_str().unwrap()).is_err());
        let missing = uploads.join("missing.pdf");
        assert!(validate_document_path(&uploads, missing.to_str().unwrap()).is_err());
        let escape = format!("{}/../b.pdf", uploads.display());
        assert!(validate_document_path(&uploads, &escape).is_err());
    }
}
