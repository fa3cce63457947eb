//! Rendering worker contract.
//!
//! A worker wraps one live session of an external office automation
//! process. The orchestrator keeps a single worker for a whole batch, or
//! asks the factory for a fresh one per file when running in safe mode.

use crate::config::{BackendKind, DocumentKind};
use crate::error::WorkerError;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// What a backend can do, declared per implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerCapabilities {
    /// Can print tracked changes and comments into the PDF.
    pub supports_tracked_changes: bool,
    /// Needs a pause after rendering before the process may be torn down.
    pub needs_stabilization: bool,
    /// May write one PDF per sheet next to the requested output.
    pub produces_sheet_artifacts: bool,
}

/// Per-run settings handed to every worker a factory creates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Print tracked changes and comments, where supported.
    pub include_tracked_changes: bool,
}

/// One live rendering session.
#[async_trait]
pub trait Worker: Send {
    /// Load a document.
    async fn open(&mut self, source: &Path) -> Result<(), WorkerError>;

    /// Render the open document to `destination`.
    ///
    /// Spreadsheet backends may additionally write `{stem}_{suffix}.pdf`
    /// files next to `destination`.
    async fn render_to_pdf(&mut self, destination: &Path) -> Result<(), WorkerError>;

    /// Release the open document. Safe to call after a failed render or
    /// when nothing is open.
    async fn close(&mut self);
}

/// Creates workers for one backend.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// Backend implemented by this factory.
    fn backend(&self) -> BackendKind;

    /// Declared capabilities of the backend.
    fn capabilities(&self) -> WorkerCapabilities;

    /// Whether the backend can be invoked on this host at all.
    async fn is_available(&self) -> bool;

    /// Start a new worker for documents of `kind`.
    async fn create(
        &self,
        kind: DocumentKind,
        options: &WorkerOptions,
    ) -> Result<Box<dyn Worker>, WorkerError>;
}

/// PDFs next to `destination` named `{stem}_{suffix}.pdf`.
pub fn sibling_artifacts(destination: &Path) -> BTreeSet<PathBuf> {
    let (Some(dir), Some(stem)) = (destination.parent(), destination.file_stem()) else {
        return BTreeSet::new();
    };
    let prefix = format!("{}_", stem.to_string_lossy());
    let Ok(entries) = std::fs::read_dir(dir) else {
        return BTreeSet::new();
    };

    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| path.is_file() && path.as_path() != destination)
        .filter(|path| {
            let is_pdf = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false);
            let named_after = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false);
            is_pdf && named_after
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sibling_artifacts_found() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("book.pdf");
        fs::write(&dest, "").unwrap();
        fs::write(dir.path().join("book_Sheet1.pdf"), "").unwrap();
        fs::write(dir.path().join("book_Sheet2.PDF"), "").unwrap();
        fs::write(dir.path().join("book_notes.txt"), "").unwrap();
        fs::write(dir.path().join("bookkeeping.pdf"), "").unwrap();

        let found = sibling_artifacts(&dest);
        assert_eq!(found.len(), 2);
        assert!(found.contains(&dir.path().join("book_Sheet1.pdf")));
        assert!(!found.contains(&dest));
    }

    #[test]
    fn test_sibling_artifacts_missing_dir() {
        let found = sibling_artifacts(Path::new("/nonexistent/dir/book.pdf"));
        assert!(found.is_empty());
    }

    #[test]
    fn test_default_capabilities() {
        let caps = WorkerCapabilities::default();
        assert!(!caps.supports_tracked_changes);
        assert!(!caps.needs_stabilization);
    }
}
