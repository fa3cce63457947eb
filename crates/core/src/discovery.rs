//! Collect convertible documents from a source folder.

use crate::config::{ConversionRequest, DocumentKind};
use crate::error::{ConversionError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Options for [`discover`].
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Directory that receives the PDFs.
    pub destination_root: PathBuf,
    /// Descend into sub-folders.
    pub recurse_subfolders: bool,
    /// Mirror the source sub-folders under the destination.
    pub keep_folder_structure: bool,
}

/// Office lock files (`~$report.docx`) and hidden files are never sources.
fn is_ignored(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with("~$") || name.starts_with('.'))
        .unwrap_or(false)
}

/// Find every supported document under `source_root`, one request per kind.
///
/// Sources are sorted by path; kinds without documents are omitted.
pub fn discover(source_root: &Path, options: &DiscoveryOptions) -> Result<Vec<ConversionRequest>> {
    if !source_root.is_dir() {
        return Err(ConversionError::InputNotFound(source_root.to_path_buf()));
    }

    let max_depth = if options.recurse_subfolders { usize::MAX } else { 1 };
    let mut by_kind: BTreeMap<DocumentKind, Vec<PathBuf>> = BTreeMap::new();
    let walker = WalkDir::new(source_root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e));

    for entry in walker {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => ConversionError::Io(io),
            None => ConversionError::InvalidConfig("filesystem loop in source folder".to_string()),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(kind) = DocumentKind::from_path(entry.path()) {
            by_kind.entry(kind).or_default().push(entry.into_path());
        }
    }

    let requests: Vec<ConversionRequest> = by_kind
        .into_iter()
        .map(|(kind, mut paths)| {
            paths.sort();
            debug!("Found {} {} documents", paths.len(), kind);
            let mut request =
                ConversionRequest::new(kind, options.destination_root.clone()).with_sources(paths);
            request.source_root = Some(source_root.to_path_buf());
            request.keep_folder_structure = options.keep_folder_structure;
            request.recurse_subfolders = options.recurse_subfolders;
            request
        })
        .collect();
    Ok(requests)
}
