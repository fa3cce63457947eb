//! Pre-conversion scan for output name collisions.
//!
//! `report.docx` and `report.xlsx` converted into the same folder would both
//! produce `report.pdf`. The scan finds every such group up front so each
//! member gets an extension-qualified name (`report.docx.pdf`) instead of
//! racing through the duplicate policy.

use crate::config::ConversionRequest;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sources whose planned output name collides with another source's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictSet {
    paths: HashSet<PathBuf>,
}

impl ConflictSet {
    /// Whether `source` needs an extension-qualified output name.
    pub fn contains(&self, source: &Path) -> bool {
        self.paths.contains(source)
    }

    /// Number of flagged sources.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether no source is flagged.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterate over the flagged sources.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }
}

/// Build the conflict set from `(source, planned target directory)` pairs.
///
/// Basenames are compared case-insensitively within each directory. The
/// filesystem is not touched.
pub fn scan<'a, I>(entries: I) -> ConflictSet
where
    I: IntoIterator<Item = (&'a Path, PathBuf)>,
{
    let mut groups: HashMap<(PathBuf, String), Vec<&'a Path>> = HashMap::new();
    for (source, target_dir) in entries {
        let basename = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        groups.entry((target_dir, basename)).or_default().push(source);
    }

    let mut paths = HashSet::new();
    for ((dir, basename), sources) in groups {
        let distinct: HashSet<&Path> = sources.iter().copied().collect();
        if distinct.len() > 1 {
            debug!(
                "{} sources map to {:?} in {:?}",
                distinct.len(),
                basename,
                dir
            );
            paths.extend(distinct.into_iter().map(Path::to_path_buf));
        }
    }
    ConflictSet { paths }
}

/// Build the conflict set across every request of a batch.
pub fn scan_requests(requests: &[ConversionRequest]) -> ConflictSet {
    scan(requests.iter().flat_map(|request| {
        request
            .source_paths
            .iter()
            .map(move |source| (source.as_path(), request.target_dir_for(source)))
    }))
}

/// Planned output path for `source`, before duplicate resolution.
pub fn planned_target(request: &ConversionRequest, source: &Path, conflicts: &ConflictSet) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match source.extension() {
        Some(ext) if conflicts.contains(source) => {
            format!("{}.{}.pdf", stem, ext.to_string_lossy())
        }
        _ => format!("{}.pdf", stem),
    };
    request.target_dir_for(source).join(name)
}
