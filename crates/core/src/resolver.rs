//! Duplicate target resolution.
//!
//! Decides what happens when the PDF for a source already exists:
//! - Skip: no output path
//! - Overwrite: same path, caller must back up the existing file first
//! - Rename: first free name like "report (1).pdf"

use crate::config::DuplicateAction;
use crate::error::Result;
use crate::path_guard::PathGuard;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Numbered names tried before falling back to a timestamp suffix.
pub const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Outcome of resolving one target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandleResult {
    /// Where to write the PDF; `None` means skip the source.
    pub final_path: Option<PathBuf>,

    /// Policy that produced this result. A fresh target reports `Rename`.
    pub action: DuplicateAction,

    /// True when nothing existed at the original target.
    pub is_new_file: bool,
}

impl FileHandleResult {
    /// Whether the source should be skipped.
    pub fn is_skip(&self) -> bool {
        self.final_path.is_none()
    }

    /// Whether an existing file is about to be replaced.
    pub fn is_overwrite(&self) -> bool {
        self.action == DuplicateAction::Overwrite && !self.is_new_file
    }

    /// Whether the output was moved to a numbered name.
    pub fn is_rename(&self) -> bool {
        self.action == DuplicateAction::Rename && !self.is_new_file
    }
}

/// Applies the configured [`DuplicateAction`] to target paths.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateResolver {
    action: DuplicateAction,
    guard: PathGuard,
    max_attempts: u32,
}

impl DuplicateResolver {
    /// Create a resolver. Rename candidates are passed through `guard`.
    pub fn new(action: DuplicateAction, guard: PathGuard) -> Self {
        Self {
            action,
            guard,
            max_attempts: MAX_RENAME_ATTEMPTS,
        }
    }

    /// Limit the numbered names tried before the timestamp fallback.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The configured policy.
    pub fn action(&self) -> DuplicateAction {
        self.action
    }

    /// Resolve `target` against the filesystem.
    pub fn resolve(&self, target: &Path) -> Result<FileHandleResult> {
        if !target.exists() {
            return Ok(FileHandleResult {
                final_path: Some(target.to_path_buf()),
                action: DuplicateAction::Rename,
                is_new_file: true,
            });
        }

        match self.action {
            DuplicateAction::Skip => {
                debug!("Target {:?} exists, skipping", target);
                Ok(FileHandleResult {
                    final_path: None,
                    action: DuplicateAction::Skip,
                    is_new_file: false,
                })
            }
            DuplicateAction::Overwrite => Ok(FileHandleResult {
                final_path: Some(target.to_path_buf()),
                action: DuplicateAction::Overwrite,
                is_new_file: false,
            }),
            DuplicateAction::Rename => {
                let renamed = self.find_unique_name(target)?;
                debug!("Target {:?} exists, writing {:?}", target, renamed);
                Ok(FileHandleResult {
                    final_path: Some(renamed),
                    action: DuplicateAction::Rename,
                    is_new_file: false,
                })
            }
        }
    }

    /// Finds a free name by appending " (1)", " (2)", etc.
    fn find_unique_name(&self, path: &Path) -> Result<PathBuf> {
        let parent = path.parent().unwrap_or(Path::new(""));
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path.extension().map(|s| s.to_string_lossy().into_owned());
        let with_suffix = |suffix: &str| match &extension {
            Some(ext) => parent.join(format!("{}{}.{}", stem, suffix, ext)),
            None => parent.join(format!("{}{}", stem, suffix)),
        };

        for counter in 1..=self.max_attempts {
            let candidate = self.guard.guard(&with_suffix(&format!(" ({})", counter)))?;
            if !candidate.exists() {
                return Ok(candidate);
            }
        }

        warn!(
            "No free numbered name for {:?} after {} attempts, using a timestamp",
            path, self.max_attempts
        );
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let candidate = self.guard.guard(&with_suffix(&format!("_{}", stamp)))?;
        if !candidate.exists() {
            return Ok(candidate);
        }
        let unique = uuid::Uuid::new_v4().simple().to_string();
        self.guard
            .guard(&with_suffix(&format!("_{}_{}", stamp, &unique[..8])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn resolver(action: DuplicateAction) -> DuplicateResolver {
        DuplicateResolver::new(action, PathGuard::new(4096))
    }

    #[test]
    fn test_missing_target_is_new_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("report.pdf");

        for action in [
            DuplicateAction::Skip,
            DuplicateAction::Overwrite,
            DuplicateAction::Rename,
        ] {
            let result = resolver(action).resolve(&target).unwrap();
            assert_eq!(result.final_path.as_deref(), Some(target.as_path()));
            assert_eq!(result.action, DuplicateAction::Rename);
            assert!(result.is_new_file);
            assert!(!result.is_rename());
        }
    }

    #[test]
    fn test_existing_target_skip() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("report.pdf");
        fs::write(&target, "old").unwrap();

        let result = resolver(DuplicateAction::Skip).resolve(&target).unwrap();
        assert!(result.is_skip());
        assert!(!result.is_new_file);
    }

    #[test]
    fn test_existing_target_overwrite() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("report.pdf");
        fs::write(&target, "old").unwrap();

        let result = resolver(DuplicateAction::Overwrite).resolve(&target).unwrap();
        assert_eq!(result.final_path.as_deref(), Some(target.as_path()));
        assert!(result.is_overwrite());
    }

    #[test]
    fn test_existing_target_rename() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("report.pdf");
        fs::write(&target, "old").unwrap();

        let result = resolver(DuplicateAction::Rename).resolve(&target).unwrap();
        assert_eq!(result.final_path, Some(dir.path().join("report (1).pdf")));
        assert!(result.is_rename());
    }

    #[test]
    fn test_rename_skips_taken_numbers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("report.pdf"), "").unwrap();
        fs::write(dir.path().join("report (1).pdf"), "").unwrap();
        fs::write(dir.path().join("report (2).pdf"), "").unwrap();

        let result = resolver(DuplicateAction::Rename)
            .resolve(&dir.path().join("report.pdf"))
            .unwrap();
        assert_eq!(result.final_path, Some(dir.path().join("report (3).pdf")));
    }

    #[test]
    fn test_repeated_renames_never_repeat() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("report.pdf");
        fs::write(&target, "").unwrap();
        let resolver = resolver(DuplicateAction::Rename);

        let mut seen = Vec::new();
        for _ in 0..5 {
            let path = resolver.resolve(&target).unwrap().final_path.unwrap();
            assert!(!path.exists());
            assert!(!seen.contains(&path));
            fs::write(&path, "").unwrap();
            seen.push(path);
        }
        assert_eq!(seen.last(), Some(&dir.path().join("report (5).pdf")));
    }

    #[test]
    fn test_rename_without_extension() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("report");
        fs::write(&target, "").unwrap();

        let result = resolver(DuplicateAction::Rename).resolve(&target).unwrap();
        assert_eq!(result.final_path, Some(dir.path().join("report (1)")));
    }

    #[test]
    fn test_rename_falls_back_to_timestamp() {
        let dir = TempDir::new().unwrap();
        for name in ["report.pdf", "report (1).pdf", "report (2).pdf"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let resolver = resolver(DuplicateAction::Rename).with_max_attempts(2);

        let result = resolver.resolve(&dir.path().join("report.pdf")).unwrap();
        let path = result.final_path.clone().unwrap();
        assert!(result.is_rename());
        assert!(!path.exists());
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(path.extension().unwrap(), "pdf");

        // report_YYYYMMDD_HHMMSS_mmm
        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
        let stamp = stem.strip_prefix("report_").unwrap();
        assert_eq!(stamp.len(), 19);
        assert!(stamp
            .chars()
            .all(|c| c.is_ascii_digit() || c == '_'));
        assert!(!stem.contains('('));
    }
}
