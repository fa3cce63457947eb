//! Output path length enforcement.
//!
//! Paths longer than the host ceiling have their file stem shortened and
//! suffixed with a hash of the original file name, so two long names that
//! share a prefix still map to different outputs.

use crate::error::{ConversionError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Hex characters of the name hash appended to truncated stems.
pub const HASH_LEN: usize = 8;

/// Smallest stem worth producing: a few characters of the original name,
/// the separator and the hash.
pub const MIN_STEM_LEN: usize = HASH_LEN + 1 + 4;

/// Smallest ceiling the guard accepts.
pub const MIN_PATH_LEN: usize = 32;

/// Validates and shortens generated output paths.
#[derive(Debug, Clone, Copy)]
pub struct PathGuard {
    max_len: usize,
}

impl PathGuard {
    /// Create a guard for the given ceiling, in characters.
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// The configured ceiling.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Return `path` unchanged if it fits, otherwise a shortened equivalent.
    ///
    /// Fails with [`ConversionError::PathTooLong`] when the directory and
    /// extension alone leave no room for a usable file name.
    pub fn guard(&self, path: &Path) -> Result<PathBuf> {
        let full = path.to_string_lossy();
        let length = full.chars().count();
        if length <= self.max_len {
            return Ok(path.to_path_buf());
        }

        let too_long = || ConversionError::PathTooLong {
            path: path.to_path_buf(),
            length,
            max: self.max_len,
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(too_long)?;
        let stem_len = stem.chars().count();
        let fixed_len = length - stem_len;
        let budget = self.max_len.saturating_sub(fixed_len);
        if budget < MIN_STEM_LEN {
            return Err(too_long());
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kept: String = stem.chars().take(budget - HASH_LEN - 1).collect();
        let new_name = match path.extension() {
            Some(ext) => format!("{}_{}.{}", kept, name_hash(&file_name), ext.to_string_lossy()),
            None => format!("{}_{}", kept, name_hash(&file_name)),
        };
        let guarded = match path.parent() {
            Some(parent) => parent.join(new_name),
            None => PathBuf::from(new_name),
        };

        warn!(
            "Output path exceeds {} characters ({}), shortened to {:?}",
            self.max_len, length, guarded
        );
        Ok(guarded)
    }
}

/// Short deterministic hash of a file name.
fn name_hash(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    digest
        .iter()
        .take(HASH_LEN / 2)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_path(dir: &str, stem_len: usize) -> PathBuf {
        PathBuf::from(dir).join(format!("{}.pdf", "x".repeat(stem_len)))
    }

    #[test]
    fn test_short_path_unchanged() {
        let guard = PathGuard::new(260);
        let path = PathBuf::from("/out/report.pdf");
        assert_eq!(guard.guard(&path).unwrap(), path);
    }

    #[test]
    fn test_long_path_truncated_within_ceiling() {
        let guard = PathGuard::new(64);
        let path = long_path("/out/dir", 100);
        let guarded = guard.guard(&path).unwrap();

        assert!(guarded.to_string_lossy().chars().count() <= 64);
        assert_eq!(guarded.parent(), path.parent());
        assert_eq!(guarded.extension().unwrap(), "pdf");
        assert!(guarded.file_stem().unwrap().to_string_lossy().starts_with("xxxx"));
    }

    #[test]
    fn test_guard_is_idempotent() {
        let guard = PathGuard::new(64);
        let path = long_path("/out/dir", 100);
        let once = guard.guard(&path).unwrap();
        let twice = guard.guard(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_guard_is_deterministic() {
        let guard = PathGuard::new(64);
        let path = long_path("/out/dir", 100);
        assert_eq!(guard.guard(&path).unwrap(), guard.guard(&path).unwrap());
    }

    #[test]
    fn test_shared_prefix_names_stay_distinct() {
        let guard = PathGuard::new(64);
        let a = PathBuf::from(format!("/out/{}_first.pdf", "y".repeat(80)));
        let b = PathBuf::from(format!("/out/{}_second.pdf", "y".repeat(80)));
        assert_ne!(guard.guard(&a).unwrap(), guard.guard(&b).unwrap());
    }

    #[test]
    fn test_directory_too_long_fails() {
        let guard = PathGuard::new(64);
        let dir = format!("/out/{}", "d".repeat(60));
        let path = long_path(&dir, 20);
        match guard.guard(&path) {
            Err(ConversionError::PathTooLong { max, .. }) => assert_eq!(max, 64),
            other => panic!("Expected PathTooLong, got {:?}", other),
        }
    }

    #[test]
    fn test_multibyte_names_truncate_on_char_boundary() {
        let guard = PathGuard::new(48);
        let path = PathBuf::from(format!("/out/{}.pdf", "ü".repeat(80)));
        let guarded = guard.guard(&path).unwrap();
        assert!(guarded.to_string_lossy().chars().count() <= 48);
    }
}
