//! Append-only log of reversible filesystem mutations.
//!
//! Every mutation the orchestrator commits is recorded here in commit order.
//! The undo executor replays the log backwards.

use crate::error::{ConversionError, Result};
use crate::session::SessionContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Type of a recorded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    CreateFile,
    OverwriteFile,
    CreateDirectory,
    DeleteFile,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::CreateFile => "CreateFile",
            OperationKind::OverwriteFile => "OverwriteFile",
            OperationKind::CreateDirectory => "CreateDirectory",
            OperationKind::DeleteFile => "DeleteFile",
        };
        f.write_str(name)
    }
}

/// A single committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOperation {
    pub kind: OperationKind,
    pub target_path: PathBuf,
    /// Pre-mutation copy; always set for overwrite and delete.
    pub backup_path: Option<PathBuf>,
    pub source_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl ConversionOperation {
    /// A PDF written where nothing existed.
    pub fn create_file(target: PathBuf, source: Option<PathBuf>) -> Self {
        Self {
            kind: OperationKind::CreateFile,
            target_path: target,
            backup_path: None,
            source_path: source,
            timestamp: Utc::now(),
        }
    }

    /// A directory created for an output.
    pub fn create_directory(path: PathBuf) -> Self {
        Self {
            kind: OperationKind::CreateDirectory,
            target_path: path,
            backup_path: None,
            source_path: None,
            timestamp: Utc::now(),
        }
    }

    /// An existing file replaced after being backed up.
    pub fn overwrite_file(target: PathBuf, backup: PathBuf, source: Option<PathBuf>) -> Result<Self> {
        Self::with_backup(OperationKind::OverwriteFile, target, backup, source)
    }

    /// A file removed after being backed up.
    pub fn delete_file(target: PathBuf, backup: PathBuf) -> Result<Self> {
        Self::with_backup(OperationKind::DeleteFile, target, backup, None)
    }

    fn with_backup(
        kind: OperationKind,
        target: PathBuf,
        backup: PathBuf,
        source: Option<PathBuf>,
    ) -> Result<Self> {
        if !backup.is_file() {
            return Err(ConversionError::BackupFailed {
                path: target,
                message: format!("backup {:?} does not exist", backup),
            });
        }
        Ok(Self {
            kind,
            target_path: target,
            backup_path: Some(backup),
            source_path: source,
            timestamp: Utc::now(),
        })
    }
}

/// Thread-safe, append-only operation log.
#[derive(Debug, Default)]
pub struct TransactionLog {
    entries: Mutex<Vec<ConversionOperation>>,
}

impl TransactionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConversionOperation>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a committed operation.
    pub fn record(&self, operation: ConversionOperation) {
        debug!("Recorded {} {:?}", operation.kind, operation.target_path);
        self.lock().push(operation);
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the recorded operations, oldest first.
    pub fn snapshot(&self) -> Vec<ConversionOperation> {
        self.lock().clone()
    }

    /// Remove and return every operation, oldest first.
    pub fn take(&self) -> Vec<ConversionOperation> {
        std::mem::take(&mut *self.lock())
    }

    /// Forget the recorded history and delete the session's backups.
    pub fn clear_history(&self, session: &SessionContext) {
        let dropped = self.take().len();
        session.purge_backups();
        if dropped > 0 {
            debug!("Cleared {} recorded operations", dropped);
        }
    }

    /// Create `dir` and any missing ancestors, recording each created
    /// directory outermost first.
    pub fn create_dir_all(&self, dir: &Path) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(path) = current {
            if path.as_os_str().is_empty() || path.exists() {
                break;
            }
            missing.push(path.to_path_buf());
            current = path.parent();
        }
        if missing.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(dir).map_err(|e| ConversionError::OutputDirError {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        for path in missing.into_iter().rev() {
            self.record(ConversionOperation::create_directory(path));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_overwrite_requires_existing_backup() {
        let dir = TempDir::new().unwrap();
        let result = ConversionOperation::overwrite_file(
            dir.path().join("a.pdf"),
            dir.path().join("missing-backup"),
            None,
        );
        assert!(matches!(result, Err(ConversionError::BackupFailed { .. })));

        let backup = dir.path().join("backup");
        std::fs::write(&backup, "x").unwrap();
        let op = ConversionOperation::overwrite_file(dir.path().join("a.pdf"), backup.clone(), None)
            .unwrap();
        assert_eq!(op.kind, OperationKind::OverwriteFile);
        assert_eq!(op.backup_path, Some(backup));
    }

    #[test]
    fn test_delete_requires_existing_backup() {
        let dir = TempDir::new().unwrap();
        let result =
            ConversionOperation::delete_file(dir.path().join("a.docx"), dir.path().join("nope"));
        assert!(result.is_err());
    }

    #[test]
    fn test_record_preserves_order() {
        let log = TransactionLog::new();
        log.record(ConversionOperation::create_directory(PathBuf::from("/out/a")));
        log.record(ConversionOperation::create_file(PathBuf::from("/out/a/x.pdf"), None));

        let ops = log.snapshot();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, OperationKind::CreateDirectory);
        assert_eq!(ops[1].kind, OperationKind::CreateFile);
    }

    #[test]
    fn test_take_empties_log() {
        let log = TransactionLog::new();
        log.record(ConversionOperation::create_file(PathBuf::from("/out/x.pdf"), None));
        assert_eq!(log.take().len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_concurrent_record() {
        let log = Arc::new(TransactionLog::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        log.record(ConversionOperation::create_file(
                            PathBuf::from(format!("/out/{}_{}.pdf", t, i)),
                            None,
                        ));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 800);
    }

    #[test]
    fn test_create_dir_all_records_missing_ancestors() {
        let root = TempDir::new().unwrap();
        let log = TransactionLog::new();
        let target = root.path().join("a").join("b").join("c");

        log.create_dir_all(&target).unwrap();
        assert!(target.is_dir());

        let ops = log.snapshot();
        let paths: Vec<_> = ops.iter().map(|o| o.target_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                root.path().join("a"),
                root.path().join("a").join("b"),
                target.clone(),
            ]
        );

        log.create_dir_all(&target).unwrap();
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_clear_history_purges_backups() {
        let root = TempDir::new().unwrap();
        let session = SessionContext::new(root.path());
        let original = root.path().join("a.pdf");
        std::fs::write(&original, "x").unwrap();
        let backup = session.backup_file(&original).unwrap();

        let log = TransactionLog::new();
        log.record(ConversionOperation::overwrite_file(original, backup.clone(), None).unwrap());
        log.clear_history(&session);

        assert!(log.is_empty());
        assert!(!backup.exists());
    }
}
