//! Reverts a batch by replaying its transaction log backwards.

use crate::error::ConversionError;
use crate::session::SessionContext;
use crate::transaction::{ConversionOperation, OperationKind, TransactionLog};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of an undo pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoReport {
    /// Entries reverted (or already in their pre-batch state).
    pub undone: usize,
    /// Entries that could not be reverted.
    pub failed: usize,
    /// Failure reasons, one per failed entry.
    pub errors: Vec<String>,
    /// Informational notes, such as directories left in place.
    pub notes: Vec<String>,
}

enum EntryOutcome {
    Undone,
    AlreadyUndone(String),
    Kept(String),
}

/// Consumes a transaction log and restores the pre-batch state.
#[derive(Debug, Clone)]
pub struct UndoExecutor {
    session: SessionContext,
}

impl UndoExecutor {
    /// Create an executor for the session that owns the backups.
    pub fn new(session: SessionContext) -> Self {
        Self { session }
    }

    /// Revert every logged operation, newest first.
    ///
    /// A failing entry is reported and the pass continues. The log is left
    /// empty and the session backups are deleted afterwards, so a second
    /// call reports nothing.
    pub fn undo(&self, log: &TransactionLog) -> UndoReport {
        let operations = log.take();
        let mut report = UndoReport::default();
        if operations.is_empty() {
            debug!("Nothing to undo");
            return report;
        }

        info!("Undoing {} operations", operations.len());
        for operation in operations.iter().rev() {
            match undo_entry(operation) {
                Ok(EntryOutcome::Undone) => report.undone += 1,
                Ok(EntryOutcome::AlreadyUndone(note)) => {
                    debug!("{}", note);
                    report.undone += 1;
                    report.notes.push(note);
                }
                Ok(EntryOutcome::Kept(note)) => {
                    info!("{}", note);
                    report.notes.push(note);
                }
                Err(err) => {
                    warn!("{}", err);
                    report.failed += 1;
                    report.errors.push(err.to_string());
                }
            }
        }

        self.session.purge_backups();
        info!(
            "Undo finished: {} undone, {} failed",
            report.undone, report.failed
        );
        report
    }
}

fn undo_entry(operation: &ConversionOperation) -> Result<EntryOutcome, ConversionError> {
    let target = operation.target_path.as_path();
    let failed = |message: String| ConversionError::UndoEntryFailed {
        operation: operation.kind.to_string(),
        path: target.to_path_buf(),
        message,
    };

    match operation.kind {
        OperationKind::CreateFile => {
            if !target.exists() {
                return Ok(EntryOutcome::AlreadyUndone(format!(
                    "{:?} was already removed",
                    target
                )));
            }
            std::fs::remove_file(target).map_err(|e| failed(e.to_string()))?;
            Ok(EntryOutcome::Undone)
        }
        OperationKind::OverwriteFile => {
            let backup = existing_backup(operation).map_err(failed)?;
            if target.exists() {
                std::fs::remove_file(target).map_err(|e| failed(e.to_string()))?;
            }
            restore(backup, target).map_err(|e| failed(e.to_string()))?;
            Ok(EntryOutcome::Undone)
        }
        OperationKind::CreateDirectory => {
            if !target.exists() {
                return Ok(EntryOutcome::AlreadyUndone(format!(
                    "Directory {:?} was already removed",
                    target
                )));
            }
            let mut entries = std::fs::read_dir(target).map_err(|e| failed(e.to_string()))?;
            if entries.next().is_some() {
                return Ok(EntryOutcome::Kept(format!(
                    "Directory {:?} is not empty, left in place",
                    target
                )));
            }
            std::fs::remove_dir(target).map_err(|e| failed(e.to_string()))?;
            Ok(EntryOutcome::Undone)
        }
        OperationKind::DeleteFile => {
            let backup = existing_backup(operation).map_err(failed)?;
            restore(backup, target).map_err(|e| failed(e.to_string()))?;
            Ok(EntryOutcome::Undone)
        }
    }
}

fn existing_backup(operation: &ConversionOperation) -> Result<&Path, String> {
    match operation.backup_path.as_deref() {
        Some(backup) if backup.is_file() => Ok(backup),
        Some(backup) => Err(format!("backup {:?} is missing", backup)),
        None => Err("no backup was recorded".to_string()),
    }
}

fn restore(backup: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(backup, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        session: SessionContext,
        log: TransactionLog,
    }

    impl Fixture {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            let session = SessionContext::new(&root.path().join("backups"));
            Self {
                root,
                session,
                log: TransactionLog::new(),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.root.path().join(name)
        }

        fn undo(&self) -> UndoReport {
            UndoExecutor::new(self.session.clone()).undo(&self.log)
        }
    }

    #[test]
    fn test_undo_empty_log_is_noop() {
        let fx = Fixture::new();
        let report = fx.undo();
        assert_eq!(report.undone, 0);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_undo_created_file_and_directory() {
        let fx = Fixture::new();
        let dir = fx.path("out");
        fx.log.create_dir_all(&dir).unwrap();
        let pdf = dir.join("a.pdf");
        fs::write(&pdf, "pdf").unwrap();
        fx.log
            .record(ConversionOperation::create_file(pdf.clone(), None));

        let report = fx.undo();
        assert_eq!(report.undone, 2);
        assert_eq!(report.failed, 0);
        assert!(!pdf.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_undo_overwrite_restores_original_bytes() {
        let fx = Fixture::new();
        let pdf = fx.path("report.pdf");
        fs::write(&pdf, b"original").unwrap();
        let backup = fx.session.backup_file(&pdf).unwrap();
        fs::write(&pdf, b"converted").unwrap();
        fx.log
            .record(ConversionOperation::overwrite_file(pdf.clone(), backup, None).unwrap());

        let report = fx.undo();
        assert_eq!(report.undone, 1);
        assert_eq!(fs::read(&pdf).unwrap(), b"original");
        assert!(!fx.session.backup_dir().exists());
    }

    #[test]
    fn test_undo_delete_restores_into_recreated_parent() {
        let fx = Fixture::new();
        let source = fx.path("in/sub/a.docx");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, b"doc").unwrap();
        let backup = fx.session.backup_file(&source).unwrap();
        fs::remove_dir_all(fx.path("in")).unwrap();
        fx.log
            .record(ConversionOperation::delete_file(source.clone(), backup).unwrap());

        let report = fx.undo();
        assert_eq!(report.undone, 1);
        assert_eq!(fs::read(&source).unwrap(), b"doc");
    }

    #[test]
    fn test_non_empty_directory_is_kept() {
        let fx = Fixture::new();
        let dir = fx.path("out");
        fx.log.create_dir_all(&dir).unwrap();
        fs::write(dir.join("user-file.txt"), "keep me").unwrap();

        let report = fx.undo();
        assert_eq!(report.undone, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.notes.len(), 1);
        assert!(dir.join("user-file.txt").exists());
    }

    #[test]
    fn test_missing_backup_fails_entry_but_continues() {
        let fx = Fixture::new();
        let created = fx.path("new.pdf");
        fs::write(&created, "pdf").unwrap();
        fx.log
            .record(ConversionOperation::create_file(created.clone(), None));

        let overwritten = fx.path("old.pdf");
        fs::write(&overwritten, "v1").unwrap();
        let backup = fx.session.backup_file(&overwritten).unwrap();
        fx.log.record(
            ConversionOperation::overwrite_file(overwritten.clone(), backup.clone(), None).unwrap(),
        );
        fs::remove_file(&backup).unwrap();

        let report = fx.undo();
        assert_eq!(report.failed, 1);
        assert_eq!(report.undone, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(!created.exists());
    }

    #[test]
    fn test_second_undo_reports_nothing() {
        let fx = Fixture::new();
        let pdf = fx.path("a.pdf");
        fs::write(&pdf, "pdf").unwrap();
        fx.log.record(ConversionOperation::create_file(pdf, None));

        assert_eq!(fx.undo().undone, 1);
        let second = fx.undo();
        assert_eq!((second.undone, second.failed), (0, 0));
    }
}
