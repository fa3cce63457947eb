//! Per-batch session state: identity, backup storage, progress sink and
//! cancellation.

use crate::config::ConversionProgress;
use crate::error::{ConversionError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory name grouping all session backups under the backup root.
pub const BACKUP_DIR_NAME: &str = "office-to-pdf-backups";

/// Receives progress updates.
pub type ProgressSink = Arc<dyn Fn(ConversionProgress) + Send + Sync>;

/// Identity and capabilities shared by the orchestrator and the undo executor.
#[derive(Clone)]
pub struct SessionContext {
    id: Uuid,
    backup_dir: PathBuf,
    progress: Option<ProgressSink>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("backup_dir", &self.backup_dir)
            .field("has_progress_sink", &self.progress.is_some())
            .finish()
    }
}

impl SessionContext {
    /// Create a session whose backups live under `backup_root`.
    pub fn new(backup_root: &Path) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            backup_dir: backup_root.join(BACKUP_DIR_NAME).join(id.to_string()),
            progress: None,
        }
    }

    /// Create a session under the system temp directory.
    pub fn in_temp_dir() -> Self {
        Self::new(&std::env::temp_dir())
    }

    /// Attach a progress sink.
    pub fn with_progress<F>(mut self, sink: F) -> Self
    where
        F: Fn(ConversionProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(sink));
        self
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Directory holding this session's backups.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Forward a progress update to the sink, if any.
    pub fn report(&self, progress: ConversionProgress) {
        if let Some(sink) = &self.progress {
            sink(progress);
        }
    }

    /// Copy `path` into the session backup directory.
    ///
    /// The returned backup is verified to exist with the original's length.
    pub fn backup_file(&self, path: &Path) -> Result<PathBuf> {
        let backup_failed = |message: String| ConversionError::BackupFailed {
            path: path.to_path_buf(),
            message,
        };

        std::fs::create_dir_all(&self.backup_dir).map_err(|e| backup_failed(e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let backup_path = self
            .backup_dir
            .join(format!("{}_{}", Uuid::new_v4().simple(), name));

        let copied = std::fs::copy(path, &backup_path).map_err(|e| backup_failed(e.to_string()))?;
        let original_len = std::fs::metadata(path)
            .map_err(|e| backup_failed(e.to_string()))?
            .len();
        if copied != original_len || !backup_path.exists() {
            let _ = std::fs::remove_file(&backup_path);
            return Err(backup_failed(format!(
                "copied {} of {} bytes",
                copied, original_len
            )));
        }

        debug!("Backed up {:?} to {:?}", path, backup_path);
        Ok(backup_path)
    }

    /// Delete every backup of this session.
    pub fn purge_backups(&self) {
        if !self.backup_dir.exists() {
            return;
        }
        match std::fs::remove_dir_all(&self.backup_dir) {
            Ok(()) => debug!("Removed session backups at {:?}", self.backup_dir),
            Err(e) => warn!(
                "Failed to remove session backups at {:?}: {}",
                self.backup_dir, e
            ),
        }
    }
}

/// Cooperative cancellation signal shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new batch.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
