//! Configuration and request types for office-to-pdf conversion.

use crate::error::{ConversionError, FailureCategory, Result};
use crate::stats::KindStatistics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Family of Office documents, each converted as its own batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentKind {
    Word,
    Excel,
    PowerPoint,
}

impl DocumentKind {
    /// All kinds, in the order batches are scheduled.
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::Word,
        DocumentKind::Excel,
        DocumentKind::PowerPoint,
    ];

    /// File extensions handled by this kind (lowercase, without the dot).
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            DocumentKind::Word => &["doc", "docx", "docm", "dot", "dotx", "rtf", "odt"],
            DocumentKind::Excel => &["xls", "xlsx", "xlsm", "xlsb", "ods", "csv"],
            DocumentKind::PowerPoint => &["ppt", "pptx", "pptm", "pps", "ppsx", "odp"],
        }
    }

    /// Look up the kind for a file extension, ignoring case.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    /// Look up the kind for a path by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentKind::Word => "Word",
            DocumentKind::Excel => "Excel",
            DocumentKind::PowerPoint => "PowerPoint",
        };
        f.write_str(name)
    }
}

/// What to do when the target PDF already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DuplicateAction {
    /// Leave the existing file alone and skip the source.
    Skip,
    /// Back up the existing file, then replace it.
    Overwrite,
    /// Write to the first free `name (n).pdf`.
    #[default]
    Rename,
}

/// Rendering backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// LibreOffice `soffice --headless --convert-to pdf`.
    LibreOffice,
    /// The `unoconv` wrapper around a LibreOffice listener.
    Unoconv,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::LibreOffice => f.write_str("LibreOffice"),
            BackendKind::Unoconv => f.write_str("unoconv"),
        }
    }
}

/// Configuration for the rendering backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend tried first.
    /// Default: LibreOffice.
    pub primary: BackendKind,

    /// Backend used when the primary cannot be invoked at all.
    /// Default: unoconv.
    pub fallback: Option<BackendKind>,

    /// Path to soffice binary. If None, searches common locations and PATH.
    pub soffice_path: Option<PathBuf>,

    /// Path to unoconv binary. If None, searches PATH.
    pub unoconv_path: Option<PathBuf>,

    /// Timeout for a single render call. A worker exceeding it is treated as crashed.
    /// Default: 120 seconds.
    pub conversion_timeout: Duration,

    /// Whether tracked changes and comments are printed into Word PDFs.
    /// Default: false.
    pub include_tracked_changes: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            primary: BackendKind::LibreOffice,
            fallback: Some(BackendKind::Unoconv),
            soffice_path: None,
            unoconv_path: None,
            conversion_timeout: Duration::from_secs(120),
            include_tracked_changes: false,
        }
    }
}

impl BackendConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.conversion_timeout.is_zero() {
            return Err(ConversionError::InvalidConfig(
                "conversion_timeout must be greater than 0".to_string(),
            ));
        }
        if self.fallback == Some(self.primary) {
            return Err(ConversionError::InvalidConfig(
                "fallback backend must differ from the primary backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry policy for per-file isolated ("safe") execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeModeConfig {
    /// Attempts per file before it is recorded as failed.
    /// Default: 3.
    pub max_attempts: u32,

    /// Delay before retry `n` is `retry_backoff * n`.
    /// Default: 1 second.
    pub retry_backoff: Duration,

    /// Pause after a successful render, for backends that need it.
    /// Default: 2 seconds.
    pub stabilization_delay: Duration,
}

impl Default for SafeModeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            stabilization_delay: Duration::from_secs(2),
        }
    }
}

impl SafeModeConfig {
    /// Backoff before the given retry (1-based attempt that just failed).
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        self.retry_backoff * failed_attempt
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConversionError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default host path length ceiling.
pub const DEFAULT_MAX_PATH_LEN: usize = if cfg!(windows) { 260 } else { 4096 };

/// Combined configuration for the conversion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Policy for pre-existing target files.
    pub duplicate_action: DuplicateAction,

    /// Backend selection.
    pub backends: BackendConfig,

    /// Safe mode retry policy.
    pub safe_mode: SafeModeConfig,

    /// Maximum length of a generated output path, in characters.
    pub max_path_len: usize,

    /// Directory under which session backups are kept.
    /// Default: system temp directory.
    pub backup_root: Option<PathBuf>,

    /// Back up and delete each source after it converted successfully.
    pub delete_sources_after_conversion: bool,

    /// Run document kinds as concurrent units instead of one after another.
    pub concurrent_kinds: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            duplicate_action: DuplicateAction::default(),
            backends: BackendConfig::default(),
            safe_mode: SafeModeConfig::default(),
            max_path_len: DEFAULT_MAX_PATH_LEN,
            backup_root: None,
            delete_sources_after_conversion: false,
            concurrent_kinds: false,
        }
    }
}

impl EngineConfig {
    /// Set the duplicate file policy.
    pub fn duplicate_action(mut self, action: DuplicateAction) -> Self {
        self.duplicate_action = action;
        self
    }

    /// Set the primary and fallback backends.
    pub fn backends(mut self, primary: BackendKind, fallback: Option<BackendKind>) -> Self {
        self.backends.primary = primary;
        self.backends.fallback = fallback;
        self
    }

    /// Set the safe mode retry policy.
    pub fn safe_mode(mut self, safe_mode: SafeModeConfig) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    /// Set the path length ceiling.
    pub fn max_path_len(mut self, max: usize) -> Self {
        self.max_path_len = max;
        self
    }

    /// Set the backup directory.
    pub fn backup_root(mut self, dir: PathBuf) -> Self {
        self.backup_root = Some(dir);
        self
    }

    /// Delete sources (with backup) after they converted.
    pub fn delete_sources_after_conversion(mut self, enabled: bool) -> Self {
        self.delete_sources_after_conversion = enabled;
        self
    }

    /// Run document kinds concurrently.
    pub fn concurrent_kinds(mut self, enabled: bool) -> Self {
        self.concurrent_kinds = enabled;
        self
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration as pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> Result<()> {
        self.backends.validate()?;
        self.safe_mode.validate()?;
        if self.max_path_len < crate::path_guard::MIN_PATH_LEN {
            return Err(ConversionError::InvalidConfig(format!(
                "max_path_len must be at least {}",
                crate::path_guard::MIN_PATH_LEN
            )));
        }
        Ok(())
    }
}

/// Files of one document kind to convert.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Kind shared by every source in this request.
    pub kind: DocumentKind,

    /// Source documents, in processing order.
    pub source_paths: Vec<PathBuf>,

    /// Folder the sources were collected from; required to keep folder structure.
    pub source_root: Option<PathBuf>,

    /// Directory that receives the PDFs.
    pub destination_root: PathBuf,

    /// Mirror the source sub-folders under the destination.
    pub keep_folder_structure: bool,

    /// Whether the sources were collected recursively.
    pub recurse_subfolders: bool,
}

impl ConversionRequest {
    /// Create a new conversion request.
    pub fn new(kind: DocumentKind, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source_paths: Vec::new(),
            source_root: None,
            destination_root: destination_root.into(),
            keep_folder_structure: false,
            recurse_subfolders: false,
        }
    }

    /// Append a source document.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_paths.push(path.into());
        self
    }

    /// Append several source documents.
    pub fn with_sources<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.source_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Mirror the folder structure found under `source_root`.
    pub fn keep_folder_structure(mut self, source_root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(source_root.into());
        self.keep_folder_structure = true;
        self
    }

    /// Directory the PDF for `source` goes into.
    pub fn target_dir_for(&self, source: &Path) -> PathBuf {
        if self.keep_folder_structure {
            let relative_parent = self
                .source_root
                .as_deref()
                .and_then(|root| source.parent()?.strip_prefix(root).ok());
            if let Some(relative) = relative_parent {
                return self.destination_root.join(relative);
            }
        }
        self.destination_root.clone()
    }
}

/// Execution strategy in use for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// One long-lived worker for the whole kind.
    Batch,
    /// A fresh worker per file, with retries.
    Safe,
}

/// Progress information for a conversion operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionProgress {
    /// Kind of the batch being processed.
    pub kind: DocumentKind,

    /// Index of the current file within its kind.
    pub file_index: usize,

    /// Total number of files of this kind.
    pub total_files: usize,

    /// Name of the current file.
    pub current_file: String,

    /// Strategy processing the file.
    pub mode: ExecutionMode,

    /// Current stage of processing.
    pub stage: ConversionStage,
}

/// Stage of the conversion process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionStage {
    /// Loading the document in the worker.
    Opening,
    /// Rendering to PDF.
    Rendering,
    /// Completed successfully.
    Completed,
    /// Skipped by the duplicate policy or cancellation.
    Skipped,
    /// Failed with error.
    Failed,
}

/// Information about a failed conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFile {
    /// Kind of the source document.
    pub kind: DocumentKind,

    /// Original input path.
    pub input_path: PathBuf,

    /// What went wrong, for callers that group failures.
    pub category: FailureCategory,

    /// Error message.
    pub error: String,
}

/// End-of-batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Counters per document kind.
    pub statistics: BTreeMap<DocumentKind, KindStatistics>,

    /// Every failed source with its reason.
    pub failed: Vec<FailedFile>,

    /// Converted sources that were kept because their pre-delete backup
    /// failed. These files still count as converted.
    pub refused_deletions: Vec<FailedFile>,

    /// Whether the caller cancelled the batch.
    pub cancelled: bool,

    /// Files never reached because of cancellation, per kind.
    pub unprocessed: BTreeMap<DocumentKind, usize>,

    /// Files neither counted nor left unprocessed, per kind. Always empty
    /// unless the engine has a bookkeeping bug.
    pub anomalies: BTreeMap<DocumentKind, usize>,

    /// Total processing time.
    pub total_duration: Duration,
}

impl BatchSummary {
    /// Sum of the counters across all kinds.
    pub fn totals(&self) -> KindStatistics {
        self.statistics
            .values()
            .fold(KindStatistics::default(), |acc, s| acc.merged(s))
    }

    /// Number of failed and refused files per kind and category.
    pub fn failure_counts(&self) -> BTreeMap<(DocumentKind, FailureCategory), usize> {
        let mut counts = BTreeMap::new();
        for failure in self.failed.iter().chain(&self.refused_deletions) {
            *counts.entry((failure.kind, failure.category)).or_default() += 1;
        }
        counts
    }

    /// Serialize the summary as pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
