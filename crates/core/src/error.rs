//! Error types and failure classification for office-to-pdf conversion.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the office-to-pdf library.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Neither the primary nor the fallback rendering backend can be used.
    #[error("No rendering backend available: {0}")]
    BackendUnavailable(String),

    /// The rendering worker process is no longer usable.
    #[error("Rendering worker crashed: {0}")]
    WorkerCrashed(String),

    /// The worker could not load the document.
    #[error("Failed to open '{path}': {message}")]
    OpenFailed { path: PathBuf, message: String },

    /// The worker loaded the document but could not produce a PDF.
    #[error("PDF rendering failed for '{path}': {message}")]
    RenderFailed { path: PathBuf, message: String },

    /// The generated path cannot be shortened into a usable file name.
    #[error("Path too long ({length} characters, limit {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        length: usize,
        max: usize,
    },

    /// A backup required before a destructive action could not be made.
    #[error("Backup of '{path}' failed: {message}")]
    BackupFailed { path: PathBuf, message: String },

    /// A single entry of the transaction log could not be reverted.
    #[error("Undo of {operation} for '{path}' failed: {message}")]
    UndoEntryFailed {
        operation: String,
        path: PathBuf,
        message: String,
    },

    /// Input file not found.
    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    /// The source does not belong to the document kind it was submitted as.
    #[error("Unsupported file format for {kind} batch: '{path}'")]
    UnsupportedFormat { path: PathBuf, kind: String },

    /// Output directory creation failed.
    #[error("Failed to create output directory '{path}': {message}")]
    OutputDirError { path: PathBuf, message: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem error outside of a more specific category.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config or summary (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ConversionError>;

impl ConversionError {
    /// Category under which this error is reported in a batch summary.
    pub fn category(&self) -> FailureCategory {
        match self {
            ConversionError::OpenFailed { .. } | ConversionError::RenderFailed { .. } => {
                FailureCategory::Document
            }
            ConversionError::WorkerCrashed(_) => FailureCategory::WorkerCrashed,
            ConversionError::BackendUnavailable(_) => FailureCategory::BackendUnavailable,
            ConversionError::BackupFailed { .. } => FailureCategory::BackupFailed,
            ConversionError::PathTooLong { .. } => FailureCategory::PathTooLong,
            ConversionError::InputNotFound(_) => FailureCategory::InputNotFound,
            ConversionError::UnsupportedFormat { .. } => FailureCategory::UnsupportedFormat,
            ConversionError::OutputDirError { .. }
            | ConversionError::UndoEntryFailed { .. }
            | ConversionError::Io(_) => FailureCategory::Io,
            ConversionError::InvalidConfig(_) | ConversionError::Serialization(_) => {
                FailureCategory::Other
            }
        }
    }
}

/// Reporting category of a failed or refused file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    /// The document could not be opened or rendered; the worker survived.
    Document,
    /// The worker died on this file, including after every safe-mode attempt.
    WorkerCrashed,
    /// No backend could be invoked for this file.
    BackendUnavailable,
    /// A required backup could not be made.
    BackupFailed,
    /// The output path could not be shortened under the limit.
    PathTooLong,
    /// The source disappeared before it was converted.
    InputNotFound,
    /// The source does not match its batch's document kind.
    UnsupportedFormat,
    /// Filesystem error outside of the categories above.
    Io,
    /// Anything else.
    Other,
}

/// How the orchestrator must react to a worker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Ends the current file only.
    Recoverable,
    /// The worker process is gone or its handle is invalid; switch to safe mode.
    Critical,
    /// The backend cannot be started at all; switch backends.
    Unavailable,
}

/// Error reported by a rendering worker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The document could not be loaded.
    #[error("open failed: {0}")]
    Open(String),

    /// The document could not be rendered to PDF.
    #[error("render failed: {0}")]
    Render(String),

    /// The worker process died or stopped responding.
    #[error("worker crashed: {0}")]
    Crashed(String),

    /// The backend's automation component is missing on this host.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl WorkerError {
    /// Classify this error for the orchestrator's control flow.
    ///
    /// Open and render errors whose message carries a crash signature are
    /// promoted to critical, since automation layers often surface a dead
    /// server as a generic call failure.
    pub fn class(&self) -> FailureClass {
        match self {
            WorkerError::Crashed(_) => FailureClass::Critical,
            WorkerError::Unavailable(_) => FailureClass::Unavailable,
            WorkerError::Open(message) | WorkerError::Render(message) => {
                classify_message(message)
            }
        }
    }

    /// Convert into the crate error for the given source document.
    pub fn into_conversion_error(self, path: PathBuf) -> ConversionError {
        match self {
            WorkerError::Open(message) => ConversionError::OpenFailed { path, message },
            WorkerError::Render(message) => ConversionError::RenderFailed { path, message },
            WorkerError::Crashed(message) => ConversionError::WorkerCrashed(message),
            WorkerError::Unavailable(message) => ConversionError::BackendUnavailable(message),
        }
    }
}

/// RPC server is unavailable.
pub const RPC_E_SERVER_UNAVAILABLE: u32 = 0x8007_06BA;
/// Remote procedure call failed.
pub const RPC_E_CALL_FAILED: u32 = 0x8007_06BE;
/// Call was rejected by callee.
pub const RPC_E_CALL_REJECTED: u32 = 0x8001_0001;
/// Object invoked has disconnected from its clients.
pub const RPC_E_DISCONNECTED: u32 = 0x8001_0108;
/// Object is not connected to server.
pub const CO_E_OBJNOTCONNECTED: u32 = 0x8004_01FD;

const CRITICAL_CODES: &[u32] = &[
    RPC_E_SERVER_UNAVAILABLE,
    RPC_E_CALL_FAILED,
    RPC_E_CALL_REJECTED,
    RPC_E_DISCONNECTED,
    CO_E_OBJNOTCONNECTED,
];

const CRITICAL_MARKERS: &[&str] = &[
    "rpc server is unavailable",
    "rpc server unavailable",
    "remote procedure call failed",
    "call was rejected by callee",
    "has disconnected from its clients",
    "disconnected from clients",
    "object is not connected to server",
    "broken pipe",
    "connection reset",
];

/// Classify an automation error code.
pub fn classify_code(code: u32) -> FailureClass {
    if CRITICAL_CODES.contains(&code) {
        FailureClass::Critical
    } else {
        FailureClass::Recoverable
    }
}

/// Classify a worker error message by its crash signatures and embedded codes.
pub fn classify_message(message: &str) -> FailureClass {
    let lower = message.to_ascii_lowercase();
    if CRITICAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::Critical;
    }
    let has_code = CRITICAL_CODES
        .iter()
        .any(|code| lower.contains(&format!("0x{:08x}", code)));
    if has_code {
        FailureClass::Critical
    } else {
        FailureClass::Recoverable
    }
}
