//! # office-to-pdf-core
//!
//! Recoverable batch conversion of Microsoft Office documents to PDF.
//!
//! The rendering itself is delegated to an external office suite
//! (LibreOffice or unoconv). This crate makes long batches over that
//! unreliable worker correct and reversible:
//!
//! - **Batch and safe execution**: one warm worker per document kind, with
//!   a per-file isolated fallback when the worker crashes
//! - **Backend fallback** when the primary office suite is not installed
//! - **Duplicate handling** (skip, overwrite with backup, rename) with a
//!   pre-scan for `report.docx` / `report.xlsx` style name collisions
//! - **Path length guarding** with hash-suffixed truncation
//! - **Undo** of a whole batch from an append-only transaction log
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use office_to_pdf_core::{discover, Converter, DiscoveryOptions, EngineConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let converter = Converter::new(EngineConfig::default())?;
//!
//!     let requests = discover(
//!         Path::new("./documents"),
//!         &DiscoveryOptions {
//!             destination_root: "./pdf".into(),
//!             recurse_subfolders: true,
//!             keep_folder_structure: true,
//!         },
//!     )?;
//!
//!     let summary = converter.convert(requests).await;
//!     let totals = summary.totals();
//!     println!("{} converted, {} failed", totals.succeeded, totals.failed);
//!
//!     // Changed your mind? Put everything back.
//!     let report = converter.undo();
//!     println!("{} operations undone", report.undone);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod converter;
pub mod discovery;
pub mod error;
pub mod path_guard;
pub mod prescan;
pub mod resolver;
pub mod session;
pub mod stats;
pub mod transaction;
pub mod undo;
pub mod worker;

// Re-export main types for convenience
pub use backend::CommandWorkerFactory;
pub use config::{
    BackendConfig, BackendKind, BatchSummary, ConversionProgress, ConversionRequest,
    ConversionStage, DocumentKind, DuplicateAction, EngineConfig, ExecutionMode, FailedFile,
    SafeModeConfig,
};
pub use converter::Converter;
pub use discovery::{discover, DiscoveryOptions};
pub use error::{ConversionError, FailureCategory, FailureClass, Result, WorkerError};
pub use path_guard::PathGuard;
pub use prescan::ConflictSet;
pub use resolver::{DuplicateResolver, FileHandleResult};
pub use session::{CancellationFlag, SessionContext};
pub use stats::{EngineStatistics, KindStatistics};
pub use transaction::{ConversionOperation, OperationKind, TransactionLog};
pub use undo::{UndoExecutor, UndoReport};
pub use worker::{Worker, WorkerCapabilities, WorkerFactory, WorkerOptions};

/// Check if a file extension belongs to a supported Office document.
pub fn is_supported_extension(ext: &str) -> bool {
    DocumentKind::from_extension(ext).is_some()
}

/// Initialize the library's logging.
/// Call this once at application startup if you want to see logs.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_supported_extension() {
        assert!(is_supported_extension("docx"));
        assert!(is_supported_extension("PPTX"));
        assert!(is_supported_extension("xls"));
        assert!(!is_supported_extension("pdf"));
        assert!(!is_supported_extension("png"));
    }
}
