//! Command-line rendering backends (LibreOffice and unoconv).
//!
//! Each worker owns a private LibreOffice user profile so it never shares
//! state with a desktop instance or another worker. In batch mode the
//! profile stays warm across files; safe mode creates a fresh worker, and
//! therefore a fresh profile, for every file.

use crate::config::{BackendConfig, BackendKind, DocumentKind};
use crate::error::{classify_message, FailureClass, WorkerError};
use crate::worker::{Worker, WorkerCapabilities, WorkerFactory, WorkerOptions};
use async_process::Command;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::time::timeout;
use tracing::{debug, error, info};

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(0);

/// Factory for workers that shell out to an office suite binary.
#[derive(Debug, Clone)]
pub struct CommandWorkerFactory {
    backend: BackendKind,
    config: BackendConfig,
}

impl CommandWorkerFactory {
    /// Create a factory for `backend` using the paths and timeout in `config`.
    pub fn new(backend: BackendKind, config: BackendConfig) -> Self {
        Self { backend, config }
    }

    /// Locate the backend binary.
    pub fn find_binary(&self) -> Result<PathBuf, WorkerError> {
        match self.backend {
            BackendKind::LibreOffice => find_soffice(self.config.soffice_path.as_deref()),
            BackendKind::Unoconv => find_unoconv(self.config.unoconv_path.as_deref()),
        }
    }
}

/// Find the soffice binary.
fn find_soffice(explicit: Option<&Path>) -> Result<PathBuf, WorkerError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(WorkerError::Unavailable(format!(
            "soffice not found at {:?}",
            path
        )));
    }

    let candidates = [
        // macOS
        "/Applications/LibreOffice.app/Contents/MacOS/soffice",
        // Linux
        "/usr/bin/soffice",
        "/usr/lib/libreoffice/program/soffice",
        "/opt/libreoffice/program/soffice",
        // Snap (Ubuntu)
        "/snap/bin/libreoffice.soffice",
        // Windows
        "C:\\Program Files\\LibreOffice\\program\\soffice.exe",
    ];

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(path);
        }
    }

    which::which("soffice")
        .or_else(|_| which::which("libreoffice"))
        .map_err(|_| {
            WorkerError::Unavailable(
                "LibreOffice not found. Install LibreOffice and ensure 'soffice' is in PATH"
                    .to_string(),
            )
        })
}

/// Find the unoconv binary.
fn find_unoconv(explicit: Option<&Path>) -> Result<PathBuf, WorkerError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(WorkerError::Unavailable(format!(
            "unoconv not found at {:?}",
            path
        )));
    }
    which::which("unoconv")
        .map_err(|_| WorkerError::Unavailable("unoconv not found in PATH".to_string()))
}

#[async_trait]
impl WorkerFactory for CommandWorkerFactory {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn capabilities(&self) -> WorkerCapabilities {
        match self.backend {
            BackendKind::LibreOffice => WorkerCapabilities {
                supports_tracked_changes: true,
                needs_stabilization: false,
                produces_sheet_artifacts: true,
            },
            // unoconv talks to a shared listener that needs time to settle
            // between documents.
            BackendKind::Unoconv => WorkerCapabilities {
                supports_tracked_changes: true,
                needs_stabilization: true,
                produces_sheet_artifacts: true,
            },
        }
    }

    async fn is_available(&self) -> bool {
        self.find_binary().is_ok()
    }

    async fn create(
        &self,
        kind: DocumentKind,
        options: &WorkerOptions,
    ) -> Result<Box<dyn Worker>, WorkerError> {
        let binary = self.find_binary()?;
        let worker = CommandWorker::new(
            self.backend,
            binary,
            kind,
            options.clone(),
            self.config.conversion_timeout,
        )?;
        info!(
            "Started {} worker {} for {} documents",
            self.backend, worker.id, kind
        );
        Ok(Box::new(worker))
    }
}

/// A worker running one office suite conversion per render call.
struct CommandWorker {
    /// Worker ID for logging.
    id: usize,
    backend: BackendKind,
    binary: PathBuf,
    kind: DocumentKind,
    options: WorkerOptions,
    timeout: Duration,
    /// Unique user profile directory (required for isolation).
    profile_dir: TempDir,
    /// Scratch output directory, emptied after every render.
    staging_dir: TempDir,
    /// Currently open document.
    document: Option<PathBuf>,
    /// Number of documents rendered by this worker.
    docs_processed: u32,
}

impl std::fmt::Debug for CommandWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandWorker")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("profile_dir", &self.profile_dir.path())
            .field("document", &self.document)
            .field("docs_processed", &self.docs_processed)
            .finish()
    }
}

impl CommandWorker {
    fn new(
        backend: BackendKind,
        binary: PathBuf,
        kind: DocumentKind,
        options: WorkerOptions,
        timeout: Duration,
    ) -> Result<Self, WorkerError> {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::SeqCst);
        let profile_dir = TempDir::with_prefix(format!("lo-profile-{}-", id))
            .map_err(|e| WorkerError::Crashed(format!("cannot create profile dir: {}", e)))?;
        let staging_dir = TempDir::with_prefix(format!("office-to-pdf-{}-", id))
            .map_err(|e| WorkerError::Crashed(format!("cannot create staging dir: {}", e)))?;

        debug!(
            "Created worker {} with profile at {:?}",
            id,
            profile_dir.path()
        );

        Ok(Self {
            id,
            backend,
            binary,
            kind,
            options,
            timeout,
            profile_dir,
            staging_dir,
            document: None,
            docs_processed: 0,
        })
    }

    /// Export filter for the document kind, with markup options applied.
    fn export_filter(&self) -> String {
        let filter = match self.kind {
            DocumentKind::Word => "writer_pdf_Export",
            DocumentKind::Excel => "calc_pdf_Export",
            DocumentKind::PowerPoint => "impress_pdf_Export",
        };
        if self.options.include_tracked_changes {
            format!(
                "pdf:{}:{{\"ExportNotes\":{{\"type\":\"boolean\",\"value\":\"true\"}},\"ExportNotesInMargin\":{{\"type\":\"boolean\",\"value\":\"true\"}}}}",
                filter
            )
        } else {
            format!("pdf:{}", filter)
        }
    }

    fn build_command(&self, input: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        match self.backend {
            BackendKind::LibreOffice => {
                cmd.args([
                    "--headless",
                    "--invisible",
                    "--nologo",
                    "--nofirststartwizard",
                    "--norestore",
                ]);
                cmd.arg(format!(
                    "-env:UserInstallation=file://{}",
                    self.profile_dir.path().display()
                ));
                cmd.arg("--convert-to").arg(self.export_filter());
                cmd.arg("--outdir").arg(self.staging_dir.path());
            }
            BackendKind::Unoconv => {
                cmd.args(["-f", "pdf"]);
                if self.options.include_tracked_changes {
                    cmd.args(["-e", "ExportNotes=true"]);
                }
                cmd.arg("-o").arg(self.staging_dir.path());
            }
        }
        cmd.arg(input);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Move staged PDFs to their final names.
    fn publish(&self, input: &Path, destination: &Path) -> Result<(), WorkerError> {
        let input_stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest_stem = destination
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest_dir = destination.parent().unwrap_or(Path::new(""));

        let staged: Vec<PathBuf> = std::fs::read_dir(self.staging_dir.path())
            .map_err(|e| WorkerError::Render(format!("cannot read staging dir: {}", e)))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false)
            })
            .collect();
        if staged.is_empty() {
            return Err(WorkerError::Render("PDF output file not found".to_string()));
        }

        for pdf in staged {
            let stem = pdf
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let target = if stem == input_stem {
                destination.to_path_buf()
            } else {
                let suffix = stem
                    .strip_prefix(&format!("{}_", input_stem))
                    .unwrap_or(&stem);
                dest_dir.join(format!("{}_{}.pdf", dest_stem, suffix))
            };
            move_file(&pdf, &target)
                .map_err(|e| WorkerError::Render(format!("cannot write {:?}: {}", target, e)))?;
        }
        Ok(())
    }

    fn clear_staging(&self) {
        if let Ok(entries) = std::fs::read_dir(self.staging_dir.path()) {
            for entry in entries.filter_map(|e| e.ok()) {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)
}

#[async_trait]
impl Worker for CommandWorker {
    async fn open(&mut self, source: &Path) -> Result<(), WorkerError> {
        if !source.is_file() {
            return Err(WorkerError::Open(format!("input file not found: {:?}", source)));
        }
        let supported = DocumentKind::from_path(source) == Some(self.kind);
        if !supported {
            return Err(WorkerError::Open(format!(
                "{:?} is not a {} document",
                source, self.kind
            )));
        }
        self.document = Some(source.to_path_buf());
        Ok(())
    }

    async fn render_to_pdf(&mut self, destination: &Path) -> Result<(), WorkerError> {
        let input = self
            .document
            .clone()
            .ok_or_else(|| WorkerError::Render("no document is open".to_string()))?;
        let start = Instant::now();

        debug!(
            "Worker {} converting {:?}",
            self.id,
            input.file_name()
        );

        self.clear_staging();
        let mut cmd = self.build_command(&input);

        // Run with timeout; a hung office process is as good as dead.
        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                WorkerError::Crashed(format!(
                    "no response after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => WorkerError::Unavailable(e.to_string()),
                _ => WorkerError::Crashed(format!("failed to start {:?}: {}", self.binary, e)),
            })?;

        // No exit code means the process was killed by a signal.
        let Some(code) = output.status.code() else {
            return Err(WorkerError::Crashed(format!(
                "{} terminated by signal",
                self.backend
            )));
        };

        if code != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            error!(
                "{} conversion failed for {:?} (exit {}): {}",
                self.backend, input, code, stderr
            );
            return Err(match classify_message(&stderr) {
                FailureClass::Critical => WorkerError::Crashed(stderr),
                _ => WorkerError::Render(format!("exit code {}: {}", code, stderr.trim())),
            });
        }

        self.publish(&input, destination)?;
        self.docs_processed += 1;

        debug!(
            "Worker {} converted {:?} in {:?}",
            self.id,
            input.file_name(),
            start.elapsed()
        );
        Ok(())
    }

    async fn close(&mut self) {
        self.document = None;
        self.clear_staging();
    }
}
