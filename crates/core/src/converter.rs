//! Main converter orchestrator.
//!
//! Drives rendering workers over the files of each document kind:
//!
//! - **Batch mode** reuses one worker for every file of a kind.
//! - **Safe mode** takes over the unprocessed remainder when the batch
//!   worker crashes, creating a fresh worker per file with retries.
//! - **Backend fallback** restarts the unprocessed files on the fallback
//!   backend when the primary one cannot be invoked at all.
//!
//! Every filesystem mutation is recorded in the transaction log so the
//! batch can be undone.

use crate::backend::CommandWorkerFactory;
use crate::config::{
    BatchSummary, ConversionProgress, ConversionRequest, ConversionStage, DocumentKind,
    EngineConfig, ExecutionMode,
};
use crate::error::{ConversionError, FailureCategory, FailureClass, Result, WorkerError};
use crate::path_guard::PathGuard;
use crate::prescan::{self, ConflictSet};
use crate::resolver::DuplicateResolver;
use crate::session::{CancellationFlag, SessionContext};
use crate::stats::EngineStatistics;
use crate::transaction::{ConversionOperation, TransactionLog};
use crate::undo::{UndoExecutor, UndoReport};
use crate::worker::{sibling_artifacts, Worker, WorkerFactory, WorkerOptions};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// Final outcome of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileOutcome {
    Converted { overwritten: bool, renamed: bool },
    Skipped(String),
    /// Abandoned before rendering because of cancellation; not counted.
    Cancelled,
}

/// Why a file did not convert.
#[derive(Debug, Clone)]
struct FileFailure {
    message: String,
    class: FailureClass,
    category: FailureCategory,
    /// Whether another attempt with a fresh worker could succeed.
    retryable: bool,
}

impl FileFailure {
    fn from_worker(error: WorkerError, source: &Path) -> Self {
        let class = error.class();
        let error = error.into_conversion_error(source.to_path_buf());
        // Crash signatures inside open/render messages count as crashes.
        let category = match class {
            FailureClass::Critical => FailureCategory::WorkerCrashed,
            FailureClass::Unavailable => FailureCategory::BackendUnavailable,
            FailureClass::Recoverable => error.category(),
        };
        Self {
            message: error.to_string(),
            class,
            category,
            retryable: true,
        }
    }

    /// A failure that has nothing to do with the worker, such as a path
    /// that cannot be shortened or a refused backup.
    fn permanent(error: ConversionError) -> Self {
        Self {
            message: error.to_string(),
            class: FailureClass::Recoverable,
            category: error.category(),
            retryable: false,
        }
    }
}

/// How the files of one strategy run are handled.
#[derive(Debug, Clone, Copy)]
struct RenderPass {
    mode: ExecutionMode,
    /// The backend may write `{stem}_{suffix}.pdf` files next to the target.
    sheet_artifacts: bool,
}

impl RenderPass {
    fn new(mode: ExecutionMode, factory: &dyn WorkerFactory) -> Self {
        Self {
            mode,
            sheet_artifacts: factory.capabilities().produces_sheet_artifacts,
        }
    }
}

/// How a strategy run over a kind's files ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StrategyOutcome {
    Finished,
    Cancelled { next: usize },
    WorkerCrashed { next: usize, reason: String },
    BackendUnavailable { next: usize, reason: String },
}

/// Files of one kind that were never reached.
struct KindRun {
    kind: DocumentKind,
    submitted: usize,
    unprocessed: usize,
}

/// Main converter for Office documents to PDF.
///
/// Owns the transaction log and statistics of the most recent batch.
pub struct Converter {
    config: EngineConfig,
    primary: Arc<dyn WorkerFactory>,
    fallback: Option<Arc<dyn WorkerFactory>>,
    session: SessionContext,
    log: Arc<TransactionLog>,
    stats: Arc<EngineStatistics>,
    cancel: CancellationFlag,
    guard: PathGuard,
    resolver: DuplicateResolver,
    /// One lock per output directory, held while a target is claimed and
    /// rendered so concurrent kinds never see each other's output.
    dir_locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl Converter {
    /// Create a converter backed by the command-line backends in `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let primary: Arc<dyn WorkerFactory> = Arc::new(CommandWorkerFactory::new(
            config.backends.primary,
            config.backends.clone(),
        ));
        let fallback = config.backends.fallback.map(|backend| {
            Arc::new(CommandWorkerFactory::new(backend, config.backends.clone()))
                as Arc<dyn WorkerFactory>
        });
        Self::with_factories(config, primary, fallback)
    }

    /// Create a converter with explicit worker factories.
    pub fn with_factories(
        config: EngineConfig,
        primary: Arc<dyn WorkerFactory>,
        fallback: Option<Arc<dyn WorkerFactory>>,
    ) -> Result<Self> {
        config.validate()?;

        let session = match &config.backup_root {
            Some(root) => SessionContext::new(root),
            None => SessionContext::in_temp_dir(),
        };
        let guard = PathGuard::new(config.max_path_len);
        let resolver = DuplicateResolver::new(config.duplicate_action, guard);

        info!(
            "Initializing converter with primary={}, fallback={:?}, duplicates={:?}",
            primary.backend(),
            fallback.as_ref().map(|f| f.backend()),
            config.duplicate_action
        );

        Ok(Self {
            config,
            primary,
            fallback,
            session,
            log: Arc::new(TransactionLog::new()),
            stats: Arc::new(EngineStatistics::new()),
            cancel: CancellationFlag::new(),
            guard,
            resolver,
            dir_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the session context (backup location and progress sink).
    pub fn with_session(mut self, session: SessionContext) -> Self {
        self.session = session;
        self
    }

    /// Flag the caller can set to stop the running batch.
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Get the current configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Session of this converter.
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Operations recorded by the most recent batch.
    pub fn transaction_log(&self) -> &TransactionLog {
        &self.log
    }

    /// Counters of the most recent batch.
    pub fn statistics(&self) -> &EngineStatistics {
        &self.stats
    }

    /// Convert every request and report the outcome.
    ///
    /// Starting a batch discards the undo history of the previous one and
    /// clears a cancellation left over from it.
    pub async fn convert(&self, requests: Vec<ConversionRequest>) -> BatchSummary {
        let start = Instant::now();
        self.cancel.reset();
        self.log.clear_history(&self.session);
        self.stats.reset();
        self.dir_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        let conflicts = prescan::scan_requests(&requests);
        if !conflicts.is_empty() {
            info!(
                "{} sources share an output name, using extension-qualified names",
                conflicts.len()
            );
        }

        let runs: Vec<KindRun> = if self.config.concurrent_kinds {
            join_all(requests.iter().map(|r| self.run_kind(r, &conflicts))).await
        } else {
            let mut runs = Vec::with_capacity(requests.len());
            for request in &requests {
                runs.push(self.run_kind(request, &conflicts).await);
            }
            runs
        };

        self.summarize(runs, start)
    }

    /// Undo the most recent batch.
    pub fn undo(&self) -> UndoReport {
        UndoExecutor::new(self.session.clone()).undo(&self.log)
    }

    /// Forget the most recent batch without undoing it.
    pub fn clear_history(&self) {
        self.log.clear_history(&self.session);
    }

    fn summarize(&self, runs: Vec<KindRun>, start: Instant) -> BatchSummary {
        let mut submitted: BTreeMap<DocumentKind, usize> = BTreeMap::new();
        let mut unprocessed: BTreeMap<DocumentKind, usize> = BTreeMap::new();
        for run in &runs {
            *submitted.entry(run.kind).or_default() += run.submitted;
            if run.unprocessed > 0 {
                *unprocessed.entry(run.kind).or_default() += run.unprocessed;
            }
        }

        let statistics = self.stats.snapshot_all();
        let mut anomalies = BTreeMap::new();
        for (&kind, &count) in &submitted {
            let seen = statistics.get(&kind).map(|s| s.total_seen).unwrap_or(0);
            let accounted = seen + unprocessed.get(&kind).copied().unwrap_or(0);
            if accounted != count {
                warn!(
                    "{} of {} {} files are unaccounted for",
                    count.abs_diff(accounted),
                    count,
                    kind
                );
                anomalies.insert(kind, count.abs_diff(accounted));
            }
        }

        let summary = BatchSummary {
            statistics,
            failed: self.stats.failures(),
            refused_deletions: self.stats.refused_deletions(),
            cancelled: self.cancel.is_cancelled(),
            unprocessed,
            anomalies,
            total_duration: start.elapsed(),
        };
        for (kind, s) in &summary.statistics {
            info!(
                "{}: {} seen, {} converted ({} overwritten, {} renamed), {} skipped, {} failed",
                kind, s.total_seen, s.succeeded, s.overwritten, s.renamed, s.skipped, s.failed
            );
        }
        summary
    }

    /// Convert one kind, falling back between backends as needed.
    async fn run_kind(&self, request: &ConversionRequest, conflicts: &ConflictSet) -> KindRun {
        let kind = request.kind;
        let total = request.source_paths.len();
        let mut next = 0;
        let mut last_reason = String::from("no backend configured");

        info!("Converting {} {} documents", total, kind);
        if total == 0 {
            return KindRun {
                kind,
                submitted: 0,
                unprocessed: 0,
            };
        }

        let backends = std::iter::once(&self.primary).chain(self.fallback.as_ref());
        for factory in backends {
            if !factory.is_available().await {
                warn!(
                    "{} backend is not available on this host, trying the next backend",
                    factory.backend()
                );
                last_reason = format!("{} backend is not available", factory.backend());
                continue;
            }

            match self.run_backend(&**factory, request, conflicts, next).await {
                StrategyOutcome::Finished => {
                    return KindRun {
                        kind,
                        submitted: total,
                        unprocessed: 0,
                    }
                }
                StrategyOutcome::Cancelled { next } => {
                    info!("{} batch cancelled, {} files not processed", kind, total - next);
                    return KindRun {
                        kind,
                        submitted: total,
                        unprocessed: total - next,
                    };
                }
                StrategyOutcome::BackendUnavailable { next: at, reason }
                | StrategyOutcome::WorkerCrashed { next: at, reason } => {
                    warn!(
                        "{} backend cannot be invoked ({}), restarting {} files on the next backend",
                        factory.backend(),
                        reason,
                        total - at
                    );
                    last_reason = reason;
                    next = at;
                }
            }
        }

        error!("No rendering backend available for {} documents", kind);
        let err = ConversionError::BackendUnavailable(last_reason);
        for source in &request.source_paths[next..] {
            self.stats
                .record_failure(kind, source, err.category(), err.to_string());
        }
        KindRun {
            kind,
            submitted: total,
            unprocessed: 0,
        }
    }

    /// Batch mode, then safe mode for whatever a crash left behind.
    async fn run_backend(
        &self,
        factory: &dyn WorkerFactory,
        request: &ConversionRequest,
        conflicts: &ConflictSet,
        start: usize,
    ) -> StrategyOutcome {
        match self.run_batch(factory, request, conflicts, start).await {
            StrategyOutcome::WorkerCrashed { next, reason } => {
                warn!(
                    "{} worker crashed ({}), processing the remaining {} files in safe mode",
                    factory.backend(),
                    reason,
                    request.source_paths.len() - next
                );
                self.run_safe(factory, request, conflicts, next).await
            }
            other => other,
        }
    }

    fn worker_options(&self, factory: &dyn WorkerFactory) -> WorkerOptions {
        let wanted = self.config.backends.include_tracked_changes;
        if wanted && !factory.capabilities().supports_tracked_changes {
            warn!(
                "{} backend cannot print tracked changes, option ignored",
                factory.backend()
            );
        }
        WorkerOptions {
            include_tracked_changes: wanted && factory.capabilities().supports_tracked_changes,
        }
    }

    /// One worker for every remaining file.
    async fn run_batch(
        &self,
        factory: &dyn WorkerFactory,
        request: &ConversionRequest,
        conflicts: &ConflictSet,
        start: usize,
    ) -> StrategyOutcome {
        let kind = request.kind;
        let options = self.worker_options(factory);
        let pass = RenderPass::new(ExecutionMode::Batch, factory);
        let mut worker = match factory.create(kind, &options).await {
            Ok(worker) => worker,
            Err(e) => {
                return match e.class() {
                    FailureClass::Unavailable => StrategyOutcome::BackendUnavailable {
                        next: start,
                        reason: e.to_string(),
                    },
                    _ => StrategyOutcome::WorkerCrashed {
                        next: start,
                        reason: e.to_string(),
                    },
                };
            }
        };

        for (index, source) in request.source_paths.iter().enumerate().skip(start) {
            if self.cancel.is_cancelled() {
                return StrategyOutcome::Cancelled { next: index };
            }

            let result = self
                .process_file(&mut *worker, request, index, source, conflicts, pass)
                .await;
            match result {
                Ok(FileOutcome::Cancelled) => return StrategyOutcome::Cancelled { next: index },
                Ok(outcome) => self.record_outcome(kind, source, outcome),
                Err(failure) => match failure.class {
                    FailureClass::Critical => {
                        return StrategyOutcome::WorkerCrashed {
                            next: index,
                            reason: failure.message,
                        }
                    }
                    FailureClass::Unavailable => {
                        return StrategyOutcome::BackendUnavailable {
                            next: index,
                            reason: failure.message,
                        }
                    }
                    FailureClass::Recoverable => {
                        self.record_failure(kind, source, &failure);
                    }
                },
            }
        }

        StrategyOutcome::Finished
    }

    /// A fresh worker per file, with retries and backoff.
    async fn run_safe(
        &self,
        factory: &dyn WorkerFactory,
        request: &ConversionRequest,
        conflicts: &ConflictSet,
        start: usize,
    ) -> StrategyOutcome {
        let kind = request.kind;
        let options = self.worker_options(factory);
        let policy = &self.config.safe_mode;
        let stabilize = factory.capabilities().needs_stabilization;
        let pass = RenderPass::new(ExecutionMode::Safe, factory);

        for (index, source) in request.source_paths.iter().enumerate().skip(start) {
            let mut last_failure: Option<FileFailure> = None;

            for attempt in 1..=policy.max_attempts {
                if self.cancel.is_cancelled() {
                    return StrategyOutcome::Cancelled { next: index };
                }

                let result = match factory.create(kind, &options).await {
                    Ok(mut worker) => {
                        let result = self
                            .process_file(&mut *worker, request, index, source, conflicts, pass)
                            .await;
                        if stabilize && matches!(result, Ok(FileOutcome::Converted { .. })) {
                            tokio::time::sleep(policy.stabilization_delay).await;
                        }
                        result
                    }
                    Err(e) => Err(FileFailure::from_worker(e, source)),
                };

                match result {
                    Ok(FileOutcome::Cancelled) => return StrategyOutcome::Cancelled { next: index },
                    Ok(outcome) => {
                        self.record_outcome(kind, source, outcome);
                        last_failure = None;
                        break;
                    }
                    Err(failure) if failure.class == FailureClass::Unavailable => {
                        return StrategyOutcome::BackendUnavailable {
                            next: index,
                            reason: failure.message,
                        };
                    }
                    Err(failure) if !failure.retryable => {
                        self.record_failure(kind, source, &failure);
                        last_failure = None;
                        break;
                    }
                    Err(failure) => {
                        warn!(
                            "Attempt {}/{} for {:?} failed: {}",
                            attempt, policy.max_attempts, source, failure.message
                        );
                        let exhausted = attempt == policy.max_attempts;
                        last_failure = Some(failure);
                        if !exhausted {
                            tokio::time::sleep(policy.backoff_for(attempt)).await;
                        }
                    }
                }
            }

            if let Some(failure) = last_failure {
                self.record_failure(
                    kind,
                    source,
                    &FileFailure {
                        message: format!(
                            "failed after {} attempts: {}",
                            policy.max_attempts, failure.message
                        ),
                        ..failure
                    },
                );
            }
        }

        StrategyOutcome::Finished
    }

    fn record_outcome(&self, kind: DocumentKind, source: &Path, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Converted {
                overwritten,
                renamed,
            } => self.stats.record_success(kind, overwritten, renamed),
            FileOutcome::Skipped(reason) => {
                debug!("Skipped {:?}: {}", source, reason);
                self.stats.record_skip(kind);
            }
            FileOutcome::Cancelled => {}
        }
    }

    fn record_failure(&self, kind: DocumentKind, source: &Path, failure: &FileFailure) {
        error!("Failed to convert {:?}: {}", source, failure.message);
        self.stats
            .record_failure(kind, source, failure.category, failure.message.as_str());
    }

    fn report(
        &self,
        request: &ConversionRequest,
        index: usize,
        source: &Path,
        mode: ExecutionMode,
        stage: ConversionStage,
    ) {
        self.session.report(ConversionProgress {
            kind: request.kind,
            file_index: index,
            total_files: request.source_paths.len(),
            current_file: source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".to_string()),
            mode,
            stage,
        });
    }

    /// Open, render and close one document.
    async fn process_file(
        &self,
        worker: &mut dyn Worker,
        request: &ConversionRequest,
        index: usize,
        source: &Path,
        conflicts: &ConflictSet,
        pass: RenderPass,
    ) -> std::result::Result<FileOutcome, FileFailure> {
        let mode = pass.mode;
        self.report(request, index, source, mode, ConversionStage::Opening);
        let rejected = if !source.is_file() {
            Some(ConversionError::InputNotFound(source.to_path_buf()))
        } else if DocumentKind::from_path(source) != Some(request.kind) {
            Some(ConversionError::UnsupportedFormat {
                path: source.to_path_buf(),
                kind: request.kind.to_string(),
            })
        } else {
            None
        };
        if let Some(error) = rejected {
            self.report(request, index, source, mode, ConversionStage::Failed);
            return Err(FileFailure::permanent(error));
        }

        let result = match worker.open(source).await {
            Ok(()) => {
                let rendered = self
                    .render_open_document(worker, request, index, source, conflicts, pass)
                    .await;
                worker.close().await;
                rendered
            }
            Err(e) => {
                worker.close().await;
                Err(FileFailure::from_worker(e, source))
            }
        };

        let stage = match &result {
            Ok(FileOutcome::Converted { .. }) => ConversionStage::Completed,
            Ok(_) => ConversionStage::Skipped,
            Err(_) => ConversionStage::Failed,
        };
        self.report(request, index, source, mode, stage);
        result
    }

    async fn render_open_document(
        &self,
        worker: &mut dyn Worker,
        request: &ConversionRequest,
        index: usize,
        source: &Path,
        conflicts: &ConflictSet,
        pass: RenderPass,
    ) -> std::result::Result<FileOutcome, FileFailure> {
        let planned = prescan::planned_target(request, source, conflicts);
        let target = self.guard.guard(&planned).map_err(FileFailure::permanent)?;

        let lock = self.dir_lock(target.parent().unwrap_or(Path::new("")));
        let _claimed = lock.lock().await;

        let handle = self.resolver.resolve(&target).map_err(FileFailure::permanent)?;
        let Some(final_path) = handle.final_path.clone() else {
            return Ok(FileOutcome::Skipped(format!("{:?} already exists", target)));
        };

        if let Some(parent) = final_path.parent() {
            self.log
                .create_dir_all(parent)
                .map_err(FileFailure::permanent)?;
        }

        // No overwrite without a verified backup.
        let backup = if handle.is_overwrite() {
            Some(
                self.session
                    .backup_file(&final_path)
                    .map_err(FileFailure::permanent)?,
            )
        } else {
            None
        };

        if self.cancel.is_cancelled() {
            if let Some(backup) = &backup {
                let _ = std::fs::remove_file(backup);
            }
            return Ok(FileOutcome::Cancelled);
        }

        let existing_artifacts = if pass.sheet_artifacts {
            sibling_artifacts(&final_path)
        } else {
            Default::default()
        };
        self.report(request, index, source, pass.mode, ConversionStage::Rendering);
        let rendered = worker.render_to_pdf(&final_path).await;
        let new_artifacts: Vec<PathBuf> = if pass.sheet_artifacts {
            sibling_artifacts(&final_path)
                .into_iter()
                .filter(|p| !existing_artifacts.contains(p))
                .collect()
        } else {
            Vec::new()
        };

        if let Err(e) = rendered {
            self.discard_partial_output(&final_path, backup.as_deref(), &new_artifacts);
            return Err(FileFailure::from_worker(e, source));
        }
        if !final_path.exists() && new_artifacts.is_empty() {
            self.discard_partial_output(&final_path, backup.as_deref(), &new_artifacts);
            return Err(FileFailure::from_worker(
                WorkerError::Render("no PDF was produced".to_string()),
                source,
            ));
        }

        let mut overwritten = false;
        match backup {
            Some(backup) if final_path.exists() => {
                let op = ConversionOperation::overwrite_file(
                    final_path.clone(),
                    backup,
                    Some(source.to_path_buf()),
                )
                .map_err(FileFailure::permanent)?;
                self.log.record(op);
                overwritten = true;
            }
            Some(backup) => {
                // Only sheet artifacts were written; put the original back.
                restore_backup(&backup, &final_path);
            }
            None if final_path.exists() => {
                self.log.record(ConversionOperation::create_file(
                    final_path.clone(),
                    Some(source.to_path_buf()),
                ));
            }
            None => {}
        }
        if !new_artifacts.is_empty() {
            debug!(
                "{:?} produced {} additional PDFs",
                source,
                new_artifacts.len()
            );
        }
        for artifact in new_artifacts {
            self.log.record(ConversionOperation::create_file(
                artifact,
                Some(source.to_path_buf()),
            ));
        }

        if self.config.delete_sources_after_conversion {
            self.delete_source(request.kind, source);
        }

        debug!("Converted {:?} to {:?}", source, final_path);
        Ok(FileOutcome::Converted {
            overwritten,
            renamed: handle.is_rename(),
        })
    }

    /// Remove what a failed render left behind and restore the original.
    fn discard_partial_output(&self, target: &Path, backup: Option<&Path>, artifacts: &[PathBuf]) {
        for artifact in artifacts {
            let _ = std::fs::remove_file(artifact);
        }
        match backup {
            Some(backup) => restore_backup(backup, target),
            None => {
                if target.exists() {
                    if let Err(e) = std::fs::remove_file(target) {
                        warn!("Failed to remove partial output {:?}: {}", target, e);
                    }
                }
            }
        }
    }

    /// Back up and delete a converted source. Refused if the backup fails;
    /// refusals are listed in the batch summary.
    fn delete_source(&self, kind: DocumentKind, source: &Path) {
        let op = self
            .session
            .backup_file(source)
            .and_then(|backup| ConversionOperation::delete_file(source.to_path_buf(), backup));
        let op = match op {
            Ok(op) => op,
            Err(e) => {
                warn!("Keeping {:?}: {}", source, e);
                self.stats
                    .record_refused_deletion(kind, source, e.category(), e.to_string());
                return;
            }
        };
        match std::fs::remove_file(source) {
            Ok(()) => self.log.record(op),
            Err(e) => {
                warn!("Failed to delete source {:?}: {}", source, e);
                let e = ConversionError::Io(e);
                self.stats
                    .record_refused_deletion(kind, source, e.category(), e.to_string());
            }
        }
    }

    /// Lock serializing target claims and renders in `dir`.
    fn dir_lock(&self, dir: &Path) -> Arc<AsyncMutex<()>> {
        let mut locks = self.dir_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(dir.to_path_buf()).or_default())
    }
}

/// Copy a backup over `target` and drop the backup.
fn restore_backup(backup: &Path, target: &Path) {
    match std::fs::copy(backup, target) {
        Ok(_) => {
            let _ = std::fs::remove_file(backup);
        }
        Err(e) => error!(
            "Failed to restore {:?} from backup {:?}: {}",
            target, backup, e
        ),
    }
}
