//! Per-kind conversion counters.

use crate::config::{DocumentKind, FailedFile};
use crate::error::FailureCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Snapshot of the counters for one document kind.
///
/// `total_seen == succeeded + failed + skipped`; overwritten and renamed
/// files are counted within `succeeded`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStatistics {
    pub total_seen: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub overwritten: usize,
    pub renamed: usize,
}

impl KindStatistics {
    /// Field-wise sum.
    pub fn merged(&self, other: &KindStatistics) -> KindStatistics {
        KindStatistics {
            total_seen: self.total_seen + other.total_seen,
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
            skipped: self.skipped + other.skipped,
            overwritten: self.overwritten + other.overwritten,
            renamed: self.renamed + other.renamed,
        }
    }

    /// Whether every seen file has exactly one outcome.
    pub fn is_consistent(&self) -> bool {
        self.total_seen == self.succeeded + self.failed + self.skipped
    }
}

#[derive(Debug, Default)]
struct KindCounters {
    total_seen: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    overwritten: AtomicUsize,
    renamed: AtomicUsize,
}

impl KindCounters {
    fn snapshot(&self) -> KindStatistics {
        KindStatistics {
            total_seen: self.total_seen.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            overwritten: self.overwritten.load(Ordering::SeqCst),
            renamed: self.renamed.load(Ordering::SeqCst),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.total_seen,
            &self.succeeded,
            &self.failed,
            &self.skipped,
            &self.overwritten,
            &self.renamed,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

/// Monotonic counters shared by every kind batch of a run.
///
/// Each outcome bumps `total_seen` together with its own counter, so a file
/// is only "seen" once its outcome is final.
#[derive(Debug, Default)]
pub struct EngineStatistics {
    counters: [KindCounters; 3],
    failures: Mutex<Vec<FailedFile>>,
    refused_deletions: Mutex<Vec<FailedFile>>,
}

impl EngineStatistics {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, kind: DocumentKind) -> &KindCounters {
        match kind {
            DocumentKind::Word => &self.counters[0],
            DocumentKind::Excel => &self.counters[1],
            DocumentKind::PowerPoint => &self.counters[2],
        }
    }

    /// Count a converted file.
    pub fn record_success(&self, kind: DocumentKind, overwritten: bool, renamed: bool) {
        let c = self.counters(kind);
        c.succeeded.fetch_add(1, Ordering::SeqCst);
        if overwritten {
            c.overwritten.fetch_add(1, Ordering::SeqCst);
        }
        if renamed {
            c.renamed.fetch_add(1, Ordering::SeqCst);
        }
        c.total_seen.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a skipped file.
    pub fn record_skip(&self, kind: DocumentKind) {
        let c = self.counters(kind);
        c.skipped.fetch_add(1, Ordering::SeqCst);
        c.total_seen.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a failed file and remember why.
    pub fn record_failure(
        &self,
        kind: DocumentKind,
        input_path: &Path,
        category: FailureCategory,
        error: impl Into<String>,
    ) {
        let c = self.counters(kind);
        c.failed.fetch_add(1, Ordering::SeqCst);
        c.total_seen.fetch_add(1, Ordering::SeqCst);
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FailedFile {
                kind,
                input_path: input_path.to_path_buf(),
                category,
                error: error.into(),
            });
    }

    /// Remember a converted source that was kept instead of deleted.
    ///
    /// Does not touch the counters; the file was already counted as
    /// converted.
    pub fn record_refused_deletion(
        &self,
        kind: DocumentKind,
        input_path: &Path,
        category: FailureCategory,
        error: impl Into<String>,
    ) {
        self.refused_deletions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FailedFile {
                kind,
                input_path: input_path.to_path_buf(),
                category,
                error: error.into(),
            });
    }

    /// Counters for one kind.
    pub fn snapshot(&self, kind: DocumentKind) -> KindStatistics {
        self.counters(kind).snapshot()
    }

    /// Counters for every kind that saw at least one file.
    pub fn snapshot_all(&self) -> BTreeMap<DocumentKind, KindStatistics> {
        DocumentKind::ALL
            .into_iter()
            .map(|kind| (kind, self.snapshot(kind)))
            .filter(|(_, stats)| stats.total_seen > 0)
            .collect()
    }

    /// Failed files recorded so far.
    pub fn failures(&self) -> Vec<FailedFile> {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sources whose deletion was refused so far.
    pub fn refused_deletions(&self) -> Vec<FailedFile> {
        self.refused_deletions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Zero everything. Only called when a new batch starts.
    pub fn reset(&self) {
        for counters in &self.counters {
            counters.reset();
        }
        for list in [&self.failures, &self.refused_deletions] {
            list.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn test_outcomes_keep_invariant() {
        let stats = EngineStatistics::new();
        stats.record_success(DocumentKind::Word, false, false);
        stats.record_success(DocumentKind::Word, true, false);
        stats.record_success(DocumentKind::Word, false, true);
        stats.record_skip(DocumentKind::Word);
        stats.record_failure(
            DocumentKind::Word,
            Path::new("/in/bad.docx"),
            FailureCategory::Document,
            "corrupt",
        );

        let word = stats.snapshot(DocumentKind::Word);
        assert_eq!(word.total_seen, 5);
        assert_eq!(word.succeeded, 3);
        assert_eq!(word.overwritten, 1);
        assert_eq!(word.renamed, 1);
        assert!(word.is_consistent());
        assert_eq!(stats.snapshot(DocumentKind::Excel), KindStatistics::default());
    }

    #[test]
    fn test_failures_are_listed() {
        let stats = EngineStatistics::new();
        stats.record_failure(
            DocumentKind::Excel,
            Path::new("/in/a.xlsx"),
            FailureCategory::WorkerCrashed,
            "bad sheet",
        );
        let failures = stats.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, DocumentKind::Excel);
        assert_eq!(failures[0].input_path, PathBuf::from("/in/a.xlsx"));
        assert_eq!(failures[0].category, FailureCategory::WorkerCrashed);
        assert_eq!(failures[0].error, "bad sheet");
    }

    #[test]
    fn test_refused_deletion_is_listed_but_not_counted() {
        let stats = EngineStatistics::new();
        stats.record_success(DocumentKind::Word, false, false);
        stats.record_refused_deletion(
            DocumentKind::Word,
            Path::new("/in/a.docx"),
            FailureCategory::BackupFailed,
            "disk full",
        );

        let word = stats.snapshot(DocumentKind::Word);
        assert_eq!((word.total_seen, word.succeeded, word.failed), (1, 1, 0));
        assert!(stats.failures().is_empty());
        let refused = stats.refused_deletions();
        assert_eq!(refused.len(), 1);
        assert_eq!(refused[0].category, FailureCategory::BackupFailed);

        stats.reset();
        assert!(stats.refused_deletions().is_empty());
    }

    #[test]
    fn test_snapshot_all_omits_unused_kinds() {
        let stats = EngineStatistics::new();
        stats.record_skip(DocumentKind::PowerPoint);
        let all = stats.snapshot_all();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&DocumentKind::PowerPoint));
    }

    #[test]
    fn test_reset() {
        let stats = EngineStatistics::new();
        let path = Path::new("/in/a.docx");
        stats.record_failure(DocumentKind::Word, path, FailureCategory::Io, "x");
        stats.reset();
        assert_eq!(stats.snapshot(DocumentKind::Word), KindStatistics::default());
        assert!(stats.failures().is_empty());
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(EngineStatistics::new());
        let handles: Vec<_> = DocumentKind::ALL
            .into_iter()
            .map(|kind| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        stats.record_success(kind, false, false);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for kind in DocumentKind::ALL {
            assert_eq!(stats.snapshot(kind).succeeded, 500);
        }
    }

    #[test]
    fn test_merged() {
        let a = KindStatistics {
            total_seen: 2,
            succeeded: 2,
            ..Default::default()
        };
        let b = KindStatistics {
            total_seen: 1,
            failed: 1,
            ..Default::default()
        };
        let sum = a.merged(&b);
        assert_eq!(sum.total_seen, 3);
        assert!(sum.is_consistent());
    }
}
