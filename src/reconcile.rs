//! Scan reconciliation: merge a fresh folder scan into the document store.
//!
//! For each scanned file only the best clause match is considered. The
//! file's identity is `(file_name, clause_id)`:
//!
//! | Store state | Action | Counter |
//! |-------------|--------|---------|
//! | no document | insert document + revision 1 | `documents_added` |
//! | same hash | bump `last_scanned` | none |
//! | different hash | append revision `max + 1`, update current content | `documents_updated` |
//!
//! Two files in one scan can share an identity (same name in different
//! subfolders, same best clause). The first in path order is recorded; the
//! rest are reported as [`IdentityConflict`]s and left untouched.
//!
//! Extraction and scoring run on the scanner's worker pool; every store
//! write for one scan happens here, sequentially, in path order.
//!
//! At most one scan per `(standard, folder)` runs at a time: [`ScanLocks`]
//! guards the current process and the `running` scan-history row guards
//! against other processes. A scan dropped before it finishes marks its
//! history row `failed`.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ScanError, StoreError};
use crate::models::{
    ClauseMatch, ContentUpdate, Correction, Document, FileMatches, NewDocument, ScanCounts,
    UnmatchedFile,
};
use crate::progress::{ScanProgressEvent, ScanProgressReporter};
use crate::scanner::{scan_folder, ScanOptions};
use crate::store::DocumentStore;

/// Correction reason recorded when the operator gives none.
pub const DEFAULT_CORRECTION_REASON: &str = "Manual reassignment";

type LockKey = (i64, PathBuf);

/// In-process registry of scans currently running, keyed by standard and
/// canonical folder path.
#[derive(Clone, Default)]
pub struct ScanLocks {
    held: Arc<Mutex<HashSet<LockKey>>>,
}

impl ScanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the pair, or returns `None` if another scan holds it.
    pub fn try_acquire(&self, standard_id: i64, folder: &Path) -> Option<ScanLockGuard> {
        let key = (standard_id, folder.to_path_buf());
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.clone()) {
            return None;
        }
        Some(ScanLockGuard {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_held(&self, standard_id: i64, folder: &Path) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains(&(standard_id, folder.to_path_buf()))
    }
}

/// Releases its [`ScanLocks`] entry on drop.
pub struct ScanLockGuard {
    held: Arc<Mutex<HashSet<LockKey>>>,
    key: LockKey,
}

impl Drop for ScanLockGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
    }
}

/// Marks the scan-history row failed if the scan never reaches
/// [`HistoryGuard::complete`] or [`HistoryGuard::fail`].
struct HistoryGuard {
    store: Arc<dyn DocumentStore>,
    scan_id: i64,
    armed: bool,
}

impl HistoryGuard {
    async fn complete(mut self, counts: &ScanCounts) -> Result<(), StoreError> {
        self.armed = false;
        self.store.finish_scan(self.scan_id, counts, Utc::now()).await
    }

    async fn fail(mut self, message: &str) {
        self.armed = false;
        if let Err(e) = self.store.fail_scan(self.scan_id, message, Utc::now()).await {
            warn!(scan_id = self.scan_id, error = %e, "could not mark scan failed");
        }
    }
}

impl Drop for HistoryGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = Arc::clone(&self.store);
        let scan_id = self.scan_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.fail_scan(scan_id, "scan cancelled", Utc::now()).await {
                        warn!(scan_id, error = %e, "could not mark cancelled scan failed");
                    }
                });
            }
            Err(_) => warn!(scan_id, "scan dropped outside a runtime; history row left running"),
        }
    }
}

/// What reconciliation did with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Added,
    Unchanged,
    Revised,
    /// No content hash (file unreadable); nothing written.
    Skipped,
}

/// A file skipped because an earlier file in the same scan already
/// claimed its `(file_name, clause_id)` identity.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityConflict {
    pub file_path: PathBuf,
    pub kept_path: PathBuf,
    pub clause_number: String,
}

/// Summary of one reconciled scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: i64,
    pub standard_id: i64,
    pub folder: PathBuf,
    pub counts: ScanCounts,
    pub extraction_failures: u64,
    pub unmatched: Vec<UnmatchedFile>,
    pub identity_conflicts: Vec<IdentityConflict>,
    pub duration_secs: f64,
}

/// Runs scans against one store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    locks: ScanLocks,
    options: ScanOptions,
    stale_after: chrono::Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self::with_options(
            store,
            ScanOptions::from_config(config),
            config.scan.stale_after(),
        )
    }

    /// The reconciler always keeps one match per file, whatever
    /// `options.matching.max_matches_per_doc` says.
    pub fn with_options(
        store: Arc<dyn DocumentStore>,
        options: ScanOptions,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            store,
            locks: ScanLocks::new(),
            options: options.best_match_only(),
            stale_after,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn locks(&self) -> &ScanLocks {
        &self.locks
    }

    /// Validates the folder and claims the scan lock without touching the
    /// store. Errors here leave no history row behind.
    pub fn prepare(&self, standard_id: i64, folder: &Path) -> Result<PreparedScan, ScanError> {
        if !folder.is_dir() {
            return Err(ScanError::FolderNotFound(folder.to_path_buf()));
        }
        let canonical = std::fs::canonicalize(folder)
            .map_err(|_| ScanError::FolderNotFound(folder.to_path_buf()))?;
        let lock = self
            .locks
            .try_acquire(standard_id, &canonical)
            .ok_or_else(|| ScanError::AlreadyRunning {
                standard_id,
                folder: canonical.clone(),
            })?;

        Ok(PreparedScan {
            store: Arc::clone(&self.store),
            options: self.options.clone(),
            stale_after: self.stale_after,
            standard_id,
            folder: canonical,
            _lock: lock,
        })
    }

    /// Scans `folder` and reconciles the result, to completion.
    pub async fn run_scan(
        &self,
        standard_id: i64,
        folder: &Path,
        progress: Arc<dyn ScanProgressReporter>,
    ) -> Result<ScanReport, ScanError> {
        self.prepare(standard_id, folder)?.run(progress).await
    }

    /// Starts a scan in the background.
    ///
    /// A missing folder or a scan already running for the pair is reported
    /// here, before anything is scheduled.
    pub fn spawn_scan(
        &self,
        standard_id: i64,
        folder: &Path,
        progress: Arc<dyn ScanProgressReporter>,
    ) -> Result<JoinHandle<Result<ScanReport, ScanError>>, ScanError> {
        let prepared = self.prepare(standard_id, folder)?;
        Ok(tokio::spawn(prepared.run(progress)))
    }

    pub async fn reassign_document(
        &self,
        document_id: i64,
        clause_id: i64,
        reason: Option<&str>,
    ) -> Result<ReassignOutcome, StoreError> {
        reassign_document(self.store.as_ref(), document_id, clause_id, reason).await
    }
}

/// A scan whose folder exists and whose lock is held.
pub struct PreparedScan {
    store: Arc<dyn DocumentStore>,
    options: ScanOptions,
    stale_after: chrono::Duration,
    standard_id: i64,
    folder: PathBuf,
    _lock: ScanLockGuard,
}

impl PreparedScan {
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub async fn run(self, progress: Arc<dyn ScanProgressReporter>) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let folder_str = self.folder.display().to_string();

        if self.store.get_standard(self.standard_id).await?.is_none() {
            return Err(ScanError::StandardNotFound(self.standard_id));
        }
        let clauses = self.store.load_clauses(self.standard_id).await?;

        let scan_id = self
            .store
            .begin_scan(self.standard_id, &folder_str, Utc::now(), self.stale_after)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => ScanError::AlreadyRunning {
                    standard_id: self.standard_id,
                    folder: self.folder.clone(),
                },
                other => ScanError::Store(other),
            })?;
        let guard = HistoryGuard {
            store: Arc::clone(&self.store),
            scan_id,
            armed: true,
        };
        info!(scan_id, standard_id = self.standard_id, folder = %folder_str, clauses = clauses.len(), "scan started");

        let result = match scan_folder(&self.folder, &clauses, &self.options, progress.as_ref()).await
        {
            Ok(result) => result,
            Err(e) => {
                guard.fail(&e.to_string()).await;
                return Err(e);
            }
        };

        let mut counts = ScanCounts {
            documents_scanned: result.documents_scanned,
            documents_matched: result.documents_matched,
            ..ScanCounts::default()
        };
        let total = result.matches.len() as u64;
        let mut claimed: HashMap<(String, i64), PathBuf> = HashMap::new();
        let mut identity_conflicts = Vec::new();
        for (i, file) in result.matches.iter().enumerate() {
            let Some(best) = file.matches.first() else {
                continue;
            };
            if file.content_hash.is_some() {
                let key = (file.file_name.clone(), best.clause_id);
                if let Some(kept) = claimed.get(&key) {
                    warn!(
                        scan_id,
                        file = %file.file_path.display(),
                        kept = %kept.display(),
                        clause = %best.clause_number,
                        "same file name already matched this clause in this scan, skipped"
                    );
                    identity_conflicts.push(IdentityConflict {
                        file_path: file.file_path.clone(),
                        kept_path: kept.clone(),
                        clause_number: best.clause_number.clone(),
                    });
                    progress.report(ScanProgressEvent::Reconciling {
                        n: i as u64 + 1,
                        total,
                    });
                    continue;
                }
                claimed.insert(key, file.file_path.clone());
            }
            match reconcile_file(self.store.as_ref(), file, best).await {
                Ok(Disposition::Added) => counts.documents_added += 1,
                Ok(Disposition::Revised) => counts.documents_updated += 1,
                Ok(Disposition::Unchanged) | Ok(Disposition::Skipped) => {}
                Err(e) => {
                    warn!(scan_id, file = %file.file_path.display(), error = %e, "reconciliation failed");
                    guard.fail(&e.to_string()).await;
                    return Err(e.into());
                }
            }
            progress.report(ScanProgressEvent::Reconciling {
                n: i as u64 + 1,
                total,
            });
        }

        guard.complete(&counts).await?;
        self.store
            .upsert_monitored_folder(self.standard_id, &folder_str, Utc::now())
            .await?;

        let duration_secs = started.elapsed().as_secs_f64();
        info!(
            scan_id,
            scanned = counts.documents_scanned,
            matched = counts.documents_matched,
            added = counts.documents_added,
            updated = counts.documents_updated,
            duration_secs,
            "scan completed"
        );

        Ok(ScanReport {
            scan_id,
            standard_id: self.standard_id,
            folder: self.folder,
            counts,
            extraction_failures: result.extraction_failures,
            unmatched: result.unmatched,
            identity_conflicts,
            duration_secs,
        })
    }
}

/// Applies one file's best match to the store.
pub async fn reconcile_file(
    store: &dyn DocumentStore,
    file: &FileMatches,
    best: &ClauseMatch,
) -> Result<Disposition, StoreError> {
    let Some(hash) = file.content_hash.as_deref() else {
        warn!(file = %file.file_path.display(), "no content hash, not recorded");
        return Ok(Disposition::Skipped);
    };
    let path = file.file_path.display().to_string();
    let now = Utc::now();

    match store.find_document(&file.file_name, best.clause_id).await? {
        None => {
            let doc = store
                .insert_document(
                    &NewDocument {
                        clause_id: best.clause_id,
                        file_name: file.file_name.clone(),
                        file_path: path,
                        content_hash: hash.to_string(),
                        kind: file.kind,
                        match_confidence: best.score,
                        match_reason: best.reason.clone(),
                        revision_notes: format!("Discovered by scan. Match score: {:.2}", best.score),
                    },
                    now,
                )
                .await?;
            debug!(document_id = doc.id, clause = %best.clause_number, file = %file.file_name, "added");
            Ok(Disposition::Added)
        }
        Some(doc) if doc.content_hash == hash => {
            store.touch_document(doc.id, now).await?;
            debug!(document_id = doc.id, file = %file.file_name, "unchanged");
            Ok(Disposition::Unchanged)
        }
        Some(doc) => {
            let revision = store
                .append_revision(
                    doc.id,
                    &ContentUpdate {
                        file_path: path,
                        content_hash: hash.to_string(),
                        match_confidence: best.score,
                        match_reason: best.reason.clone(),
                        notes: format!("Auto-updated by scan. Match score: {:.2}", best.score),
                    },
                    now,
                )
                .await?;
            debug!(
                document_id = doc.id,
                revision = revision.revision_number,
                file = %file.file_name,
                "revised"
            );
            Ok(Disposition::Revised)
        }
    }
}

/// Result of a manual reassignment.
#[derive(Debug, Clone)]
pub enum ReassignOutcome {
    /// The document already belongs to the clause; nothing written.
    Unchanged(Document),
    Reassigned {
        previous_clause_id: i64,
        document: Document,
        correction: Correction,
    },
}

/// Moves a document to another clause on operator instruction.
///
/// Missing document or clause is reported before any write. The document's
/// confidence becomes 1.0; revisions are untouched and the correction row is
/// audit only.
pub async fn reassign_document(
    store: &dyn DocumentStore,
    document_id: i64,
    clause_id: i64,
    reason: Option<&str>,
) -> Result<ReassignOutcome, StoreError> {
    let document = store
        .get_document(document_id)
        .await?
        .ok_or_else(|| StoreError::not_found("document", document_id))?;
    if document.clause_id == clause_id {
        return Ok(ReassignOutcome::Unchanged(document));
    }
    if store.get_clause(clause_id).await?.is_none() {
        return Err(StoreError::not_found("clause", clause_id));
    }

    let reason = reason.map(str::trim).filter(|r| !r.is_empty());
    let match_reason = format!(
        "Manually assigned by user: {}",
        reason.unwrap_or("No reason provided")
    );
    let correction = store
        .reassign_document(
            document_id,
            clause_id,
            reason.unwrap_or(DEFAULT_CORRECTION_REASON),
            &match_reason,
            Utc::now(),
        )
        .await?;
    let updated = store
        .get_document(document_id)
        .await?
        .ok_or_else(|| StoreError::not_found("document", document_id))?;
    info!(document_id, from = document.clause_id, to = clause_id, "document reassigned");

    Ok(ReassignOutcome::Reassigned {
        previous_clause_id: document.clause_id,
        document: updated,
        correction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let locks = ScanLocks::new();
        let folder = Path::new("/docs");
        let guard = locks.try_acquire(1, folder).unwrap();
        assert!(locks.try_acquire(1, folder).is_none());
        assert!(locks.try_acquire(2, folder).is_some());
        assert!(locks.is_held(1, folder));
        drop(guard);
        assert!(!locks.is_held(1, folder));
        assert!(locks.try_acquire(1, folder).is_some());
    }
}
