//! Reconciliation against both store backends: idempotent rescans, revision
//! numbering, best-match-only persistence, same-name files in one scan,
//! scan exclusivity, cancellation, and manual reassignment.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clausemap::catalog::{load_catalog, parse_catalog};
use clausemap::config::Config;
use clausemap::db;
use clausemap::error::{ScanError, StoreError};
use clausemap::migrate::apply_schema;
use clausemap::models::{Clause, DocumentKind, NewDocument, ScanStatus};
use clausemap::progress::{NoProgress, ScanProgressEvent, ScanProgressReporter};
use clausemap::reconcile::{reassign_document, ReassignOutcome, Reconciler};
use clausemap::scanner::{content_hash, ScanOptions};
use clausemap::store::{DocumentStore, InMemoryStore, SqliteStore};
use tempfile::TempDir;

const CATALOG: &str = r#"
[standard]
name = "Test OHS"
version = "1"

[[clauses]]
number = "5"
title = "Leadership"
description = "Top management commitment"
weight = 3.0

[[clauses]]
number = "5.2"
title = "OH&S policy"
description = "Establishing implementing and maintaining policy"
weight = 3.0

[[clauses]]
number = "9.2"
title = "Internal audit"
description = "Conducting internal audits"
weight = 3.5
"#;

struct Fixture {
    store: Arc<dyn DocumentStore>,
    reconciler: Reconciler,
    standard_id: i64,
    clauses: Vec<Clause>,
    // keeps the SQLite file alive
    _db_dir: Option<TempDir>,
}

impl Fixture {
    fn clause(&self, number: &str) -> &Clause {
        self.clauses
            .iter()
            .find(|c| c.clause_number == number)
            .unwrap()
    }
}

async fn fixture_with(store: Arc<dyn DocumentStore>, db_dir: Option<TempDir>) -> Fixture {
    let loaded = load_catalog(store.as_ref(), &parse_catalog(CATALOG).unwrap())
        .await
        .unwrap();
    let reconciler = Reconciler::with_options(
        Arc::clone(&store),
        ScanOptions::from_config(&Config::minimal()),
        chrono::Duration::seconds(3600),
    );
    Fixture {
        store,
        reconciler,
        standard_id: loaded.standard.id,
        clauses: loaded.clauses,
        _db_dir: db_dir,
    }
}

async fn memory_fixture() -> Fixture {
    fixture_with(Arc::new(InMemoryStore::new()), None).await
}

async fn sqlite_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let pool = db::connect_path(&dir.path().join("clausemap.sqlite"))
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();
    fixture_with(Arc::new(SqliteStore::new(pool)), Some(dir)).await
}

fn no_progress() -> Arc<dyn ScanProgressReporter> {
    Arc::new(NoProgress)
}

fn write_docs(dir: &Path) {
    std::fs::write(dir.join("5.2_OHS_Policy.txt"), "Our policy on worker safety.").unwrap();
    std::fs::write(dir.join("9.2_Internal_Audit.txt"), "Audit programme for the year.").unwrap();
    std::fs::write(dir.join("lunch.txt"), "soup bread cheese").unwrap();
    std::fs::write(dir.join("ignored.md"), "not a supported type").unwrap();
}

async fn unchanged_rescan_is_idempotent(fx: Fixture) {
    let docs = TempDir::new().unwrap();
    write_docs(docs.path());

    let first = fx
        .reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap();
    assert_eq!(first.counts.documents_scanned, 3);
    assert_eq!(first.counts.documents_matched, 2);
    assert_eq!(first.counts.documents_added, 2);
    assert_eq!(first.counts.documents_updated, 0);
    assert_eq!(first.unmatched.len(), 1);

    let policy = fx
        .store
        .find_document("5.2_OHS_Policy.txt", fx.clause("5.2").id)
        .await
        .unwrap()
        .expect("policy matched to 5.2");
    let seen_first = policy.last_scanned.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = fx
        .reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap();
    assert_eq!(second.counts.documents_scanned, 3);
    assert_eq!(second.counts.documents_added, 0);
    assert_eq!(second.counts.documents_updated, 0);

    let policy = fx.store.get_document(policy.id).await.unwrap().unwrap();
    assert!(policy.last_scanned.unwrap() > seen_first);
    assert_eq!(fx.store.list_revisions(policy.id).await.unwrap().len(), 1);

    let scans = fx.store.list_scans(10).await.unwrap();
    assert_eq!(scans.len(), 2);
    assert!(scans.iter().all(|s| s.status == ScanStatus::Completed));
    assert_eq!(fx.store.list_monitored_folders().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unchanged_rescan_is_idempotent_in_memory() {
    unchanged_rescan_is_idempotent(memory_fixture().await).await;
}

#[tokio::test]
async fn unchanged_rescan_is_idempotent_sqlite() {
    unchanged_rescan_is_idempotent(sqlite_fixture().await).await;
}

async fn changed_content_appends_one_revision(fx: Fixture) {
    let docs = TempDir::new().unwrap();
    let path = docs.path().join("5.2_OHS_Policy.txt");
    std::fs::write(&path, "Our policy on worker safety.").unwrap();
    fx.reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap();

    let new_content = "Our policy on worker safety. Policy reviewed.";
    std::fs::write(&path, new_content).unwrap();
    let report = fx
        .reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap();
    assert_eq!(report.counts.documents_added, 0);
    assert_eq!(report.counts.documents_updated, 1);

    let doc = fx
        .store
        .find_document("5.2_OHS_Policy.txt", fx.clause("5.2").id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.content_hash, content_hash(new_content.as_bytes()));

    let revisions = fx.store.list_revisions(doc.id).await.unwrap();
    let numbers: Vec<i64> = revisions.iter().map(|r| r.revision_number).collect();
    assert_eq!(numbers, vec![2, 1]);
    assert!(revisions[0]
        .notes
        .as_deref()
        .unwrap()
        .starts_with("Auto-updated by scan. Match score: "));
    assert!(revisions[1]
        .notes
        .as_deref()
        .unwrap()
        .starts_with("Discovered by scan. Match score: "));
    assert_eq!(revisions[0].content_hash, doc.content_hash);
}

#[tokio::test]
async fn changed_content_appends_one_revision_in_memory() {
    changed_content_appends_one_revision(memory_fixture().await).await;
}

#[tokio::test]
async fn changed_content_appends_one_revision_sqlite() {
    changed_content_appends_one_revision(sqlite_fixture().await).await;
}

#[tokio::test]
async fn only_the_best_match_is_persisted() {
    let fx = memory_fixture().await;
    let docs = TempDir::new().unwrap();
    std::fs::write(docs.path().join("5.2_OHS_Policy.txt"), "policy").unwrap();

    fx.reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap();

    // "5" is also contained in the file name, but only 5.2 is recorded
    assert!(fx
        .store
        .find_document("5.2_OHS_Policy.txt", fx.clause("5").id)
        .await
        .unwrap()
        .is_none());
    let doc = fx
        .store
        .find_document("5.2_OHS_Policy.txt", fx.clause("5.2").id)
        .await
        .unwrap()
        .unwrap();
    assert!(doc.match_confidence >= 0.4);
    assert!(doc
        .match_reason
        .starts_with("Matched because filename contains clause number '5.2'"));
}

#[tokio::test]
async fn second_scan_of_same_folder_is_rejected_while_first_runs() {
    let fx = memory_fixture().await;
    let docs = TempDir::new().unwrap();
    write_docs(docs.path());

    let handle = fx
        .reconciler
        .spawn_scan(fx.standard_id, docs.path(), no_progress())
        .unwrap();
    let err = fx
        .reconciler
        .spawn_scan(fx.standard_id, docs.path(), no_progress())
        .unwrap_err();
    assert!(matches!(err, ScanError::AlreadyRunning { .. }));

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.counts.documents_added, 2);

    // the lock is released once the scan finishes
    assert!(fx
        .reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .is_ok());
}

#[tokio::test]
async fn fresh_running_row_from_elsewhere_blocks_the_scan() {
    let fx = memory_fixture().await;
    let docs = TempDir::new().unwrap();
    let canonical = std::fs::canonicalize(docs.path()).unwrap();
    fx.store
        .begin_scan(
            fx.standard_id,
            &canonical.display().to_string(),
            Utc::now(),
            chrono::Duration::seconds(3600),
        )
        .await
        .unwrap();

    let err = fx
        .reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::AlreadyRunning { .. }));
}

#[tokio::test]
async fn missing_folder_fails_before_any_history_row() {
    let fx = memory_fixture().await;
    let err = fx
        .reconciler
        .run_scan(fx.standard_id, Path::new("/no/such/folder"), no_progress())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::FolderNotFound(_)));
    assert!(fx
        .reconciler
        .spawn_scan(fx.standard_id, Path::new("/no/such/folder"), no_progress())
        .is_err());
    assert!(fx.store.list_scans(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_standard_is_reported() {
    let fx = memory_fixture().await;
    let docs = TempDir::new().unwrap();
    let err = fx
        .reconciler
        .run_scan(999, docs.path(), no_progress())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::StandardNotFound(999)));
    assert!(fx.store.list_scans(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_folder_completes_with_zero_counts() {
    let fx = sqlite_fixture().await;
    let docs = TempDir::new().unwrap();
    let report = fx
        .reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap();
    assert_eq!(report.counts.documents_scanned, 0);
    assert_eq!(report.counts.documents_matched, 0);

    let scans = fx.store.list_scans(1).await.unwrap();
    assert_eq!(scans[0].status, ScanStatus::Completed);
    assert_eq!(scans[0].counts.documents_scanned, 0);
    assert!(scans[0].duration_secs.is_some());
}

/// Blocks the scan right after it has opened its history row.
struct PauseOnDiscover {
    started: tokio::sync::mpsc::UnboundedSender<()>,
}

impl ScanProgressReporter for PauseOnDiscover {
    fn report(&self, event: ScanProgressEvent) {
        if let ScanProgressEvent::Discovering { .. } = event {
            let _ = self.started.send(());
            std::thread::sleep(Duration::from_millis(200));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_scan_is_marked_failed() {
    let fx = memory_fixture().await;
    let docs = TempDir::new().unwrap();
    write_docs(docs.path());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = fx
        .reconciler
        .spawn_scan(
            fx.standard_id,
            docs.path(),
            Arc::new(PauseOnDiscover { started: tx }),
        )
        .unwrap();
    rx.recv().await.unwrap();
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    let mut status = None;
    for _ in 0..50 {
        let scans = fx.store.list_scans(1).await.unwrap();
        if scans[0].status != ScanStatus::Running {
            status = Some((scans[0].status, scans[0].error.clone()));
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let (status, error) = status.expect("history row left running");
    assert_eq!(status, ScanStatus::Failed);
    assert_eq!(error.as_deref(), Some("scan cancelled"));
}

async fn reassignment_is_audited(fx: Fixture) {
    let docs = TempDir::new().unwrap();
    std::fs::write(docs.path().join("5.2_OHS_Policy.txt"), "policy").unwrap();
    fx.reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap();
    let doc = fx
        .store
        .find_document("5.2_OHS_Policy.txt", fx.clause("5.2").id)
        .await
        .unwrap()
        .unwrap();

    let err = reassign_document(fx.store.as_ref(), 9999, fx.clause("5").id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "document", .. }));

    let err = reassign_document(fx.store.as_ref(), doc.id, 9999, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "clause", .. }));
    assert!(fx.store.list_corrections(doc.id).await.unwrap().is_empty());

    let outcome = reassign_document(fx.store.as_ref(), doc.id, doc.clause_id, Some("same"))
        .await
        .unwrap();
    assert!(matches!(outcome, ReassignOutcome::Unchanged(_)));
    assert!(fx.store.list_corrections(doc.id).await.unwrap().is_empty());

    let outcome = fx
        .reconciler
        .reassign_document(doc.id, fx.clause("5").id, None)
        .await
        .unwrap();
    let ReassignOutcome::Reassigned {
        previous_clause_id,
        document,
        correction,
    } = outcome
    else {
        panic!("expected a reassignment");
    };
    assert_eq!(previous_clause_id, fx.clause("5.2").id);
    assert_eq!(document.clause_id, fx.clause("5").id);
    assert_eq!(document.match_confidence, 1.0);
    assert_eq!(
        document.match_reason,
        "Manually assigned by user: No reason provided"
    );
    assert_eq!(correction.reason, "Manual reassignment");

    let corrections = fx.store.list_corrections(doc.id).await.unwrap();
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].clause_id, fx.clause("5").id);
    // revisions are untouched by the override path
    assert_eq!(fx.store.list_revisions(doc.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reassignment_is_audited_in_memory() {
    reassignment_is_audited(memory_fixture().await).await;
}

#[tokio::test]
async fn reassignment_is_audited_sqlite() {
    reassignment_is_audited(sqlite_fixture().await).await;
}

#[tokio::test]
async fn superseded_documents_leave_unmatched_review() {
    let fx = sqlite_fixture().await;
    let docs = TempDir::new().unwrap();
    std::fs::write(docs.path().join("5.2_OHS_Policy.txt"), "policy").unwrap();
    fx.reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap();

    let low = fx.store.low_confidence_documents(1.01, 100).await.unwrap();
    assert_eq!(low.len(), 1);

    fx.store
        .set_document_status(low[0].id, clausemap::models::DocumentStatus::Superseded)
        .await
        .unwrap();
    assert!(fx
        .store
        .low_confidence_documents(1.01, 100)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(fx.store.list_revisions(low[0].id).await.unwrap().len(), 1);
}

async fn same_name_in_two_subfolders_stays_idempotent(fx: Fixture) {
    let docs = TempDir::new().unwrap();
    for (site, body) in [
        ("siteA", "Our policy on worker safety."),
        ("siteB", "Site B policy, revised for contractors."),
    ] {
        std::fs::create_dir(docs.path().join(site)).unwrap();
        std::fs::write(docs.path().join(site).join("5.2_policy.txt"), body).unwrap();
    }

    let mut reports = Vec::new();
    for _ in 0..3 {
        reports.push(
            fx.reconciler
                .run_scan(fx.standard_id, docs.path(), no_progress())
                .await
                .unwrap(),
        );
    }

    assert_eq!(reports[0].counts.documents_matched, 2);
    assert_eq!(reports[0].counts.documents_added, 1);
    assert_eq!(reports[0].counts.documents_updated, 0);
    for report in &reports[1..] {
        assert_eq!(report.counts.documents_added, 0);
        assert_eq!(report.counts.documents_updated, 0);
    }
    for report in &reports {
        assert_eq!(report.identity_conflicts.len(), 1);
        let conflict = &report.identity_conflicts[0];
        assert!(conflict.file_path.ends_with("siteB/5.2_policy.txt"));
        assert!(conflict.kept_path.ends_with("siteA/5.2_policy.txt"));
        assert_eq!(conflict.clause_number, "5.2");
    }

    let doc = fx
        .store
        .find_document("5.2_policy.txt", fx.clause("5.2").id)
        .await
        .unwrap()
        .unwrap();
    assert!(doc.file_path.contains("siteA"));
    assert_eq!(
        doc.content_hash,
        content_hash(b"Our policy on worker safety.")
    );
    assert_eq!(fx.store.list_revisions(doc.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn same_name_in_two_subfolders_stays_idempotent_in_memory() {
    same_name_in_two_subfolders_stays_idempotent(memory_fixture().await).await;
}

#[tokio::test]
async fn same_name_in_two_subfolders_stays_idempotent_sqlite() {
    same_name_in_two_subfolders_stays_idempotent(sqlite_fixture().await).await;
}

async fn reassigning_into_an_occupied_slot_conflicts(fx: Fixture) {
    let docs = TempDir::new().unwrap();
    std::fs::write(docs.path().join("5.2_OHS_Policy.txt"), "Our policy on worker safety.").unwrap();
    fx.reconciler
        .run_scan(fx.standard_id, docs.path(), no_progress())
        .await
        .unwrap();
    let doc = fx
        .store
        .find_document("5.2_OHS_Policy.txt", fx.clause("5.2").id)
        .await
        .unwrap()
        .unwrap();

    let occupant = fx
        .store
        .insert_document(
            &NewDocument {
                clause_id: fx.clause("5").id,
                file_name: "5.2_OHS_Policy.txt".to_string(),
                file_path: "/elsewhere/5.2_OHS_Policy.txt".to_string(),
                content_hash: content_hash(b"older copy"),
                kind: DocumentKind::Text,
                match_confidence: 0.5,
                match_reason: "filed by hand".to_string(),
                revision_notes: "imported".to_string(),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let err = reassign_document(fx.store.as_ref(), doc.id, fx.clause("5").id, Some("move"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    assert!(fx.store.list_corrections(doc.id).await.unwrap().is_empty());
    let unchanged = fx.store.get_document(doc.id).await.unwrap().unwrap();
    assert_eq!(unchanged.clause_id, fx.clause("5.2").id);
    assert_eq!(unchanged.match_confidence, doc.match_confidence);
    let occupant = fx.store.get_document(occupant.id).await.unwrap().unwrap();
    assert_eq!(occupant.clause_id, fx.clause("5").id);
}

#[tokio::test]
async fn reassigning_into_an_occupied_slot_conflicts_in_memory() {
    reassigning_into_an_occupied_slot_conflicts(memory_fixture().await).await;
}

#[tokio::test]
async fn reassigning_into_an_occupied_slot_conflicts_sqlite() {
    reassigning_into_an_occupied_slot_conflicts(sqlite_fixture().await).await;
}
