//! Storage abstraction for clausemap.
//!
//! The [`DocumentStore`] trait is the boundary between the matching and
//! reconciliation pipeline and persisted state. Two backends exist:
//! [`SqliteStore`] for the CLI, and [`InMemoryStore`] for tests and
//! embedding.
//!
//! Implementations must be `Send + Sync`; operations that touch more than
//! one row (document + revision, correction + reassignment) are atomic.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`load_clauses`](DocumentStore::load_clauses) | All clauses of a standard, in clause-number order |
//! | [`find_document`](DocumentStore::find_document) | Identity lookup by `(file_name, clause_id)` |
//! | [`insert_document`](DocumentStore::insert_document) | New document plus its revision 1 |
//! | [`append_revision`](DocumentStore::append_revision) | Next revision plus current-content update |
//! | [`reassign_document`](DocumentStore::reassign_document) | Correction row plus clause change |
//! | [`begin_scan`](DocumentStore::begin_scan) / [`finish_scan`](DocumentStore::finish_scan) | Scan history lifecycle |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    Clause, ClauseCoverage, ContentUpdate, Correction, Document, DocumentRevision,
    DocumentStatus, MonitoredFolder, NewClause, NewDocument, NewStandard, ScanCounts, ScanHistory,
    Standard,
};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a standard. A duplicate name is a [`StoreError::Conflict`].
    async fn insert_standard(&self, standard: &NewStandard) -> StoreResult<Standard>;

    async fn get_standard(&self, id: i64) -> StoreResult<Option<Standard>>;

    async fn find_standard_by_name(&self, name: &str) -> StoreResult<Option<Standard>>;

    async fn list_standards(&self) -> StoreResult<Vec<Standard>>;

    /// Insert a clause, enforcing the parent invariant.
    async fn insert_clause(&self, clause: &NewClause) -> StoreResult<Clause>;

    async fn get_clause(&self, id: i64) -> StoreResult<Option<Clause>>;

    /// All clauses of a standard, ordered by numeric clause-number segments.
    async fn load_clauses(&self, standard_id: i64) -> StoreResult<Vec<Clause>>;

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>>;

    async fn find_document(&self, file_name: &str, clause_id: i64)
        -> StoreResult<Option<Document>>;

    /// Insert an active document together with revision 1.
    async fn insert_document(&self, doc: &NewDocument, at: DateTime<Utc>)
        -> StoreResult<Document>;

    /// Record that an unchanged document was seen by a scan.
    async fn touch_document(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    /// Append revision `max + 1` and make `update` the document's current content.
    async fn append_revision(
        &self,
        id: i64,
        update: &ContentUpdate,
        at: DateTime<Utc>,
    ) -> StoreResult<DocumentRevision>;

    /// Revisions of a document, newest first.
    async fn list_revisions(&self, document_id: i64) -> StoreResult<Vec<DocumentRevision>>;

    async fn set_document_status(&self, id: i64, status: DocumentStatus) -> StoreResult<()>;

    /// Move a document to `clause_id` and write the correction row, atomically.
    ///
    /// Confidence becomes 1.0 and the match reason `match_reason`. Revisions
    /// are untouched.
    async fn reassign_document(
        &self,
        id: i64,
        clause_id: i64,
        reason: &str,
        match_reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Correction>;

    async fn list_corrections(&self, document_id: i64) -> StoreResult<Vec<Correction>>;

    /// Active documents with confidence below `below`, lowest first.
    async fn low_confidence_documents(&self, below: f64, limit: i64)
        -> StoreResult<Vec<Document>>;

    /// Open a `running` scan-history row.
    ///
    /// A `running` row for the same pair younger than `stale_after` is a
    /// [`StoreError::Conflict`].
    async fn begin_scan(
        &self,
        standard_id: i64,
        folder_path: &str,
        at: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> StoreResult<i64>;

    async fn finish_scan(
        &self,
        scan_id: i64,
        counts: &ScanCounts,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn fail_scan(&self, scan_id: i64, error: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// Most recent scans first.
    async fn list_scans(&self, limit: i64) -> StoreResult<Vec<ScanHistory>>;

    async fn upsert_monitored_folder(
        &self,
        standard_id: i64,
        folder_path: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn list_monitored_folders(&self) -> StoreResult<Vec<MonitoredFolder>>;

    /// Every clause of a standard with its active-document count.
    async fn clause_coverage(&self, standard_id: i64) -> StoreResult<Vec<ClauseCoverage>>;
}

/// Duration in fractional seconds between two instants.
pub(crate) fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}
