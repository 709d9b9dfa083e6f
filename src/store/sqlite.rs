//! SQLite-backed [`DocumentStore`] implementation.
//!
//! Timestamps are stored as Unix milliseconds. Multi-row operations run in
//! one transaction, and unique-constraint violations surface as
//! [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;
use crate::models::{
    compare_clause_numbers, from_millis, Clause, ClauseCoverage, ContentUpdate, Correction,
    Document, DocumentKind, DocumentRevision, DocumentStatus, MonitoredFolder, NewClause,
    NewDocument, NewStandard, ScanCounts, ScanHistory, ScanStatus, Standard,
};

use super::{elapsed_secs, DocumentStore, StoreResult};

/// SQLite implementation of the [`DocumentStore`] trait.
///
/// Expects the schema from [`crate::migrate::apply_schema`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn conflict_or(err: sqlx::Error, message: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(message());
        }
    }
    StoreError::Database(err)
}

fn to_u64(n: i64) -> u64 {
    n.max(0) as u64
}

fn to_i64(n: u64) -> i64 {
    n.min(i64::MAX as u64) as i64
}

const DOCUMENT_COLUMNS: &str = "id, clause_id, file_name, file_path, content_hash, file_type, \
     status, match_confidence, match_reason, created_at, last_scanned";

const CLAUSE_COLUMNS: &str =
    "id, standard_id, clause_number, title, description, weight, parent_clause_id";

const SCAN_COLUMNS: &str = "id, standard_id, folder_path, started_at, completed_at, status, \
     documents_scanned, documents_matched, documents_added, documents_updated, duration_secs, error";

fn standard_from_row(row: &SqliteRow) -> Standard {
    Standard {
        id: row.get("id"),
        name: row.get("name"),
        version: row.get("version"),
        description: row.get("description"),
    }
}

fn clause_from_row(row: &SqliteRow) -> Clause {
    Clause {
        id: row.get("id"),
        standard_id: row.get("standard_id"),
        clause_number: row.get("clause_number"),
        title: row.get("title"),
        description: row.get("description"),
        weight: row.get("weight"),
        parent_clause_id: row.get("parent_clause_id"),
    }
}

fn document_from_row(row: &SqliteRow) -> StoreResult<Document> {
    let kind: String = row.get("file_type");
    let status: String = row.get("status");
    let last_scanned: Option<i64> = row.get("last_scanned");
    Ok(Document {
        id: row.get("id"),
        clause_id: row.get("clause_id"),
        file_name: row.get("file_name"),
        file_path: row.get("file_path"),
        content_hash: row.get("content_hash"),
        kind: DocumentKind::parse(&kind)
            .ok_or_else(|| StoreError::Invalid(format!("unknown file type '{}'", kind)))?,
        status: DocumentStatus::parse(&status)
            .ok_or_else(|| StoreError::Invalid(format!("unknown document status '{}'", status)))?,
        match_confidence: row.get("match_confidence"),
        match_reason: row.get("match_reason"),
        created_at: from_millis(row.get("created_at")),
        last_scanned: last_scanned.map(from_millis),
    })
}

fn revision_from_row(row: &SqliteRow) -> DocumentRevision {
    DocumentRevision {
        id: row.get("id"),
        document_id: row.get("document_id"),
        revision_number: row.get("revision_number"),
        file_path: row.get("file_path"),
        content_hash: row.get("content_hash"),
        notes: row.get("notes"),
        created_at: from_millis(row.get("created_at")),
    }
}

fn correction_from_row(row: &SqliteRow) -> Correction {
    Correction {
        id: row.get("id"),
        original_document_id: row.get("original_document_id"),
        corrected_document_id: row.get("corrected_document_id"),
        clause_id: row.get("clause_id"),
        reason: row.get("reason"),
        created_at: from_millis(row.get("created_at")),
    }
}

fn scan_from_row(row: &SqliteRow) -> StoreResult<ScanHistory> {
    let status: String = row.get("status");
    let completed_at: Option<i64> = row.get("completed_at");
    Ok(ScanHistory {
        id: row.get("id"),
        standard_id: row.get("standard_id"),
        folder_path: row.get("folder_path"),
        started_at: from_millis(row.get("started_at")),
        completed_at: completed_at.map(from_millis),
        status: ScanStatus::parse(&status)
            .ok_or_else(|| StoreError::Invalid(format!("unknown scan status '{}'", status)))?,
        counts: ScanCounts {
            documents_scanned: to_u64(row.get("documents_scanned")),
            documents_matched: to_u64(row.get("documents_matched")),
            documents_added: to_u64(row.get("documents_added")),
            documents_updated: to_u64(row.get("documents_updated")),
        },
        duration_secs: row.get("duration_secs"),
        error: row.get("error"),
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_standard(&self, standard: &NewStandard) -> StoreResult<Standard> {
        let result =
            sqlx::query("INSERT INTO standards (name, version, description) VALUES (?, ?, ?)")
                .bind(&standard.name)
                .bind(&standard.version)
                .bind(&standard.description)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    conflict_or(e, || format!("standard '{}' already exists", standard.name))
                })?;

        Ok(Standard {
            id: result.last_insert_rowid(),
            name: standard.name.clone(),
            version: standard.version.clone(),
            description: standard.description.clone(),
        })
    }

    async fn get_standard(&self, id: i64) -> StoreResult<Option<Standard>> {
        let row = sqlx::query("SELECT id, name, version, description FROM standards WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(standard_from_row))
    }

    async fn find_standard_by_name(&self, name: &str) -> StoreResult<Option<Standard>> {
        let row =
            sqlx::query("SELECT id, name, version, description FROM standards WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.as_ref().map(standard_from_row))
    }

    async fn list_standards(&self) -> StoreResult<Vec<Standard>> {
        let rows = sqlx::query("SELECT id, name, version, description FROM standards ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(standard_from_row).collect())
    }

    async fn insert_clause(&self, clause: &NewClause) -> StoreResult<Clause> {
        let mut tx = self.pool.begin().await?;

        let standard: Option<i64> = sqlx::query_scalar("SELECT id FROM standards WHERE id = ?")
            .bind(clause.standard_id)
            .fetch_optional(&mut *tx)
            .await?;
        if standard.is_none() {
            return Err(StoreError::not_found("standard", clause.standard_id));
        }

        let parent = match clause.parent_clause_id {
            Some(pid) => sqlx::query(&format!("SELECT {} FROM clauses WHERE id = ?", CLAUSE_COLUMNS))
                .bind(pid)
                .fetch_optional(&mut *tx)
                .await?
                .as_ref()
                .map(clause_from_row),
            None => None,
        };
        clause
            .check_parent(parent.as_ref())
            .map_err(StoreError::Invalid)?;

        let result = sqlx::query(
            r#"
            INSERT INTO clauses (standard_id, clause_number, title, description, weight, parent_clause_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(clause.standard_id)
        .bind(&clause.clause_number)
        .bind(&clause.title)
        .bind(&clause.description)
        .bind(clause.weight)
        .bind(clause.parent_clause_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Clause {
            id: result.last_insert_rowid(),
            standard_id: clause.standard_id,
            clause_number: clause.clause_number.clone(),
            title: clause.title.clone(),
            description: clause.description.clone(),
            weight: clause.weight,
            parent_clause_id: clause.parent_clause_id,
        })
    }

    async fn get_clause(&self, id: i64) -> StoreResult<Option<Clause>> {
        let row = sqlx::query(&format!("SELECT {} FROM clauses WHERE id = ?", CLAUSE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(clause_from_row))
    }

    async fn load_clauses(&self, standard_id: i64) -> StoreResult<Vec<Clause>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM clauses WHERE standard_id = ? ORDER BY id",
            CLAUSE_COLUMNS
        ))
        .bind(standard_id)
        .fetch_all(&self.pool)
        .await?;

        let mut clauses: Vec<Clause> = rows.iter().map(clause_from_row).collect();
        clauses.sort_by(|a, b| compare_clause_numbers(&a.clause_number, &b.clause_number));
        Ok(clauses)
    }

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn find_document(
        &self,
        file_name: &str,
        clause_id: i64,
    ) -> StoreResult<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE file_name = ? AND clause_id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(file_name)
        .bind(clause_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn insert_document(&self, doc: &NewDocument, at: DateTime<Utc>) -> StoreResult<Document> {
        let now = at.timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO documents (clause_id, file_name, file_path, content_hash, file_type,
                                   status, match_confidence, match_reason, created_at, last_scanned)
            VALUES (?, ?, ?, ?, ?, 'active', ?, ?, ?, ?)
            "#,
        )
        .bind(doc.clause_id)
        .bind(&doc.file_name)
        .bind(&doc.file_path)
        .bind(&doc.content_hash)
        .bind(doc.kind.label())
        .bind(doc.match_confidence)
        .bind(&doc.match_reason)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            conflict_or(e, || {
                format!(
                    "document '{}' already exists for clause {}",
                    doc.file_name, doc.clause_id
                )
            })
        })?;
        let id = result.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO document_revisions (document_id, revision_number, file_path, content_hash, notes, created_at)
            VALUES (?, 1, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&doc.file_path)
        .bind(&doc.content_hash)
        .bind(&doc.revision_notes)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Document {
            id,
            clause_id: doc.clause_id,
            file_name: doc.file_name.clone(),
            file_path: doc.file_path.clone(),
            content_hash: doc.content_hash.clone(),
            kind: doc.kind,
            status: DocumentStatus::Active,
            match_confidence: doc.match_confidence,
            match_reason: doc.match_reason.clone(),
            created_at: from_millis(now),
            last_scanned: Some(from_millis(now)),
        })
    }

    async fn touch_document(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE documents SET last_scanned = ? WHERE id = ?")
            .bind(at.timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("document", id));
        }
        Ok(())
    }

    async fn append_revision(
        &self,
        id: i64,
        update: &ContentUpdate,
        at: DateTime<Utc>,
    ) -> StoreResult<DocumentRevision> {
        let now = at.timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE documents
            SET file_path = ?, content_hash = ?, match_confidence = ?, match_reason = ?, last_scanned = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.file_path)
        .bind(&update.content_hash)
        .bind(update.match_confidence)
        .bind(&update.match_reason)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("document", id));
        }

        let latest: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(revision_number), 0) FROM document_revisions WHERE document_id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        let revision_number = latest + 1;

        let result = sqlx::query(
            r#"
            INSERT INTO document_revisions (document_id, revision_number, file_path, content_hash, notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(revision_number)
        .bind(&update.file_path)
        .bind(&update.content_hash)
        .bind(&update.notes)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            conflict_or(e, || {
                format!("revision {} of document {} already exists", revision_number, id)
            })
        })?;

        tx.commit().await?;

        Ok(DocumentRevision {
            id: result.last_insert_rowid(),
            document_id: id,
            revision_number,
            file_path: update.file_path.clone(),
            content_hash: update.content_hash.clone(),
            notes: Some(update.notes.clone()),
            created_at: from_millis(now),
        })
    }

    async fn list_revisions(&self, document_id: i64) -> StoreResult<Vec<DocumentRevision>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, revision_number, file_path, content_hash, notes, created_at
            FROM document_revisions
            WHERE document_id = ?
            ORDER BY revision_number DESC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(revision_from_row).collect())
    }

    async fn set_document_status(&self, id: i64, status: DocumentStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("document", id));
        }
        Ok(())
    }

    async fn reassign_document(
        &self,
        id: i64,
        clause_id: i64,
        reason: &str,
        match_reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Correction> {
        let now = at.timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let clause: Option<i64> = sqlx::query_scalar("SELECT id FROM clauses WHERE id = ?")
            .bind(clause_id)
            .fetch_optional(&mut *tx)
            .await?;
        if clause.is_none() {
            return Err(StoreError::not_found("clause", clause_id));
        }

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET clause_id = ?, match_confidence = 1.0, match_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(clause_id)
        .bind(match_reason)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            conflict_or(e, || {
                format!("document {} would duplicate an existing document in clause {}", id, clause_id)
            })
        })?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("document", id));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO user_corrections (original_document_id, corrected_document_id, clause_id, reason, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(id)
        .bind(clause_id)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Correction {
            id: inserted.last_insert_rowid(),
            original_document_id: id,
            corrected_document_id: id,
            clause_id,
            reason: reason.to_string(),
            created_at: from_millis(now),
        })
    }

    async fn list_corrections(&self, document_id: i64) -> StoreResult<Vec<Correction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, original_document_id, corrected_document_id, clause_id, reason, created_at
            FROM user_corrections
            WHERE corrected_document_id = ?
            ORDER BY id
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(correction_from_row).collect())
    }

    async fn low_confidence_documents(
        &self,
        below: f64,
        limit: i64,
    ) -> StoreResult<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE status = 'active' AND match_confidence < ? \
             ORDER BY match_confidence ASC, id ASC LIMIT ?",
            DOCUMENT_COLUMNS
        ))
        .bind(below)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn begin_scan(
        &self,
        standard_id: i64,
        folder_path: &str,
        at: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> StoreResult<i64> {
        let now = at.timestamp_millis();
        let fresh_since = now - stale_after.num_milliseconds();
        let mut tx = self.pool.begin().await?;

        let running: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scan_history
            WHERE standard_id = ? AND folder_path = ? AND status = 'running' AND started_at >= ?
            "#,
        )
        .bind(standard_id)
        .bind(folder_path)
        .bind(fresh_since)
        .fetch_one(&mut *tx)
        .await?;
        if running > 0 {
            return Err(StoreError::Conflict(format!(
                "scan of {} for standard {} is already running",
                folder_path, standard_id
            )));
        }

        let result = sqlx::query(
            "INSERT INTO scan_history (standard_id, folder_path, started_at, status) VALUES (?, ?, ?, 'running')",
        )
        .bind(standard_id)
        .bind(folder_path)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    async fn finish_scan(
        &self,
        scan_id: i64,
        counts: &ScanCounts,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let started: Option<i64> =
            sqlx::query_scalar("SELECT started_at FROM scan_history WHERE id = ?")
                .bind(scan_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(started) = started else {
            return Err(StoreError::not_found("scan", scan_id));
        };

        sqlx::query(
            r#"
            UPDATE scan_history
            SET status = 'completed', completed_at = ?, documents_scanned = ?, documents_matched = ?,
                documents_added = ?, documents_updated = ?, duration_secs = ?
            WHERE id = ?
            "#,
        )
        .bind(at.timestamp_millis())
        .bind(to_i64(counts.documents_scanned))
        .bind(to_i64(counts.documents_matched))
        .bind(to_i64(counts.documents_added))
        .bind(to_i64(counts.documents_updated))
        .bind(elapsed_secs(from_millis(started), at))
        .bind(scan_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_scan(&self, scan_id: i64, error: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let started: Option<i64> =
            sqlx::query_scalar("SELECT started_at FROM scan_history WHERE id = ?")
                .bind(scan_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(started) = started else {
            return Err(StoreError::not_found("scan", scan_id));
        };

        sqlx::query(
            "UPDATE scan_history SET status = 'failed', completed_at = ?, error = ?, duration_secs = ? WHERE id = ?",
        )
        .bind(at.timestamp_millis())
        .bind(error)
        .bind(elapsed_secs(from_millis(started), at))
        .bind(scan_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_scans(&self, limit: i64) -> StoreResult<Vec<ScanHistory>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM scan_history ORDER BY started_at DESC, id DESC LIMIT ?",
            SCAN_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(scan_from_row).collect()
    }

    async fn upsert_monitored_folder(
        &self,
        standard_id: i64,
        folder_path: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO monitored_folders (standard_id, folder_path, is_active, last_scan)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(standard_id, folder_path) DO UPDATE SET
                last_scan = excluded.last_scan
            "#,
        )
        .bind(standard_id)
        .bind(folder_path)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_monitored_folders(&self) -> StoreResult<Vec<MonitoredFolder>> {
        let rows = sqlx::query(
            "SELECT id, standard_id, folder_path, is_active, last_scan FROM monitored_folders ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let active: i64 = row.get("is_active");
                let last_scan: Option<i64> = row.get("last_scan");
                MonitoredFolder {
                    id: row.get("id"),
                    standard_id: row.get("standard_id"),
                    folder_path: row.get("folder_path"),
                    is_active: active != 0,
                    last_scan: last_scan.map(from_millis),
                }
            })
            .collect())
    }

    async fn clause_coverage(&self, standard_id: i64) -> StoreResult<Vec<ClauseCoverage>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.standard_id, c.clause_number, c.title, c.description, c.weight,
                   c.parent_clause_id,
                   (SELECT COUNT(*) FROM documents d
                    WHERE d.clause_id = c.id AND d.status = 'active') AS active_documents
            FROM clauses c
            WHERE c.standard_id = ?
            "#,
        )
        .bind(standard_id)
        .fetch_all(&self.pool)
        .await?;

        let mut coverage: Vec<ClauseCoverage> = rows
            .iter()
            .map(|row| ClauseCoverage {
                clause: clause_from_row(row),
                active_documents: row.get("active_documents"),
            })
            .collect();
        coverage.sort_by(|a, b| {
            compare_clause_numbers(&a.clause.clause_number, &b.clause.clause_number)
        });
        Ok(coverage)
    }
}
