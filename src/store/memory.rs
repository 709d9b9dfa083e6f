//! In-memory [`DocumentStore`] implementation for tests and embedding.
//!
//! All tables live behind one `std::sync::RwLock`, so every multi-row
//! operation is atomic with respect to other callers.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    compare_clause_numbers, Clause, ClauseCoverage, ContentUpdate, Correction, Document,
    DocumentRevision, DocumentStatus, MonitoredFolder, NewClause, NewDocument, NewStandard,
    ScanCounts, ScanHistory, ScanStatus, Standard,
};

use super::{elapsed_secs, DocumentStore, StoreResult};

#[derive(Default)]
struct Tables {
    standards: Vec<Standard>,
    clauses: Vec<Clause>,
    documents: Vec<Document>,
    revisions: Vec<DocumentRevision>,
    corrections: Vec<Correction>,
    scans: Vec<ScanHistory>,
    folders: Vec<MonitoredFolder>,
}

/// In-memory store. Ids are assigned sequentially per table, starting at 1.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn next_id(len: usize) -> i64 {
    len as i64 + 1
}

impl Tables {
    fn document_mut(&mut self, id: i64) -> StoreResult<&mut Document> {
        self.documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::not_found("document", id))
    }

    fn scan_mut(&mut self, id: i64) -> StoreResult<&mut ScanHistory> {
        self.scans
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::not_found("scan", id))
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert_standard(&self, standard: &NewStandard) -> StoreResult<Standard> {
        let mut t = self.tables.write().unwrap();
        if t.standards.iter().any(|s| s.name == standard.name) {
            return Err(StoreError::Conflict(format!(
                "standard '{}' already exists",
                standard.name
            )));
        }
        let row = Standard {
            id: next_id(t.standards.len()),
            name: standard.name.clone(),
            version: standard.version.clone(),
            description: standard.description.clone(),
        };
        t.standards.push(row.clone());
        Ok(row)
    }

    async fn get_standard(&self, id: i64) -> StoreResult<Option<Standard>> {
        let t = self.tables.read().unwrap();
        Ok(t.standards.iter().find(|s| s.id == id).cloned())
    }

    async fn find_standard_by_name(&self, name: &str) -> StoreResult<Option<Standard>> {
        let t = self.tables.read().unwrap();
        Ok(t.standards.iter().find(|s| s.name == name).cloned())
    }

    async fn list_standards(&self) -> StoreResult<Vec<Standard>> {
        let t = self.tables.read().unwrap();
        let mut out = t.standards.clone();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn insert_clause(&self, clause: &NewClause) -> StoreResult<Clause> {
        let mut t = self.tables.write().unwrap();
        if !t.standards.iter().any(|s| s.id == clause.standard_id) {
            return Err(StoreError::not_found("standard", clause.standard_id));
        }
        let parent = clause
            .parent_clause_id
            .and_then(|pid| t.clauses.iter().find(|c| c.id == pid));
        clause.check_parent(parent).map_err(StoreError::Invalid)?;
        let row = Clause {
            id: next_id(t.clauses.len()),
            standard_id: clause.standard_id,
            clause_number: clause.clause_number.clone(),
            title: clause.title.clone(),
            description: clause.description.clone(),
            weight: clause.weight,
            parent_clause_id: clause.parent_clause_id,
        };
        t.clauses.push(row.clone());
        Ok(row)
    }

    async fn get_clause(&self, id: i64) -> StoreResult<Option<Clause>> {
        let t = self.tables.read().unwrap();
        Ok(t.clauses.iter().find(|c| c.id == id).cloned())
    }

    async fn load_clauses(&self, standard_id: i64) -> StoreResult<Vec<Clause>> {
        let t = self.tables.read().unwrap();
        let mut out: Vec<Clause> = t
            .clauses
            .iter()
            .filter(|c| c.standard_id == standard_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| compare_clause_numbers(&a.clause_number, &b.clause_number));
        Ok(out)
    }

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>> {
        let t = self.tables.read().unwrap();
        Ok(t.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn find_document(
        &self,
        file_name: &str,
        clause_id: i64,
    ) -> StoreResult<Option<Document>> {
        let t = self.tables.read().unwrap();
        Ok(t.documents
            .iter()
            .find(|d| d.file_name == file_name && d.clause_id == clause_id)
            .cloned())
    }

    async fn insert_document(&self, doc: &NewDocument, at: DateTime<Utc>) -> StoreResult<Document> {
        let mut t = self.tables.write().unwrap();
        if !t.clauses.iter().any(|c| c.id == doc.clause_id) {
            return Err(StoreError::not_found("clause", doc.clause_id));
        }
        if t
            .documents
            .iter()
            .any(|d| d.file_name == doc.file_name && d.clause_id == doc.clause_id)
        {
            return Err(StoreError::Conflict(format!(
                "document '{}' already exists for clause {}",
                doc.file_name, doc.clause_id
            )));
        }
        let row = Document {
            id: next_id(t.documents.len()),
            clause_id: doc.clause_id,
            file_name: doc.file_name.clone(),
            file_path: doc.file_path.clone(),
            content_hash: doc.content_hash.clone(),
            kind: doc.kind,
            status: DocumentStatus::Active,
            match_confidence: doc.match_confidence,
            match_reason: doc.match_reason.clone(),
            created_at: at,
            last_scanned: Some(at),
        };
        let revision = DocumentRevision {
            id: next_id(t.revisions.len()),
            document_id: row.id,
            revision_number: 1,
            file_path: doc.file_path.clone(),
            content_hash: doc.content_hash.clone(),
            notes: Some(doc.revision_notes.clone()),
            created_at: at,
        };
        t.documents.push(row.clone());
        t.revisions.push(revision);
        Ok(row)
    }

    async fn touch_document(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut t = self.tables.write().unwrap();
        t.document_mut(id)?.last_scanned = Some(at);
        Ok(())
    }

    async fn append_revision(
        &self,
        id: i64,
        update: &ContentUpdate,
        at: DateTime<Utc>,
    ) -> StoreResult<DocumentRevision> {
        let mut t = self.tables.write().unwrap();
        {
            let doc = t.document_mut(id)?;
            doc.file_path = update.file_path.clone();
            doc.content_hash = update.content_hash.clone();
            doc.match_confidence = update.match_confidence;
            doc.match_reason = update.match_reason.clone();
            doc.last_scanned = Some(at);
        }
        let latest = t
            .revisions
            .iter()
            .filter(|r| r.document_id == id)
            .map(|r| r.revision_number)
            .max()
            .unwrap_or(0);
        let revision = DocumentRevision {
            id: next_id(t.revisions.len()),
            document_id: id,
            revision_number: latest + 1,
            file_path: update.file_path.clone(),
            content_hash: update.content_hash.clone(),
            notes: Some(update.notes.clone()),
            created_at: at,
        };
        t.revisions.push(revision.clone());
        Ok(revision)
    }

    async fn list_revisions(&self, document_id: i64) -> StoreResult<Vec<DocumentRevision>> {
        let t = self.tables.read().unwrap();
        let mut out: Vec<DocumentRevision> = t
            .revisions
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.revision_number.cmp(&a.revision_number));
        Ok(out)
    }

    async fn set_document_status(&self, id: i64, status: DocumentStatus) -> StoreResult<()> {
        let mut t = self.tables.write().unwrap();
        t.document_mut(id)?.status = status;
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
        let mut t = self.tables.write().unwrap();
        if !t.clauses.iter().any(|c| c.id == clause_id) {
            return Err(StoreError::not_found("clause", clause_id));
        }
        let file_name = match t.documents.iter().find(|d| d.id == id) {
            Some(d) => d.file_name.clone(),
            None => return Err(StoreError::not_found("document", id)),
        };
        if t
            .documents
            .iter()
            .any(|d| d.id != id && d.file_name == file_name && d.clause_id == clause_id)
        {
            return Err(StoreError::Conflict(format!(
                "document '{}' already exists for clause {}",
                file_name, clause_id
            )));
        }
        let correction = Correction {
            id: next_id(t.corrections.len()),
            original_document_id: id,
            corrected_document_id: id,
            clause_id,
            reason: reason.to_string(),
            created_at: at,
        };
        t.corrections.push(correction.clone());
        let doc = t.document_mut(id)?;
        doc.clause_id = clause_id;
        doc.match_confidence = 1.0;
        doc.match_reason = match_reason.to_string();
        Ok(correction)
    }

    async fn list_corrections(&self, document_id: i64) -> StoreResult<Vec<Correction>> {
        let t = self.tables.read().unwrap();
        Ok(t.corrections
            .iter()
            .filter(|c| c.corrected_document_id == document_id)
            .cloned()
            .collect())
    }

    async fn low_confidence_documents(
        &self,
        below: f64,
        limit: i64,
    ) -> StoreResult<Vec<Document>> {
        let t = self.tables.read().unwrap();
        let mut out: Vec<Document> = t
            .documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Active && d.match_confidence < below)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.match_confidence.total_cmp(&b.match_confidence));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn begin_scan(
        &self,
        standard_id: i64,
        folder_path: &str,
        at: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> StoreResult<i64> {
        let mut t = self.tables.write().unwrap();
        let busy = t.scans.iter().any(|s| {
            s.standard_id == standard_id
                && s.folder_path == folder_path
                && s.effective_status(at, stale_after) == ScanStatus::Running
        });
        if busy {
            return Err(StoreError::Conflict(format!(
                "scan of {} for standard {} is already running",
                folder_path, standard_id
            )));
        }
        let id = next_id(t.scans.len());
        t.scans.push(ScanHistory {
            id,
            standard_id,
            folder_path: folder_path.to_string(),
            started_at: at,
            completed_at: None,
            status: ScanStatus::Running,
            counts: ScanCounts::default(),
            duration_secs: None,
            error: None,
        });
        Ok(id)
    }

    async fn finish_scan(
        &self,
        scan_id: i64,
        counts: &ScanCounts,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut t = self.tables.write().unwrap();
        let scan = t.scan_mut(scan_id)?;
        scan.status = ScanStatus::Completed;
        scan.counts = *counts;
        scan.completed_at = Some(at);
        scan.duration_secs = Some(elapsed_secs(scan.started_at, at));
        Ok(())
    }

    async fn fail_scan(&self, scan_id: i64, error: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut t = self.tables.write().unwrap();
        let scan = t.scan_mut(scan_id)?;
        scan.status = ScanStatus::Failed;
        scan.error = Some(error.to_string());
        scan.completed_at = Some(at);
        scan.duration_secs = Some(elapsed_secs(scan.started_at, at));
        Ok(())
    }

    async fn list_scans(&self, limit: i64) -> StoreResult<Vec<ScanHistory>> {
        let t = self.tables.read().unwrap();
        Ok(t.scans
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn upsert_monitored_folder(
        &self,
        standard_id: i64,
        folder_path: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut t = self.tables.write().unwrap();
        if let Some(folder) = t
            .folders
            .iter_mut()
            .find(|f| f.standard_id == standard_id && f.folder_path == folder_path)
        {
            folder.last_scan = Some(at);
            return Ok(());
        }
        let id = next_id(t.folders.len());
        t.folders.push(MonitoredFolder {
            id,
            standard_id,
            folder_path: folder_path.to_string(),
            is_active: true,
            last_scan: Some(at),
        });
        Ok(())
    }

    async fn list_monitored_folders(&self) -> StoreResult<Vec<MonitoredFolder>> {
        let t = self.tables.read().unwrap();
        Ok(t.folders.clone())
    }

    async fn clause_coverage(&self, standard_id: i64) -> StoreResult<Vec<ClauseCoverage>> {
        let t = self.tables.read().unwrap();
        let mut out: Vec<ClauseCoverage> = t
            .clauses
            .iter()
            .filter(|c| c.standard_id == standard_id)
            .map(|c| ClauseCoverage {
                clause: c.clone(),
                active_documents: t
                    .documents
                    .iter()
                    .filter(|d| d.clause_id == c.id && d.status == DocumentStatus::Active)
                    .count() as i64,
            })
            .collect();
        out.sort_by(|a, b| compare_clause_numbers(&a.clause.clause_number, &b.clause.clause_number));
        Ok(out)
    }
}
