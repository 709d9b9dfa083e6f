//! Core data models used throughout clausemap.
//!
//! These types represent the clause catalog, the documents matched to it,
//! their revision history, and the bookkeeping rows written by each scan.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// A compliance framework; the root of a clause tree.
#[derive(Debug, Clone, Serialize)]
pub struct Standard {
    pub id: i64,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewStandard {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

/// A requirement node identified by a dotted number such as `6.1.2`.
#[derive(Debug, Clone, Serialize)]
pub struct Clause {
    pub id: i64,
    pub standard_id: i64,
    pub clause_number: String,
    pub title: String,
    pub description: String,
    pub weight: f64,
    pub parent_clause_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewClause {
    pub standard_id: i64,
    pub clause_number: String,
    pub title: String,
    pub description: String,
    pub weight: f64,
    pub parent_clause_id: Option<i64>,
}

impl NewClause {
    /// Checks the parent invariant: same standard, and the parent's number
    /// is a strict dot-prefix of this clause's number.
    pub fn check_parent(&self, parent: Option<&Clause>) -> Result<(), String> {
        if !(self.weight > 0.0) {
            return Err(format!(
                "clause {} has non-positive weight {}",
                self.clause_number, self.weight
            ));
        }
        let Some(parent) = parent else {
            return match self.parent_clause_id {
                Some(id) => Err(format!("parent clause {} does not exist", id)),
                None => Ok(()),
            };
        };
        if parent.standard_id != self.standard_id {
            return Err(format!(
                "parent clause {} belongs to another standard",
                parent.clause_number
            ));
        }
        if !is_strict_dot_prefix(&parent.clause_number, &self.clause_number) {
            return Err(format!(
                "clause {} is not a child of {}",
                self.clause_number, parent.clause_number
            ));
        }
        Ok(())
    }
}

/// True when `prefix` names an ancestor of `number` (`"6.1"` of `"6.1.2"`).
pub fn is_strict_dot_prefix(prefix: &str, number: &str) -> bool {
    !prefix.is_empty()
        && number.len() > prefix.len() + 1
        && number.starts_with(prefix)
        && number.as_bytes()[prefix.len()] == b'.'
}

/// Orders clause numbers by their numeric segments so `4.2` sorts before `10`.
pub fn compare_clause_numbers(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Lifecycle state of a document record. Documents are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Active,
    Superseded,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Active => "active",
            DocumentStatus::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(DocumentStatus::Active),
            "superseded" => Some(DocumentStatus::Superseded),
            _ => None,
        }
    }
}

/// Document kind, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DocumentKind {
    Pdf,
    Word,
    Excel,
    Text,
}

impl DocumentKind {
    /// Case-insensitive lookup; `None` for anything the scanner ignores.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" | "doc" => Some(DocumentKind::Word),
            "xlsx" | "xls" => Some(DocumentKind::Excel),
            "txt" => Some(DocumentKind::Text),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "PDF",
            DocumentKind::Word => "Word",
            DocumentKind::Excel => "Excel",
            DocumentKind::Text => "Text",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "PDF" => Some(DocumentKind::Pdf),
            "Word" => Some(DocumentKind::Word),
            "Excel" => Some(DocumentKind::Excel),
            "Text" => Some(DocumentKind::Text),
            _ => None,
        }
    }
}

/// A file assigned to exactly one clause.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub clause_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub content_hash: String,
    pub kind: DocumentKind,
    pub status: DocumentStatus,
    pub match_confidence: f64,
    pub match_reason: String,
    pub created_at: DateTime<Utc>,
    pub last_scanned: Option<DateTime<Utc>>,
}

/// Fields for a document created by the scanner.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub clause_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub content_hash: String,
    pub kind: DocumentKind,
    pub match_confidence: f64,
    pub match_reason: String,
    pub revision_notes: String,
}

/// New content observed for an existing document.
#[derive(Debug, Clone)]
pub struct ContentUpdate {
    pub file_path: String,
    pub content_hash: String,
    pub match_confidence: f64,
    pub match_reason: String,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRevision {
    pub id: i64,
    pub document_id: i64,
    pub revision_number: i64,
    pub file_path: String,
    pub content_hash: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit row for a manual reassignment. Never read back by the matcher.
#[derive(Debug, Clone, Serialize)]
pub struct Correction {
    pub id: i64,
    pub original_document_id: i64,
    pub corrected_document_id: i64,
    pub clause_id: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
    /// A `running` row nobody finished within the staleness window.
    Abandoned,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            "abandoned" => Some(ScanStatus::Abandoned),
            _ => None,
        }
    }
}

/// Aggregate counts written when a scan completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounts {
    pub documents_scanned: u64,
    pub documents_matched: u64,
    pub documents_added: u64,
    pub documents_updated: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanHistory {
    pub id: i64,
    pub standard_id: i64,
    pub folder_path: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ScanStatus,
    pub counts: ScanCounts,
    pub duration_secs: Option<f64>,
    pub error: Option<String>,
}

impl ScanHistory {
    /// Status as a reader should report it: a `running` row older than
    /// `stale_after` is abandoned.
    pub fn effective_status(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> ScanStatus {
        if self.status == ScanStatus::Running && now - self.started_at > stale_after {
            ScanStatus::Abandoned
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoredFolder {
    pub id: i64,
    pub standard_id: i64,
    pub folder_path: String,
    pub is_active: bool,
    pub last_scan: Option<DateTime<Utc>>,
}

/// Active-document count for one clause, input to compliance scoring.
#[derive(Debug, Clone)]
pub struct ClauseCoverage {
    pub clause: Clause,
    pub active_documents: i64,
}

/// One clause a document matched, with the composite score.
#[derive(Debug, Clone, Serialize)]
pub struct ClauseMatch {
    pub clause_id: i64,
    pub clause_number: String,
    pub score: f64,
    pub reason: String,
}

/// A scanned file and its surviving matches, best first.
#[derive(Debug, Clone, Serialize)]
pub struct FileMatches {
    pub file_path: PathBuf,
    pub file_name: String,
    pub kind: DocumentKind,
    pub content_hash: Option<String>,
    pub matches: Vec<ClauseMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedFile {
    pub file_path: PathBuf,
    pub file_name: String,
}

/// Output of one folder walk.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub documents_scanned: u64,
    pub documents_matched: u64,
    pub total_matches: u64,
    /// Files whose text could not be extracted and were scored on filename only.
    pub extraction_failures: u64,
    pub matches: Vec<FileMatches>,
    pub unmatched: Vec<UnmatchedFile>,
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_prefix_requires_segment_boundary() {
        assert!(is_strict_dot_prefix("6.1", "6.1.2"));
        assert!(is_strict_dot_prefix("6", "6.1.2"));
        assert!(!is_strict_dot_prefix("6.1", "6.1"));
        assert!(!is_strict_dot_prefix("6.1", "6.10"));
        assert!(!is_strict_dot_prefix("", "6.1"));
    }

    #[test]
    fn clause_numbers_sort_numerically() {
        let mut numbers = vec!["10", "4.2", "4", "6.1.2", "4.10", "6.1"];
        numbers.sort_by(|a, b| compare_clause_numbers(a, b));
        assert_eq!(numbers, vec!["4", "4.2", "4.10", "6.1", "6.1.2", "10"]);
    }

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(
            DocumentKind::from_path(Path::new("a/Policy.PDF")),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("Register.Xls")),
            Some(DocumentKind::Excel)
        );
        assert_eq!(DocumentKind::from_path(Path::new("notes.md")), None);
        assert_eq!(DocumentKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn parent_must_share_standard_and_prefix() {
        let parent = Clause {
            id: 1,
            standard_id: 1,
            clause_number: "6.1".into(),
            title: "Actions".into(),
            description: String::new(),
            weight: 1.0,
            parent_clause_id: None,
        };
        let mut child = NewClause {
            standard_id: 1,
            clause_number: "6.1.2".into(),
            title: "Hazards".into(),
            description: String::new(),
            weight: 1.0,
            parent_clause_id: Some(1),
        };
        assert!(child.check_parent(Some(&parent)).is_ok());

        child.clause_number = "7.1".into();
        assert!(child.check_parent(Some(&parent)).is_err());

        child.clause_number = "6.1.2".into();
        child.standard_id = 2;
        assert!(child.check_parent(Some(&parent)).is_err());

        child.standard_id = 1;
        assert!(child.check_parent(None).is_err());
    }

    #[test]
    fn stale_running_scan_reads_as_abandoned() {
        let started = from_millis(1_700_000_000_000);
        let row = ScanHistory {
            id: 1,
            standard_id: 1,
            folder_path: "/docs".into(),
            started_at: started,
            completed_at: None,
            status: ScanStatus::Running,
            counts: ScanCounts::default(),
            duration_secs: None,
            error: None,
        };
        let window = chrono::Duration::seconds(60);
        assert_eq!(
            row.effective_status(started + chrono::Duration::seconds(30), window),
            ScanStatus::Running
        );
        assert_eq!(
            row.effective_status(started + chrono::Duration::seconds(61), window),
            ScanStatus::Abandoned
        );
    }
}
