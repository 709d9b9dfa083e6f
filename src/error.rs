//! Error types shared by the extraction, storage, and scanning layers.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to pull text out of one file. Never escapes the scanner: it is
/// turned into [`crate::extract::Extraction::Failed`] at the file boundary.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("file is {size} bytes, over the {limit} byte extraction limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a [`crate::store::DocumentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A write would violate an identity constraint (duplicate standard
    /// name, duplicate `(file_name, clause_id)`, concurrent scan).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Errors that stop a scan before or during reconciliation.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("folder does not exist: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("standard not found: {0}")]
    StandardNotFound(i64),

    #[error("a scan of {} for standard {standard_id} is already running", .folder.display())]
    AlreadyRunning { standard_id: i64, folder: PathBuf },

    #[error("invalid scan options: {0}")]
    Options(String),

    #[error("cannot walk {}: {message}", .folder.display())]
    Walk { folder: PathBuf, message: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
