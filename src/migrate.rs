use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS standards (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        version TEXT,
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS clauses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        standard_id INTEGER NOT NULL,
        clause_number TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        weight REAL NOT NULL DEFAULT 1.0,
        parent_clause_id INTEGER,
        FOREIGN KEY (standard_id) REFERENCES standards(id),
        FOREIGN KEY (parent_clause_id) REFERENCES clauses(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        clause_id INTEGER NOT NULL,
        file_name TEXT NOT NULL,
        file_path TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        file_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        match_confidence REAL NOT NULL DEFAULT 0.0,
        match_reason TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        last_scanned INTEGER,
        UNIQUE(file_name, clause_id),
        FOREIGN KEY (clause_id) REFERENCES clauses(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_revisions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id INTEGER NOT NULL,
        revision_number INTEGER NOT NULL,
        file_path TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        notes TEXT,
        created_at INTEGER NOT NULL,
        UNIQUE(document_id, revision_number),
        FOREIGN KEY (document_id) REFERENCES documents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scan_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        standard_id INTEGER NOT NULL,
        folder_path TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        completed_at INTEGER,
        status TEXT NOT NULL,
        documents_scanned INTEGER NOT NULL DEFAULT 0,
        documents_matched INTEGER NOT NULL DEFAULT 0,
        documents_added INTEGER NOT NULL DEFAULT 0,
        documents_updated INTEGER NOT NULL DEFAULT 0,
        duration_secs REAL,
        error TEXT,
        FOREIGN KEY (standard_id) REFERENCES standards(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_corrections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        original_document_id INTEGER NOT NULL,
        corrected_document_id INTEGER NOT NULL,
        clause_id INTEGER NOT NULL,
        reason TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (original_document_id) REFERENCES documents(id),
        FOREIGN KEY (clause_id) REFERENCES clauses(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS monitored_folders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        standard_id INTEGER NOT NULL,
        folder_path TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        last_scan INTEGER,
        UNIQUE(standard_id, folder_path),
        FOREIGN KEY (standard_id) REFERENCES standards(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_clauses_standard_id ON clauses(standard_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_clause_id ON documents(clause_id)",
    "CREATE INDEX IF NOT EXISTS idx_revisions_document_id ON document_revisions(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_scan_history_started_at ON scan_history(started_at DESC)",
];

/// Creates every table and index on an open pool. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}
