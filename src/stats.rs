//! Database overview, scan history, and monitored folders.
//!
//! `clausemap stats` summarises what is stored; `clausemap history` and
//! `clausemap folders` show scan bookkeeping. History rows are reported with
//! their effective status, so a scan that died mid-run shows as `abandoned`
//! once it is older than `[scan] stale_after_secs`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::catalog::open_store;
use crate::config::Config;
use crate::db;
use crate::store::DocumentStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let standards: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM standards")
        .fetch_one(&pool)
        .await?;
    let clauses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clauses")
        .fetch_one(&pool)
        .await?;
    let active: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE status = 'active'")
            .fetch_one(&pool)
            .await?;
    let superseded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE status = 'superseded'")
            .fetch_one(&pool)
            .await?;
    let revisions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_revisions")
        .fetch_one(&pool)
        .await?;
    let corrections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_corrections")
        .fetch_one(&pool)
        .await?;
    let scans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scan_history")
        .fetch_one(&pool)
        .await?;
    let last_scan: Option<i64> =
        sqlx::query_scalar("SELECT MAX(completed_at) FROM scan_history WHERE status = 'completed'")
            .fetch_one(&pool)
            .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("clausemap database stats");
    println!("========================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Standards:    {}", standards);
    println!("  Clauses:      {}", clauses);
    println!("  Documents:    {} active, {} superseded", active, superseded);
    println!("  Revisions:    {}", revisions);
    println!("  Corrections:  {}", corrections);
    println!("  Scans:        {}", scans);
    println!(
        "  Last scan:    {}",
        match last_scan {
            Some(ms) => format_ts_relative(crate::models::from_millis(ms)),
            None => "never".to_string(),
        }
    );
    println!();

    pool.close().await;
    Ok(())
}

pub async fn run_history(config: &Config, limit: i64) -> Result<()> {
    let store = open_store(config).await?;
    let scans = store.list_scans(limit).await?;
    if scans.is_empty() {
        println!("No scans recorded.");
        return Ok(());
    }
    let names = standard_names(&store).await?;
    let now = Utc::now();
    let stale_after = config.scan.stale_after();

    println!(
        "  {:<5} {:<16} {:<10} {:>7} {:>7} {:>5} {:>7} {:>8}   {}",
        "ID", "STANDARD", "STATUS", "SCANNED", "MATCHED", "ADDED", "UPDATED", "DURATION", "STARTED"
    );
    println!("  {}", "-".repeat(100));
    for scan in &scans {
        let duration = scan
            .duration_secs
            .map(|d| format!("{:.1}s", d))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<5} {:<16} {:<10} {:>7} {:>7} {:>5} {:>7} {:>8}   {}",
            scan.id,
            names
                .get(&scan.standard_id)
                .map(String::as_str)
                .unwrap_or("?"),
            scan.effective_status(now, stale_after).as_str(),
            scan.counts.documents_scanned,
            scan.counts.documents_matched,
            scan.counts.documents_added,
            scan.counts.documents_updated,
            duration,
            format_ts_relative(scan.started_at)
        );
        println!("        {}", scan.folder_path);
        if let Some(error) = &scan.error {
            println!("        error: {}", error);
        }
    }
    Ok(())
}

pub async fn run_folders(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let folders = store.list_monitored_folders().await?;
    if folders.is_empty() {
        println!("No monitored folders. A folder is registered after its first scan.");
        return Ok(());
    }
    let names = standard_names(&store).await?;

    println!("  {:<5} {:<16} {:<8} {:<16}   {}", "ID", "STANDARD", "ACTIVE", "LAST SCAN", "FOLDER");
    for folder in &folders {
        println!(
            "  {:<5} {:<16} {:<8} {:<16}   {}",
            folder.id,
            names
                .get(&folder.standard_id)
                .map(String::as_str)
                .unwrap_or("?"),
            if folder.is_active { "yes" } else { "no" },
            folder
                .last_scan
                .map(format_ts_relative)
                .unwrap_or_else(|| "never".to_string()),
            folder.folder_path
        );
    }
    Ok(())
}

async fn standard_names(store: &dyn DocumentStore) -> Result<HashMap<i64, String>> {
    Ok(store
        .list_standards()
        .await?
        .into_iter()
        .map(|s| (s.id, s.name))
        .collect())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
pub(crate) fn format_ts_relative(ts: DateTime<Utc>) -> String {
    format_relative_to(ts, Utc::now())
}

fn format_relative_to(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub(crate) fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}
