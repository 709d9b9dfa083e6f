//! `clausemap scan`, `clausemap match`, and `clausemap rescan`.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::catalog::{open_store, resolve_standard};
use crate::config::Config;
use crate::extract::extract_file;
use crate::matcher::{file_stem, score_clauses};
use crate::models::DocumentKind;
use crate::progress::ProgressMode;
use crate::reconcile::{Reconciler, ScanReport};
use crate::scanner::{content_hash, scan_folder, ScanOptions};
use crate::store::DocumentStore;

fn print_report(report: &ScanReport) {
    println!("scan {}", report.folder.display());
    println!("  scan id: {}", report.scan_id);
    println!("  documents scanned: {}", report.counts.documents_scanned);
    println!("  documents matched: {}", report.counts.documents_matched);
    println!("  documents added: {}", report.counts.documents_added);
    println!("  documents updated: {}", report.counts.documents_updated);
    if report.extraction_failures > 0 {
        println!(
            "  extraction failures: {} (scored on file name only)",
            report.extraction_failures
        );
    }
    if !report.unmatched.is_empty() {
        println!("  unmatched files: {}", report.unmatched.len());
        for file in &report.unmatched {
            println!("    {}", file.file_path.display());
        }
    }
    if !report.identity_conflicts.is_empty() {
        println!(
            "  name conflicts: {} (same file name and clause as an earlier file, not recorded)",
            report.identity_conflicts.len()
        );
        for conflict in &report.identity_conflicts {
            println!(
                "    {} (clause {}, kept {})",
                conflict.file_path.display(),
                conflict.clause_number,
                conflict.kept_path.display()
            );
        }
    }
    println!("  duration: {:.2}s", report.duration_secs);
    println!("ok");
}

pub async fn run_scan(
    config: &Config,
    folder: &Path,
    standard_ref: &str,
    dry_run: bool,
    json: bool,
    progress: ProgressMode,
) -> Result<()> {
    let store = Arc::new(open_store(config).await?);
    let standard = resolve_standard(store.as_ref(), standard_ref).await?;

    if dry_run {
        let clauses = store.load_clauses(standard.id).await?;
        let options = ScanOptions::from_config(config);
        let result = scan_folder(folder, &clauses, &options, progress.reporter().as_ref()).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        println!("scan {} (dry-run, standard '{}')", folder.display(), standard.name);
        println!("  documents scanned: {}", result.documents_scanned);
        println!("  documents matched: {}", result.documents_matched);
        println!("  total matches: {}", result.total_matches);
        for file in &result.matches {
            println!("  {}", file.file_path.display());
            for m in &file.matches {
                println!("    {:<8} {:.2}  {}", m.clause_number, m.score, m.reason);
            }
        }
        if !result.unmatched.is_empty() {
            println!("  unmatched:");
            for file in &result.unmatched {
                println!("    {}", file.file_path.display());
            }
        }
        return Ok(());
    }

    let reconciler = Reconciler::new(store, config);
    let report = reconciler
        .run_scan(standard.id, folder, progress.reporter())
        .await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Scores one file against a standard and prints every clause that passes
/// threshold, with the three sub-scores.
pub async fn run_match(config: &Config, file: &Path, standard_ref: &str, json: bool) -> Result<()> {
    let Some(kind) = DocumentKind::from_path(file) else {
        bail!(
            "Unsupported file type: {} (expected pdf, docx, doc, xlsx, xls, or txt)",
            file.display()
        );
    };
    let store = open_store(config).await?;
    let standard = resolve_standard(&store, standard_ref).await?;
    let clauses = store.load_clauses(standard.id).await?;

    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let extraction = extract_file(file, &bytes, config.scan.max_extract_bytes);
    let scored = score_clauses(&file_stem(file), extraction.text(), &clauses, &config.matching);

    if json {
        let rows: Vec<serde_json::Value> = scored
            .iter()
            .map(|s| {
                serde_json::json!({
                    "clause_id": s.clause_id,
                    "clause_number": s.clause_number,
                    "score": s.score(),
                    "containment": s.breakdown.containment,
                    "title": s.breakdown.title,
                    "keywords": s.breakdown.keywords,
                    "reason": s.reason,
                })
            })
            .collect();
        let out = serde_json::json!({
            "file": file.display().to_string(),
            "kind": kind.label(),
            "content_hash": content_hash(&bytes),
            "extraction_failed": extraction.is_failed(),
            "matches": rows,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("match {} ({}) against '{}'", file.display(), kind.label(), standard.name);
    if let crate::extract::Extraction::Failed { reason } = &extraction {
        println!("  extraction failed: {} (file name only)", reason);
    }
    if scored.is_empty() {
        println!(
            "  no clause scored at or above {:.2}",
            config.matching.threshold
        );
        return Ok(());
    }
    println!(
        "  {:<8} {:>6} {:>8} {:>6} {:>8}   {}",
        "CLAUSE", "SCORE", "CONTAIN", "TITLE", "KEYWORDS", "REASON"
    );
    for s in &scored {
        println!(
            "  {:<8} {:>6.3} {:>8.3} {:>6.3} {:>8.3}   {}",
            s.clause_number,
            s.score(),
            s.breakdown.containment,
            s.breakdown.title,
            s.breakdown.keywords,
            s.reason
        );
    }
    Ok(())
}

/// Re-runs every active monitored folder, one after another. A failing
/// folder is reported and the rest still run.
pub async fn run_rescan(config: &Config, progress: ProgressMode) -> Result<()> {
    let store = Arc::new(open_store(config).await?);
    let folders = store.list_monitored_folders().await?;
    let active: Vec<_> = folders.into_iter().filter(|f| f.is_active).collect();
    if active.is_empty() {
        println!("No monitored folders to rescan.");
        return Ok(());
    }

    let reconciler = Reconciler::new(store, config);
    let mut failures = 0usize;
    for folder in &active {
        let path = PathBuf::from(&folder.folder_path);
        match reconciler
            .run_scan(folder.standard_id, &path, progress.reporter())
            .await
        {
            Ok(report) => print_report(&report),
            Err(e) => {
                failures += 1;
                warn!(folder = %folder.folder_path, error = %e, "rescan failed");
                println!("scan {}", folder.folder_path);
                println!("  failed: {}", e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} folders failed to rescan", failures, active.len());
    }
    Ok(())
}
