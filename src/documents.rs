//! Document review commands: low-confidence list, revision history,
//! manual reassignment, and superseding.

use anyhow::{bail, Result};

use crate::catalog::open_store;
use crate::config::Config;
use crate::error::StoreError;
use crate::models::DocumentStatus;
use crate::reconcile::{reassign_document, ReassignOutcome};
use crate::stats::format_ts_iso;
use crate::store::DocumentStore;

pub async fn run_unmatched(config: &Config, below: f64, limit: i64) -> Result<()> {
    let store = open_store(config).await?;
    let documents = store.low_confidence_documents(below, limit).await?;
    if documents.is_empty() {
        println!("No active documents below {:.2} confidence.", below);
        return Ok(());
    }

    println!("  {:<6} {:<8} {:>10}   {}", "ID", "CLAUSE", "CONFIDENCE", "FILE");
    for doc in &documents {
        let clause = store
            .get_clause(doc.clause_id)
            .await?
            .map(|c| c.clause_number)
            .unwrap_or_else(|| doc.clause_id.to_string());
        println!(
            "  {:<6} {:<8} {:>10.2}   {}",
            doc.id, clause, doc.match_confidence, doc.file_path
        );
        println!("         {}", doc.match_reason);
    }
    Ok(())
}

pub async fn run_revisions(config: &Config, document_id: i64) -> Result<()> {
    let store = open_store(config).await?;
    let Some(doc) = store.get_document(document_id).await? else {
        bail!("Document not found: {}", document_id);
    };
    let revisions = store.list_revisions(document_id).await?;

    println!("{} (document {}, {})", doc.file_name, doc.id, doc.status.as_str());
    println!("  current hash: {}", doc.content_hash);
    for rev in &revisions {
        println!(
            "  rev {:<4} {}  {}",
            rev.revision_number,
            format_ts_iso(rev.created_at),
            rev.file_path
        );
        if let Some(notes) = &rev.notes {
            println!("           {}", notes);
        }
    }

    let corrections = store.list_corrections(document_id).await?;
    if !corrections.is_empty() {
        println!("  corrections:");
        for correction in &corrections {
            println!(
                "    {}  -> clause {}  ({})",
                format_ts_iso(correction.created_at),
                correction.clause_id,
                correction.reason
            );
        }
    }
    Ok(())
}

pub async fn run_reassign(
    config: &Config,
    document_id: i64,
    clause_id: i64,
    reason: Option<&str>,
) -> Result<()> {
    let store = open_store(config).await?;
    match reassign_document(&store, document_id, clause_id, reason).await {
        Ok(ReassignOutcome::Unchanged(doc)) => {
            println!(
                "Document {} already belongs to clause {}; nothing to do.",
                doc.id, doc.clause_id
            );
            Ok(())
        }
        Ok(ReassignOutcome::Reassigned {
            previous_clause_id,
            document,
            correction,
        }) => {
            println!(
                "Document {} moved from clause {} to clause {} (correction {}).",
                document.id, previous_clause_id, document.clause_id, correction.id
            );
            Ok(())
        }
        Err(StoreError::NotFound { entity, id }) => {
            bail!("{} not found: {}", entity, id)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn run_supersede(config: &Config, document_id: i64) -> Result<()> {
    let store = open_store(config).await?;
    store
        .set_document_status(document_id, DocumentStatus::Superseded)
        .await?;
    println!("Document {} marked superseded.", document_id);
    Ok(())
}
