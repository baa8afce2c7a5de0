//! Review commands: `show`, `validate`, `correct`, `forget`.

use anyhow::{bail, Result};

use chunk_locator_core::ledger::{self, CorrectionRequest, LedgerError};
use chunk_locator_core::models::ChunkRecord;
use chunk_locator_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    Ok(SqliteStore::new(pool))
}

pub async fn run_show(config: &Config, document_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let Some(doc) = store.get_document(document_id).await? else {
        bail!("document not found: {}", document_id);
    };
    let chunks = store.list_chunks(document_id).await?;

    println!("{}", doc.id);
    if let Some(title) = &doc.title {
        println!("  title: {}", title);
    }
    println!("  reference: {} bytes, sha256 {}", doc.reference_text.len(), doc.content_hash);
    println!("  chunks: {}", chunks.len());
    println!();
    for chunk in &chunks {
        println!("{}", format_chunk(chunk));
    }
    store.pool().close().await;
    Ok(())
}

fn format_chunk(chunk: &ChunkRecord) -> String {
    let r = &chunk.result;
    let mut flags = Vec::new();
    if r.overlap_corrected {
        flags.push("overlap");
    }
    if r.position_corrected {
        flags.push("corrected");
    }
    if r.position_validated {
        flags.push("validated");
    }
    let mut line = format!(
        "#{:<4} [{}, {})  {} {:.2}  {}  {}",
        r.chunk_index,
        r.start_offset,
        r.end_offset,
        r.confidence_tier,
        r.confidence_score,
        r.method,
        chunk.id
    );
    if let (Some(start), Some(end)) = (r.page_start, r.page_end) {
        line.push_str(&format!("  p.{}-{}", start, end));
    }
    if let Some(path) = &r.heading_path {
        line.push_str(&format!("  {}", path.join(" > ")));
    }
    if !flags.is_empty() {
        line.push_str(&format!("  ({})", flags.join(", ")));
    }
    if let Some(w) = &r.validation_warning {
        line.push_str(&format!("\n      warning: {}", w));
    }
    line
}

pub async fn run_validate(config: &Config, chunk_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let record = ledger::validate(&store, chunk_id).await?;
    println!("validated {} [{}, {})", record.id, record.result.start_offset, record.result.end_offset);
    store.pool().close().await;
    Ok(())
}

pub async fn run_correct(
    config: &Config,
    chunk_id: &str,
    start: usize,
    end: usize,
    reason: &str,
) -> Result<()> {
    let store = open_store(config).await?;
    let request = CorrectionRequest {
        start,
        end,
        reason: reason.to_string(),
    };
    let result = ledger::correct(&store, chunk_id, &request, &config.ledger_policy()).await;
    store.pool().close().await;

    match result {
        Ok(record) => {
            println!(
                "corrected {} -> [{}, {})",
                record.id, record.result.start_offset, record.result.end_offset
            );
            println!("  history: {} entries", record.result.correction_history.len());
            Ok(())
        }
        Err(LedgerError::Overlap {
            neighbor_id,
            neighbor_index,
            neighbor_start,
            neighbor_end,
            side,
        }) => bail!(
            "correction rejected: overlaps {} chunk #{} ({}) at [{}, {})",
            side,
            neighbor_index,
            neighbor_id,
            neighbor_start,
            neighbor_end
        ),
        Err(e) => Err(e.into()),
    }
}

pub async fn run_forget(config: &Config, document_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let removed = store.delete_document(document_id).await?;
    store.pool().close().await;
    if !removed {
        bail!("document not found: {}", document_id);
    }
    println!("forgot {}", document_id);
    Ok(())
}
