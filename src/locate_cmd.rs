//! `chunkloc locate`: run the stage for one document from JSON inputs.

use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use chunk_locator_core::models::ConfidenceTier;

use crate::config::Config;
use crate::db;
use crate::extract::{read_candidates, read_reference, JsonFileExtractor};
use crate::migrate;
use crate::pipeline::{locate_document, Assists, LocateInput, LocateReport, StageLimits};
use crate::sqlite_store::SqliteStore;

pub async fn run_locate(
    config: &Config,
    document_id: &str,
    reference_path: &Path,
    candidates_path: &Path,
    title: Option<String>,
) -> Result<()> {
    let reference = read_reference(reference_path)?;
    let candidates = read_candidates(candidates_path)?;

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    let extractor = JsonFileExtractor::new(config.pipeline.extractor_version.clone(), &reference);
    let assists = Assists::from_config(config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling network tiers");
            on_interrupt.cancel();
        }
    });

    let input = LocateInput {
        document_id: document_id.to_string(),
        title: title.or_else(|| reference.title.clone()),
        reference_text: reference.text,
        candidates,
    };
    let outcome = locate_document(
        &store,
        &extractor,
        input,
        &config.matcher,
        &assists,
        StageLimits::from_config(config),
        cancel,
    )
    .await
    .with_context(|| format!("locate failed for document {}", document_id));
    watcher.abort();
    pool.close().await;

    print_report(&outcome?.report);
    Ok(())
}

fn print_report(report: &LocateReport) {
    println!("locate {}", report.document_id);
    println!("  chunks: {}", report.chunks);
    for tier in ConfidenceTier::ALL {
        let n = report.tiers.get(&tier).copied().unwrap_or(0);
        if n > 0 {
            println!("  {}: {}", tier, n);
        }
    }
    println!("  overlap corrected: {}", report.overlap_corrected);
    println!("  with warnings: {}", report.warnings);
    if report.cancelled > 0 {
        println!("  cancelled: {}", report.cancelled);
    }
    println!(
        "  extraction cache: {}",
        if report.cache_hit { "hit" } else { "miss" }
    );
    println!("  elapsed: {} ms", report.elapsed_ms);
    println!("ok");
}
