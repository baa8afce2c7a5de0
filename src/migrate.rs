//! Schema creation. Every statement is idempotent.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables and indexes on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT,
            reference_text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cached_extractions (
            document_id TEXT PRIMARY KEY,
            mode TEXT NOT NULL,
            markdown_hash TEXT NOT NULL,
            extractor_version TEXT NOT NULL,
            structural_chunks_json TEXT NOT NULL,
            structure_summary_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            confidence_tier TEXT NOT NULL,
            confidence_score REAL NOT NULL,
            method TEXT NOT NULL,
            heading_path_json TEXT,
            heading_level INTEGER,
            section_marker TEXT,
            page_start INTEGER,
            page_end INTEGER,
            bounding_boxes_json TEXT,
            overlap_corrected INTEGER NOT NULL DEFAULT 0,
            validation_warning TEXT,
            validation_details_json TEXT,
            position_validated INTEGER NOT NULL DEFAULT 0,
            position_corrected INTEGER NOT NULL DEFAULT 0,
            correction_history_json TEXT NOT NULL DEFAULT '[]',
            context_before TEXT,
            context_after TEXT,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_tier ON chunks(document_id, confidence_tier)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
