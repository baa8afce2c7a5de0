//! SQLite-backed [`Store`] implementation.
//!
//! Nested fields of a [`MatchResult`] (heading path, bounding boxes,
//! validation details, correction history) are stored as JSON text
//! columns; everything else maps to a plain column. Deletes rely on the
//! `ON DELETE CASCADE` foreign keys set up in [`crate::migrate`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use chunk_locator_core::ledger::{apply_correction, CorrectionRequest, LedgerError, LedgerPolicy};
use chunk_locator_core::models::{
    CachedExtraction, ChunkRecord, ConfidenceTier, DocumentRecord, ExtractionMode, MatchResult,
};
use chunk_locator_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, content, start_offset, end_offset, \
    confidence_tier, confidence_score, method, heading_path_json, heading_level, section_marker, \
    page_start, page_end, bounding_boxes_json, overlap_corrected, validation_warning, \
    validation_details_json, position_validated, position_corrected, correction_history_json, \
    context_before, context_after";

fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.into())
}

fn to_json_opt<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(Into::into))
        .transpose()
}

fn from_json_opt<T: DeserializeOwned>(text: Option<String>, column: &str) -> Result<Option<T>> {
    text.map(|t| serde_json::from_str(&t).with_context(|| format!("Invalid JSON in {}", column)))
        .transpose()
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("Invalid timestamp: {}", text))?
        .with_timezone(&Utc))
}

fn chunk_from_row(row: &SqliteRow) -> Result<ChunkRecord> {
    let tier: String = row.get("confidence_tier");
    let confidence_tier =
        ConfidenceTier::parse(&tier).ok_or_else(|| anyhow!("Unknown confidence tier: {}", tier))?;
    let history: String = row.get("correction_history_json");

    let result = MatchResult {
        chunk_index: row.get::<i64, _>("chunk_index") as usize,
        start_offset: row.get::<i64, _>("start_offset") as usize,
        end_offset: row.get::<i64, _>("end_offset") as usize,
        confidence_tier,
        confidence_score: row.get("confidence_score"),
        method: row.get("method"),
        heading_path: from_json_opt(row.get("heading_path_json"), "heading_path_json")?,
        heading_level: row.get("heading_level"),
        section_marker: row.get("section_marker"),
        page_start: row.get("page_start"),
        page_end: row.get("page_end"),
        bounding_boxes: from_json_opt(row.get("bounding_boxes_json"), "bounding_boxes_json")?,
        overlap_corrected: row.get("overlap_corrected"),
        validation_warning: row.get("validation_warning"),
        validation_details: from_json_opt(
            row.get("validation_details_json"),
            "validation_details_json",
        )?,
        position_validated: row.get("position_validated"),
        position_corrected: row.get("position_corrected"),
        correction_history: serde_json::from_str(&history)
            .context("Invalid JSON in correction_history_json")?,
        context_before: row.get("context_before"),
        context_after: row.get("context_after"),
    };

    Ok(ChunkRecord {
        id: row.get("id"),
        document_id: row.get("document_id"),
        content: row.get("content"),
        result,
    })
}

fn document_from_row(row: &SqliteRow) -> DocumentRecord {
    DocumentRecord {
        id: row.get("id"),
        title: row.get("title"),
        reference_text: row.get("reference_text"),
        content_hash: row.get("content_hash"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

async fn fetch_chunk<'e, E>(executor: E, sql_where: &str, binds: &[&str]) -> Result<Option<ChunkRecord>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let sql = format!("SELECT {} FROM chunks WHERE {}", CHUNK_COLUMNS, sql_where);
    let mut query = sqlx::query(&sql);
    for b in binds {
        query = query.bind(*b);
    }
    query
        .fetch_optional(executor)
        .await?
        .map(|row| chunk_from_row(&row))
        .transpose()
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, reference_text, content_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                reference_text = excluded.reference_text,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.reference_text)
        .bind(&doc.content_hash)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT id, title, reference_text, content_hash, created_at, updated_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_extraction(&self, extraction: &CachedExtraction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cached_extractions (document_id, mode, markdown_hash, extractor_version,
                                            structural_chunks_json, structure_summary_json,
                                            created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                mode = excluded.mode,
                markdown_hash = excluded.markdown_hash,
                extractor_version = excluded.extractor_version,
                structural_chunks_json = excluded.structural_chunks_json,
                structure_summary_json = excluded.structure_summary_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&extraction.document_id)
        .bind(extraction.mode.as_str())
        .bind(&extraction.markdown_hash)
        .bind(&extraction.extractor_version)
        .bind(serde_json::to_string(&extraction.structural_chunks)?)
        .bind(serde_json::to_string(&extraction.structure_summary)?)
        .bind(extraction.created_at.to_rfc3339())
        .bind(extraction.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_extraction(&self, document_id: &str) -> Result<Option<CachedExtraction>> {
        let row = sqlx::query(
            r#"
            SELECT document_id, mode, markdown_hash, extractor_version, structural_chunks_json,
                   structure_summary_json, created_at, updated_at
            FROM cached_extractions WHERE document_id = ?
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mode: String = row.get("mode");
        let chunks: String = row.get("structural_chunks_json");
        let summary: String = row.get("structure_summary_json");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        Ok(Some(CachedExtraction {
            document_id: row.get("document_id"),
            mode: ExtractionMode::parse(&mode)
                .ok_or_else(|| anyhow!("Unknown extraction mode: {}", mode))?,
            markdown_hash: row.get("markdown_hash"),
            extractor_version: row.get("extractor_version"),
            structural_chunks: serde_json::from_str(&chunks)
                .context("Invalid JSON in structural_chunks_json")?,
            structure_summary: serde_json::from_str(&summary)
                .context("Invalid JSON in structure_summary_json")?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        }))
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let r = &chunk.result;
            sqlx::query(&format!(
                "INSERT INTO chunks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                CHUNK_COLUMNS
            ))
            .bind(&chunk.id)
            .bind(document_id)
            .bind(r.chunk_index as i64)
            .bind(&chunk.content)
            .bind(r.start_offset as i64)
            .bind(r.end_offset as i64)
            .bind(r.confidence_tier.as_str())
            .bind(r.confidence_score)
            .bind(&r.method)
            .bind(to_json_opt(&r.heading_path)?)
            .bind(r.heading_level)
            .bind(&r.section_marker)
            .bind(r.page_start)
            .bind(r.page_end)
            .bind(to_json_opt(&r.bounding_boxes)?)
            .bind(r.overlap_corrected)
            .bind(&r.validation_warning)
            .bind(to_json_opt(&r.validation_details)?)
            .bind(r.position_validated)
            .bind(r.position_corrected)
            .bind(serde_json::to_string(&r.correction_history)?)
            .bind(&r.context_before)
            .bind(&r.context_after)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<ChunkRecord>> {
        fetch_chunk(&self.pool, "id = ?", &[id]).await
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
            CHUNK_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn mark_validated(&self, chunk_id: &str) -> Result<ChunkRecord, LedgerError> {
        let updated = sqlx::query("UPDATE chunks SET position_validated = 1 WHERE id = ?")
            .bind(chunk_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::NotFound(chunk_id.to_string()));
        }
        self.get_chunk(chunk_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(chunk_id.to_string()))
    }

    async fn correct_chunk(
        &self,
        chunk_id: &str,
        request: &CorrectionRequest,
        policy: &LedgerPolicy,
    ) -> Result<ChunkRecord, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let mut chunk = fetch_chunk(&mut *tx, "id = ?", &[chunk_id])
            .await?
            .ok_or_else(|| LedgerError::NotFound(chunk_id.to_string()))?;

        let reference: String =
            sqlx::query_scalar("SELECT reference_text FROM documents WHERE id = ?")
                .bind(&chunk.document_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?
                .ok_or_else(|| LedgerError::NotFound(chunk.document_id.clone()))?;

        let index = chunk.result.chunk_index.to_string();
        let prev = fetch_chunk(
            &mut *tx,
            "document_id = ? AND chunk_index < CAST(? AS INTEGER) ORDER BY chunk_index DESC LIMIT 1",
            &[chunk.document_id.as_str(), index.as_str()],
        )
        .await?;
        let next = fetch_chunk(
            &mut *tx,
            "document_id = ? AND chunk_index > CAST(? AS INTEGER) ORDER BY chunk_index ASC LIMIT 1",
            &[chunk.document_id.as_str(), index.as_str()],
        )
        .await?;

        apply_correction(
            &mut chunk,
            prev.as_ref(),
            next.as_ref(),
            &reference,
            request,
            policy,
            Utc::now(),
        )?;

        let r = &chunk.result;
        sqlx::query(
            r#"
            UPDATE chunks SET
                start_offset = ?,
                end_offset = ?,
                position_validated = ?,
                position_corrected = ?,
                correction_history_json = ?,
                context_before = ?,
                context_after = ?
            WHERE id = ?
            "#,
        )
        .bind(r.start_offset as i64)
        .bind(r.end_offset as i64)
        .bind(r.position_validated)
        .bind(r.position_corrected)
        .bind(serde_json::to_string(&r.correction_history).map_err(anyhow::Error::from)?)
        .bind(&r.context_before)
        .bind(&r.context_after)
        .bind(chunk_id)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(chunk)
    }
}
