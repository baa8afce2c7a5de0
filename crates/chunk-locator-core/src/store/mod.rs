//! Storage abstraction for Chunk Locator.
//!
//! The [`Store`] trait covers the three persisted record kinds: documents
//! (with their reference text), cached structural extractions, and
//! positioned chunks. Backends must honor two rules:
//!
//! - deleting a document removes its cached extraction and its chunks;
//! - [`Store::correct_chunk`] reads the chunk and its neighbors and writes
//!   the result atomically, enforcing [`apply_correction`](crate::ledger::apply_correction).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::ledger::{CorrectionRequest, LedgerError, LedgerPolicy};
use crate::models::{CachedExtraction, ChunkRecord, DocumentRecord};

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or update a document |
/// | [`get_document`](Store::get_document) | Fetch a document by ID |
/// | [`delete_document`](Store::delete_document) | Delete a document and everything hanging off it |
/// | [`save_extraction`](Store::save_extraction) | Upsert the cached extraction for a document |
/// | [`load_extraction`](Store::load_extraction) | Fetch the cached extraction for a document |
/// | [`replace_chunks`](Store::replace_chunks) | Replace all chunks for a document |
/// | [`get_chunk`](Store::get_chunk) | Fetch one chunk |
/// | [`list_chunks`](Store::list_chunks) | All chunks of a document, by index |
/// | [`mark_validated`](Store::mark_validated) | Set `position_validated` |
/// | [`correct_chunk`](Store::correct_chunk) | Apply a checked correction |
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>>;

    /// Returns `false` when no such document existed.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn save_extraction(&self, extraction: &CachedExtraction) -> Result<()>;

    async fn load_extraction(&self, document_id: &str) -> Result<Option<CachedExtraction>>;

    async fn replace_chunks(&self, document_id: &str, chunks: &[ChunkRecord]) -> Result<()>;

    async fn get_chunk(&self, id: &str) -> Result<Option<ChunkRecord>>;

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>>;

    async fn mark_validated(&self, chunk_id: &str) -> Result<ChunkRecord, LedgerError>;

    async fn correct_chunk(
        &self,
        chunk_id: &str,
        request: &CorrectionRequest,
        policy: &LedgerPolicy,
    ) -> Result<ChunkRecord, LedgerError>;
}
