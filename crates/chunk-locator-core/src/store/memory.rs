//! In-memory [`Store`] implementation for tests and embedding.
//!
//! All state sits behind one `std::sync::RwLock`, so a correction's
//! neighbor check and write happen under a single write lock.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::ledger::{apply_correction, CorrectionRequest, LedgerError, LedgerPolicy};
use crate::models::{CachedExtraction, ChunkRecord, DocumentRecord};

use super::Store;

#[derive(Default)]
struct State {
    docs: HashMap<String, DocumentRecord>,
    extractions: HashMap<String, CachedExtraction>,
    chunks: Vec<ChunkRecord>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

/// Closest chunks before and after `index` within one document.
fn neighbors<'a>(
    chunks: &'a [ChunkRecord],
    document_id: &str,
    index: usize,
) -> (Option<&'a ChunkRecord>, Option<&'a ChunkRecord>) {
    let siblings = chunks.iter().filter(|c| c.document_id == document_id);
    let prev = siblings
        .clone()
        .filter(|c| c.result.chunk_index < index)
        .max_by_key(|c| c.result.chunk_index);
    let next = siblings
        .filter(|c| c.result.chunk_index > index)
        .min_by_key(|c| c.result.chunk_index);
    (prev, next)
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()> {
        let mut state = self.write()?;
        let created_at = state
            .docs
            .get(&doc.id)
            .map(|existing| existing.created_at)
            .unwrap_or(doc.created_at);
        state.docs.insert(
            doc.id.clone(),
            DocumentRecord {
                created_at,
                ..doc.clone()
            },
        );
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.read()?.docs.get(id).cloned())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut state = self.write()?;
        let existed = state.docs.remove(id).is_some();
        state.extractions.remove(id);
        state.chunks.retain(|c| c.document_id != id);
        Ok(existed)
    }

    async fn save_extraction(&self, extraction: &CachedExtraction) -> Result<()> {
        let mut state = self.write()?;
        if !state.docs.contains_key(&extraction.document_id) {
            bail!("unknown document: {}", extraction.document_id);
        }
        let mut row = extraction.clone();
        if let Some(existing) = state.extractions.get(&extraction.document_id) {
            row.created_at = existing.created_at;
        }
        state.extractions.insert(row.document_id.clone(), row);
        Ok(())
    }

    async fn load_extraction(&self, document_id: &str) -> Result<Option<CachedExtraction>> {
        Ok(self.read()?.extractions.get(document_id).cloned())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[ChunkRecord]) -> Result<()> {
        let mut state = self.write()?;
        if !state.docs.contains_key(document_id) {
            bail!("unknown document: {}", document_id);
        }
        state.chunks.retain(|c| c.document_id != document_id);
        state.chunks.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<ChunkRecord>> {
        Ok(self.read()?.chunks.iter().find(|c| c.id == id).cloned())
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let state = self.read()?;
        let mut chunks: Vec<ChunkRecord> = state
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.result.chunk_index);
        Ok(chunks)
    }

    async fn mark_validated(&self, chunk_id: &str) -> Result<ChunkRecord, LedgerError> {
        let mut state = self.write()?;
        let chunk = state
            .chunks
            .iter_mut()
            .find(|c| c.id == chunk_id)
            .ok_or_else(|| LedgerError::NotFound(chunk_id.to_string()))?;
        chunk.result.position_validated = true;
        Ok(chunk.clone())
    }

    async fn correct_chunk(
        &self,
        chunk_id: &str,
        request: &CorrectionRequest,
        policy: &LedgerPolicy,
    ) -> Result<ChunkRecord, LedgerError> {
        let mut state = self.write()?;
        let pos = state
            .chunks
            .iter()
            .position(|c| c.id == chunk_id)
            .ok_or_else(|| LedgerError::NotFound(chunk_id.to_string()))?;

        let mut updated = state.chunks[pos].clone();
        let reference = state
            .docs
            .get(&updated.document_id)
            .map(|d| d.reference_text.as_str())
            .ok_or_else(|| LedgerError::NotFound(updated.document_id.clone()))?;
        let (prev, next) = neighbors(&state.chunks, &updated.document_id, updated.result.chunk_index);
        apply_correction(&mut updated, prev, next, reference, request, policy, Utc::now())?;

        state.chunks[pos] = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{content_hash, ConfidenceTier, Extraction, ExtractionMode, MatchResult};

    const TEXT: &str = "one two three four five six";

    fn doc() -> DocumentRecord {
        DocumentRecord {
            id: "doc".into(),
            title: None,
            reference_text: TEXT.into(),
            content_hash: content_hash(TEXT),
            created_at: 1,
            updated_at: 1,
        }
    }

    fn chunk(id: &str, index: usize, start: usize, end: usize) -> ChunkRecord {
        ChunkRecord {
            id: id.into(),
            document_id: "doc".into(),
            content: TEXT[start..end].into(),
            result: MatchResult::new(index, start, end, ConfidenceTier::Exact, 1.0, "exact"),
        }
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.upsert_document(&doc()).await.unwrap();
        store
            .replace_chunks("doc", &[chunk("c2", 2, 14, 18), chunk("c0", 0, 0, 3), chunk("c1", 1, 4, 7)])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_list_chunks_sorted() {
        let store = seeded().await;
        let ids: Vec<String> = store.list_chunks("doc").await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
    }

    #[tokio::test]
    async fn test_neighbors_by_index() {
        let store = seeded().await;
        let state = store.read().unwrap();
        let (prev, next) = neighbors(&state.chunks, "doc", 1);
        assert_eq!(prev.map(|c| c.id.as_str()), Some("c0"));
        assert_eq!(next.map(|c| c.id.as_str()), Some("c2"));
    }

    #[tokio::test]
    async fn test_correct_chunk_checks_neighbors() {
        let store = seeded().await;
        let policy = LedgerPolicy::default();
        let bad = CorrectionRequest {
            start: 4,
            end: 16,
            reason: "too wide".into(),
        };
        assert!(matches!(
            store.correct_chunk("c1", &bad, &policy).await,
            Err(LedgerError::Overlap { .. })
        ));
        assert_eq!(store.get_chunk("c1").await.unwrap().unwrap().result.offsets(), [4, 7]);

        let good = CorrectionRequest {
            start: 4,
            end: 13,
            reason: "include three".into(),
        };
        let updated = store.correct_chunk("c1", &good, &policy).await.unwrap();
        assert_eq!(updated.result.offsets(), [4, 13]);
        assert!(updated.result.position_corrected);
    }

    #[tokio::test]
    async fn test_mark_validated_unknown() {
        let store = seeded().await;
        assert!(matches!(
            store.mark_validated("missing").await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(store.mark_validated("c0").await.unwrap().result.position_validated);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = seeded().await;
        let extraction = CachedExtraction::new(
            "doc",
            &content_hash(TEXT),
            Extraction {
                mode: ExtractionMode::Markdown,
                extractor_version: "test".into(),
                structural_chunks: Vec::new(),
            },
        );
        store.save_extraction(&extraction).await.unwrap();
        assert!(store.delete_document("doc").await.unwrap());
        assert!(store.load_extraction("doc").await.unwrap().is_none());
        assert!(store.list_chunks("doc").await.unwrap().is_empty());
        assert!(!store.delete_document("doc").await.unwrap());
    }

    #[tokio::test]
    async fn test_chunks_require_document() {
        let store = InMemoryStore::new();
        assert!(store.replace_chunks("nope", &[chunk("c0", 0, 0, 3)]).await.is_err());
    }
}
