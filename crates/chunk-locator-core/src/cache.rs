//! Hash-validated cache of structural extractions.
//!
//! Structural extraction of the original document is the slowest step of
//! the stage, so its output is stored per document together with the
//! SHA-256 of the reference text it was produced for. A cached row is only
//! replayed when that hash still matches. Cache failures never fail the
//! stage: a failed write is logged, a failed read is a miss.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CachedExtraction, Extraction};
use crate::store::Store;

/// Produces structural chunks for a document. External collaborator.
#[async_trait]
pub trait StructuralExtractor: Send + Sync {
    /// Version tag stored alongside cached output. Rows written by another
    /// version are not replayed.
    fn version(&self) -> &str;

    async fn extract(&self, document_id: &str) -> Result<Extraction>;
}

/// Cache facade over a [`Store`].
pub struct ExtractionCache<'a> {
    store: &'a dyn Store,
}

impl<'a> ExtractionCache<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Upsert the extraction for `document_id`. Errors are logged and
    /// swallowed.
    pub async fn save(&self, document_id: &str, markdown_hash: &str, extraction: &Extraction) {
        let row = CachedExtraction::new(document_id, markdown_hash, extraction.clone());
        match self.store.save_extraction(&row).await {
            Ok(()) => tracing::debug!(
                document_id,
                chunks = row.structure_summary.chunk_count,
                "cached structural extraction"
            ),
            Err(e) => tracing::warn!(document_id, error = %e, "failed to cache structural extraction"),
        }
    }

    /// The cached extraction when its stored hash equals `expected_hash`.
    pub async fn load(&self, document_id: &str, expected_hash: &str) -> Option<CachedExtraction> {
        match self.store.load_extraction(document_id).await {
            Ok(Some(row)) if row.markdown_hash == expected_hash => Some(row),
            Ok(Some(row)) => {
                tracing::info!(
                    document_id,
                    cached = %row.markdown_hash,
                    expected = %expected_hash,
                    "cached extraction is stale"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(document_id, error = %e, "failed to read cached extraction");
                None
            }
        }
    }

    /// Cached extraction when its hash and extractor version both match,
    /// otherwise a fresh one from `extractor` (which is then cached). The
    /// flag reports a cache hit.
    pub async fn load_or_extract(
        &self,
        document_id: &str,
        expected_hash: &str,
        extractor: &dyn StructuralExtractor,
    ) -> Result<(Extraction, bool)> {
        if let Some(row) = self.load(document_id, expected_hash).await {
            if row.extractor_version == extractor.version() {
                let extraction = Extraction {
                    mode: row.mode,
                    extractor_version: row.extractor_version,
                    structural_chunks: row.structural_chunks,
                };
                return Ok((extraction, true));
            }
            tracing::info!(
                document_id,
                cached = %row.extractor_version,
                current = %extractor.version(),
                "cached extraction came from another extractor version"
            );
        }
        let extraction = extractor.extract(document_id).await?;
        self.save(document_id, expected_hash, &extraction).await;
        Ok((extraction, false))
    }
}
