//! JSON inputs for the `locate` stage.
//!
//! The structural extractor and the rewriter are external collaborators.
//! Their output reaches this crate as two JSON files:
//!
//! - a reference file: `{ "text": "...", "mode": "pdf", "structural_chunks": [...] }`
//! - a candidates file: either `[{ "index": 0, "content": "..." }, ...]`
//!   or a plain list of strings, indexed by position.
//!
//! [`JsonFileExtractor`] replays the reference file's structural chunks as
//! a [`StructuralExtractor`], so cache hits and misses behave the same way
//! they would with a real extractor.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use chunk_locator_core::cache::StructuralExtractor;
use chunk_locator_core::models::{
    CandidateChunk, Extraction, ExtractionMode, ReferenceDocument, StructuralChunk,
};

/// Parsed reference file.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceFile {
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mode: ExtractionMode,
    #[serde(default)]
    pub structural_chunks: Vec<StructuralChunk>,
}

impl ReferenceFile {
    pub fn document(&self) -> ReferenceDocument {
        ReferenceDocument {
            text: self.text.clone(),
            structural_chunks: self.structural_chunks.clone(),
        }
    }
}

pub fn read_reference(path: &Path) -> Result<ReferenceFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read reference file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse reference file: {}", path.display()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateEntry {
    Text(String),
    Chunk(CandidateChunk),
}

/// Candidates sorted by index. Indexes must be unique.
pub fn parse_candidates(raw: &str) -> Result<Vec<CandidateChunk>> {
    let entries: Vec<CandidateEntry> = serde_json::from_str(raw)?;
    let mut candidates: Vec<CandidateChunk> = entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| match entry {
            CandidateEntry::Text(content) => CandidateChunk {
                index: position,
                content,
            },
            CandidateEntry::Chunk(chunk) => chunk,
        })
        .collect();

    let mut seen = HashSet::new();
    for c in &candidates {
        if !seen.insert(c.index) {
            bail!("Duplicate candidate index {}", c.index);
        }
    }
    candidates.sort_by_key(|c| c.index);
    Ok(candidates)
}

pub fn read_candidates(path: &Path) -> Result<Vec<CandidateChunk>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read candidates file: {}", path.display()))?;
    parse_candidates(&raw)
        .with_context(|| format!("Failed to parse candidates file: {}", path.display()))
}

/// Replays structural chunks already present in a reference file.
pub struct JsonFileExtractor {
    version: String,
    mode: ExtractionMode,
    chunks: Vec<StructuralChunk>,
}

impl JsonFileExtractor {
    pub fn new(version: impl Into<String>, reference: &ReferenceFile) -> Self {
        Self {
            version: version.into(),
            mode: reference.mode,
            chunks: reference.structural_chunks.clone(),
        }
    }
}

#[async_trait]
impl StructuralExtractor for JsonFileExtractor {
    fn version(&self) -> &str {
        &self.version
    }

    async fn extract(&self, document_id: &str) -> Result<Extraction> {
        tracing::debug!(document_id, chunks = self.chunks.len(), "structural extraction");
        Ok(Extraction {
            mode: self.mode,
            extractor_version: self.version.clone(),
            structural_chunks: self.chunks.clone(),
        })
    }
}
