//! Core data models used throughout Chunk Locator.
//!
//! These types describe the reference document produced by the structural
//! extractor, the candidate chunks produced by the rewriter, and the
//! positioned results that flow through the matcher, resolver, projector,
//! and correction ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A `[start, end)` byte range into the reference text.
pub type Offsets = [usize; 2];

/// A bounding box on a rendered page, in page coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A chunk produced by the structural extractor over the original document.
///
/// Every metadata field is optional: paginated documents carry pages and
/// boxes, EPUB-style documents carry section markers instead. Extractors
/// that know where the chunk sits in the reference text may supply
/// `start_offset`/`end_offset`; otherwise the projector locates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralChunk {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_path: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_boxes: Option<Vec<BBox>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<usize>,
}

/// The reference text plus the structural chunks extracted from the
/// original document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDocument {
    pub text: String,
    #[serde(default)]
    pub structural_chunks: Vec<StructuralChunk>,
}

impl ReferenceDocument {
    pub fn content_hash(&self) -> String {
        content_hash(&self.text)
    }
}

/// SHA-256 of `text`, hex encoded. Used as the cache validation key.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// A segment produced by the rewriting step, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateChunk {
    pub index: usize,
    pub content: String,
}

/// How a chunk's position was obtained, from most to least trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Exact,
    Fuzzy,
    Semantic,
    AiAssisted,
    Synthetic,
}

impl ConfidenceTier {
    pub const ALL: [ConfidenceTier; 5] = [
        Self::Exact,
        Self::Fuzzy,
        Self::Semantic,
        Self::AiAssisted,
        Self::Synthetic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Semantic => "semantic",
            Self::AiAssisted => "ai_assisted",
            Self::Synthetic => "synthetic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// One step less trustworthy. `Synthetic` is the floor.
    pub fn downgrade(self) -> Self {
        match self {
            Self::Exact => Self::Fuzzy,
            Self::Fuzzy => Self::Semantic,
            Self::Semantic => Self::AiAssisted,
            Self::AiAssisted | Self::Synthetic => Self::Synthetic,
        }
    }

    /// Highest confidence score a result in this tier may carry.
    pub fn score_ceiling(self) -> f64 {
        match self {
            Self::Exact => 1.0,
            Self::Fuzzy => 0.99,
            Self::Semantic => 0.75,
            Self::AiAssisted => 0.5,
            Self::Synthetic => SYNTHETIC_CONFIDENCE,
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed confidence of a proportionally estimated position.
pub const SYNTHETIC_CONFIDENCE: f64 = 0.3;

/// Why and how a result's offsets were changed after matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub original_offsets: Offsets,
    pub adjusted_offsets: Offsets,
    pub reason: String,
}

/// One user-driven position correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub timestamp: DateTime<Utc>,
    pub old_offsets: Offsets,
    pub new_offsets: Offsets,
    pub reason: String,
}

/// The recovered position and inherited metadata for one candidate chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub confidence_tier: ConfidenceTier,
    pub confidence_score: f64,
    pub method: String,
    pub heading_path: Option<Vec<String>>,
    pub heading_level: Option<u32>,
    pub section_marker: Option<String>,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    pub bounding_boxes: Option<Vec<BBox>>,
    pub overlap_corrected: bool,
    pub validation_warning: Option<String>,
    pub validation_details: Option<ValidationDetails>,
    pub position_validated: bool,
    pub position_corrected: bool,
    #[serde(default)]
    pub correction_history: Vec<CorrectionEntry>,
    pub context_before: Option<String>,
    pub context_after: Option<String>,
}

impl MatchResult {
    pub fn new(
        chunk_index: usize,
        start_offset: usize,
        end_offset: usize,
        tier: ConfidenceTier,
        score: f64,
        method: &str,
    ) -> Self {
        Self {
            chunk_index,
            start_offset,
            end_offset,
            confidence_tier: tier,
            confidence_score: score.clamp(0.0, 1.0),
            method: method.to_string(),
            heading_path: None,
            heading_level: None,
            section_marker: None,
            page_start: None,
            page_end: None,
            bounding_boxes: None,
            overlap_corrected: false,
            validation_warning: None,
            validation_details: None,
            position_validated: false,
            position_corrected: false,
            correction_history: Vec::new(),
            context_before: None,
            context_after: None,
        }
    }

    pub fn offsets(&self) -> Offsets {
        [self.start_offset, self.end_offset]
    }

    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends to the warning, keeping earlier warnings.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        self.validation_warning = Some(match self.validation_warning.take() {
            Some(existing) => format!("{}; {}", existing, warning),
            None => warning,
        });
    }

    /// Moves the result one tier down and caps its score accordingly.
    pub fn downgrade(&mut self) {
        self.confidence_tier = self.confidence_tier.downgrade();
        self.confidence_score = self
            .confidence_score
            .min(self.confidence_tier.score_ceiling());
    }

    /// Demotes the result to a synthetic position. The replaced method is
    /// kept in the warning.
    pub fn make_synthetic(&mut self) {
        self.confidence_tier = ConfidenceTier::Synthetic;
        self.confidence_score = SYNTHETIC_CONFIDENCE;
        if self.method != "synthetic" {
            let replaced = std::mem::replace(&mut self.method, "synthetic".to_string());
            self.push_warning(format!("synthetic_position: replaces {} match", replaced));
        }
    }
}

/// How the original document was extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    #[default]
    Pdf,
    Epub,
    Transcript,
    Markdown,
}

impl ExtractionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Transcript => "transcript",
            Self::Markdown => "markdown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pdf" => Some(Self::Pdf),
            "epub" => Some(Self::Epub),
            "transcript" => Some(Self::Transcript),
            "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Aggregate shape of a structural extraction, stored alongside the cache row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureSummary {
    pub chunk_count: usize,
    pub page_count: Option<u32>,
    pub heading_count: usize,
    pub max_heading_depth: u32,
    pub has_bounding_boxes: bool,
}

impl StructureSummary {
    pub fn from_chunks(chunks: &[StructuralChunk]) -> Self {
        let page_count = chunks
            .iter()
            .filter_map(|c| c.page_end.or(c.page_start))
            .max();

        let mut headings: Vec<&str> = chunks
            .iter()
            .filter_map(|c| c.heading_path.as_ref())
            .filter_map(|path| path.last())
            .map(String::as_str)
            .collect();
        headings.dedup();

        let max_heading_depth = chunks
            .iter()
            .filter_map(|c| {
                c.heading_level
                    .or_else(|| c.heading_path.as_ref().map(|p| p.len() as u32))
            })
            .max()
            .unwrap_or(0);

        Self {
            chunk_count: chunks.len(),
            page_count,
            heading_count: headings.len(),
            max_heading_depth,
            has_bounding_boxes: chunks
                .iter()
                .any(|c| c.bounding_boxes.as_ref().is_some_and(|b| !b.is_empty())),
        }
    }
}

/// Output of one structural extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub mode: ExtractionMode,
    pub extractor_version: String,
    pub structural_chunks: Vec<StructuralChunk>,
}

/// Persisted structural extraction, keyed by document and validated by
/// the hash of the reference text it was produced against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedExtraction {
    pub document_id: String,
    pub mode: ExtractionMode,
    pub markdown_hash: String,
    pub extractor_version: String,
    pub structural_chunks: Vec<StructuralChunk>,
    pub structure_summary: StructureSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CachedExtraction {
    pub fn new(document_id: &str, markdown_hash: &str, extraction: Extraction) -> Self {
        let now = Utc::now();
        Self {
            document_id: document_id.to_string(),
            mode: extraction.mode,
            markdown_hash: markdown_hash.to_string(),
            extractor_version: extraction.extractor_version,
            structure_summary: StructureSummary::from_chunks(&extraction.structural_chunks),
            structural_chunks: extraction.structural_chunks,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A document whose chunks have been positioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: Option<String>,
    pub reference_text: String,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A persisted chunk row: identity, content, and its positioned result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub content: String,
    #[serde(flatten)]
    pub result: MatchResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_roundtrip_names() {
        for tier in ConfidenceTier::ALL {
            assert_eq!(ConfidenceTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(ConfidenceTier::parse("bogus"), None);
    }

    #[test]
    fn test_downgrade_chain_ends_at_synthetic() {
        let mut tier = ConfidenceTier::Exact;
        for _ in 0..10 {
            tier = tier.downgrade();
        }
        assert_eq!(tier, ConfidenceTier::Synthetic);
        assert_eq!(ConfidenceTier::Exact.downgrade(), ConfidenceTier::Fuzzy);
    }

    #[test]
    fn test_ceilings_are_ordered() {
        let ceilings: Vec<f64> = ConfidenceTier::ALL.iter().map(|t| t.score_ceiling()).collect();
        for pair in ceilings.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn test_push_warning_appends() {
        let mut r = MatchResult::new(0, 0, 4, ConfidenceTier::Exact, 1.0, "exact");
        r.push_warning("first");
        r.push_warning("second");
        assert_eq!(r.validation_warning.as_deref(), Some("first; second"));
    }

    #[test]
    fn test_tier_serializes_snake_case() {
        let json = serde_json::to_string(&ConfidenceTier::AiAssisted).unwrap();
        assert_eq!(json, "\"ai_assisted\"");
    }

    #[test]
    fn test_validation_details_type_field() {
        let details = ValidationDetails {
            kind: "overlap_corrected".to_string(),
            original_offsets: [0, 10],
            adjusted_offsets: [5, 15],
            reason: "test".to_string(),
        };
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["type"], "overlap_corrected");
        assert_eq!(value["adjusted_offsets"][1], 15);
    }

    #[test]
    fn test_structure_summary() {
        let chunks = vec![
            StructuralChunk {
                content: "a".into(),
                page_start: Some(1),
                page_end: Some(2),
                heading_path: Some(vec!["Intro".into()]),
                ..Default::default()
            },
            StructuralChunk {
                content: "b".into(),
                page_start: Some(3),
                heading_path: Some(vec!["Intro".into(), "Scope".into()]),
                heading_level: Some(2),
                ..Default::default()
            },
        ];
        let summary = StructureSummary::from_chunks(&chunks);
        assert_eq!(summary.chunk_count, 2);
        assert_eq!(summary.page_count, Some(3));
        assert_eq!(summary.heading_count, 2);
        assert_eq!(summary.max_heading_depth, 2);
        assert!(!summary.has_bounding_boxes);
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        let hash = content_hash("abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
