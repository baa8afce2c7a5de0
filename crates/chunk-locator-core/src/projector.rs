//! Metadata projection from structural chunks onto located chunks.
//!
//! [`StructuralLayout::build`] gives every structural chunk a span in the
//! reference text (supplied offsets when the extractor reported them,
//! otherwise located with the same anchor/fuzzy tiers used for candidates,
//! otherwise a proportional estimate). [`StructuralLayout::project`] then
//! copies heading, page, section, and bounding-box metadata onto each
//! final [`MatchResult`] from the structural spans it overlaps.

use crate::matcher::{
    run_tiers, synthetic_tier, MatcherConfig, ReferenceIndex, TierContext, ANCHOR_TIERS,
    APPROXIMATE_TIERS,
};
use crate::models::{BBox, CandidateChunk, ExtractionMode, MatchResult, StructuralChunk};

const MAX_SLUG_CHARS: usize = 50;

/// A structural chunk with its span in the reference text.
#[derive(Debug, Clone)]
pub struct PlacedStructure {
    pub source_index: usize,
    pub start: usize,
    pub end: usize,
    /// How the span was obtained: "supplied", a tier method, or "synthetic".
    pub method: String,
    pub chunk: StructuralChunk,
}

impl PlacedStructure {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && self.end > start
    }
}

/// Structural chunks placed on the reference text, in document order.
#[derive(Debug, Clone, Default)]
pub struct StructuralLayout {
    /// Indexed by position in the extractor's output.
    placed: Vec<PlacedStructure>,
    /// Indices into `placed`, sorted by start offset.
    order: Vec<usize>,
}

impl StructuralLayout {
    pub fn build(
        chunks: &[StructuralChunk],
        index: &ReferenceIndex,
        config: &MatcherConfig,
        mode: ExtractionMode,
    ) -> Self {
        let len = index.len();
        let mut cursor = 0;
        let mut placed = Vec::with_capacity(chunks.len());

        for (i, sc) in chunks.iter().enumerate() {
            let mut chunk = sc.clone();
            assign_section_marker(&mut chunk, i, mode);

            let supplied = match (sc.start_offset, sc.end_offset) {
                (Some(s), Some(e)) if s < e && e <= len => Some((
                    index.trigrams.floor_boundary(s),
                    index.trigrams.ceil_boundary(e),
                )),
                _ => None,
            };

            let (start, end, method) = match supplied {
                Some((s, e)) => (s, e, "supplied".to_string()),
                None => {
                    let candidate = CandidateChunk {
                        index: i,
                        content: sc.content.clone(),
                    };
                    let ctx = TierContext {
                        index,
                        config,
                        prior_end: cursor,
                        next_start: None,
                        gap_slot: None,
                        total: chunks.len(),
                    };
                    let r = run_tiers(ANCHOR_TIERS, &candidate, &ctx)
                        .or_else(|| run_tiers(APPROXIMATE_TIERS, &candidate, &ctx))
                        .unwrap_or_else(|| synthetic_tier(&candidate, &ctx));
                    (r.start_offset, r.end_offset, r.method)
                }
            };

            tracing::trace!(structural = i, start, end, method = %method, "structural chunk placed");
            cursor = cursor.max(end);
            placed.push(PlacedStructure {
                source_index: i,
                start,
                end,
                method,
                chunk,
            });
        }

        let mut order: Vec<usize> = (0..placed.len()).collect();
        order.sort_by_key(|&i| (placed[i].start, i));
        Self { placed, order }
    }

    pub fn len(&self) -> usize {
        self.placed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placed.is_empty()
    }

    /// The placed structural chunk at extractor position `source_index`.
    pub fn get(&self, source_index: usize) -> Option<&PlacedStructure> {
        self.placed.get(source_index)
    }

    /// Placed chunks in document order.
    pub fn iter(&self) -> impl Iterator<Item = &PlacedStructure> {
        self.order.iter().map(move |&i| &self.placed[i])
    }

    /// Copy structural metadata onto one result.
    pub fn project(&self, result: &mut MatchResult) {
        let (start, end) = (result.start_offset, result.end_offset);
        let overlapping: Vec<&PlacedStructure> =
            self.iter().filter(|p| p.overlaps(start, end)).collect();

        let Some(first) = overlapping.first() else {
            // Nothing overlaps: inherit the heading of the nearest preceding
            // structural chunk. Pages stay unknown.
            if let Some(prev) = self.iter().filter(|p| p.end <= start).last() {
                result.heading_path = prev.chunk.heading_path.clone();
                result.heading_level = prev.chunk.heading_level;
                result.section_marker = prev.chunk.section_marker.clone();
            }
            return;
        };

        result.heading_path = first.chunk.heading_path.clone();
        result.heading_level = first.chunk.heading_level;
        result.section_marker = first.chunk.section_marker.clone();

        result.page_start = overlapping
            .iter()
            .filter_map(|p| p.chunk.page_start.or(p.chunk.page_end))
            .min();
        result.page_end = overlapping
            .iter()
            .filter_map(|p| p.chunk.page_end.or(p.chunk.page_start))
            .max();

        let mut boxes: Vec<BBox> = Vec::new();
        for p in &overlapping {
            for b in p.chunk.bounding_boxes.iter().flatten() {
                let in_range = match (result.page_start, result.page_end) {
                    (Some(lo), Some(hi)) => b.page >= lo && b.page <= hi,
                    _ => true,
                };
                if in_range && !boxes.contains(b) {
                    boxes.push(b.clone());
                }
            }
        }
        result.bounding_boxes = (!boxes.is_empty()).then_some(boxes);
    }

    pub fn project_all(&self, results: &mut [MatchResult]) {
        for r in results.iter_mut() {
            self.project(r);
        }
    }
}

fn assign_section_marker(chunk: &mut StructuralChunk, idx: usize, mode: ExtractionMode) {
    if chunk.section_marker.is_some() {
        return;
    }
    let heading = chunk
        .heading_path
        .as_ref()
        .and_then(|p| p.last())
        .map(String::as_str);
    let paginated = chunk.page_start.is_some() || chunk.page_end.is_some();

    match (mode, heading) {
        (ExtractionMode::Epub, h) => {
            chunk.section_marker = Some(section_slug(h.unwrap_or(""), idx));
        }
        (_, Some(h)) if !paginated => {
            chunk.section_marker = Some(section_slug(h, idx));
        }
        _ => {}
    }
}

/// Slug a heading into a section marker: lowercase, `_`-separated,
/// alphanumeric, at most 50 chars. Falls back to `section_NNN`.
///
/// ```rust
/// use chunk_locator_core::projector::section_slug;
///
/// assert_eq!(
///     section_slug("Chapter 3: Introduction to Physics", 0),
///     "chapter_3_introduction_to_physics"
/// );
/// assert_eq!(section_slug("", 12), "section_012");
/// ```
pub fn section_slug(heading: &str, idx: usize) -> String {
    let mut slug = String::with_capacity(heading.len());
    for c in heading.chars().flat_map(char::to_lowercase) {
        let c = if c == ' ' || c == '-' { '_' } else { c };
        if c == '_' {
            if !slug.is_empty() && !slug.ends_with('_') {
                slug.push('_');
            }
        } else if c.is_alphanumeric() {
            slug.push(c);
        }
    }
    let slug: String = slug.chars().take(MAX_SLUG_CHARS).collect();
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        format!("section_{:03}", idx)
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfidenceTier;

    const TEXT: &str = "Introduction. This paper studies rivers. Methods. We sampled water weekly. Results. Nitrate levels rose.";

    fn sc(content: &str, page: u32, heading: &[&str]) -> StructuralChunk {
        StructuralChunk {
            content: content.to_string(),
            page_start: Some(page),
            page_end: Some(page),
            heading_path: Some(heading.iter().map(|s| s.to_string()).collect()),
            heading_level: Some(heading.len() as u32),
            bounding_boxes: Some(vec![BBox {
                page,
                x: 10.0,
                y: 20.0 * page as f64,
                width: 100.0,
                height: 12.0,
            }]),
            ..Default::default()
        }
    }

    fn layout() -> StructuralLayout {
        let chunks = vec![
            sc("Introduction. This paper studies rivers.", 1, &["Intro"]),
            sc("Methods. We sampled water weekly.", 2, &["Body", "Methods"]),
            sc("Results. Nitrate levels rose.", 3, &["Body", "Results"]),
        ];
        let index = ReferenceIndex::build(TEXT);
        StructuralLayout::build(&chunks, &index, &MatcherConfig::default(), ExtractionMode::Pdf)
    }

    fn result_for(needle: &str) -> MatchResult {
        let start = TEXT.find(needle).unwrap();
        MatchResult::new(0, start, start + needle.len(), ConfidenceTier::Exact, 1.0, "exact")
    }

    #[test]
    fn test_layout_places_structural_chunks() {
        let layout = layout();
        let spans: Vec<(usize, usize)> = layout.iter().map(|p| (p.start, p.end)).collect();
        assert_eq!(spans[0], (0, 40));
        assert_eq!(spans[1].0, TEXT.find("Methods").unwrap());
        assert!(layout.iter().all(|p| p.method == "exact"));
    }

    #[test]
    fn test_project_single_overlap() {
        let layout = layout();
        let mut r = result_for("We sampled water");
        layout.project(&mut r);
        assert_eq!(r.heading_path, Some(vec!["Body".to_string(), "Methods".to_string()]));
        assert_eq!(r.heading_level, Some(2));
        assert_eq!((r.page_start, r.page_end), (Some(2), Some(2)));
        assert_eq!(r.bounding_boxes.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_project_spanning_chunks() {
        let layout = layout();
        let mut r = result_for("rivers. Methods. We sampled");
        layout.project(&mut r);
        assert_eq!(r.heading_path, Some(vec!["Intro".to_string()]));
        assert_eq!((r.page_start, r.page_end), (Some(1), Some(2)));
        assert_eq!(r.bounding_boxes.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_project_supplied_offsets() {
        let chunks = vec![StructuralChunk {
            content: "unrelated extractor text".into(),
            heading_path: Some(vec!["Only".into()]),
            start_offset: Some(0),
            end_offset: Some(13),
            ..Default::default()
        }];
        let index = ReferenceIndex::build(TEXT);
        let layout =
            StructuralLayout::build(&chunks, &index, &MatcherConfig::default(), ExtractionMode::Pdf);
        assert_eq!(layout.get(0).map(|p| (p.start, p.end)), Some((0, 13)));
        assert_eq!(layout.get(0).map(|p| p.method.as_str()), Some("supplied"));
    }

    #[test]
    fn test_heading_inherited_from_preceding() {
        let chunks = vec![StructuralChunk {
            content: "Introduction.".into(),
            heading_path: Some(vec!["Intro".into()]),
            ..Default::default()
        }];
        let index = ReferenceIndex::build(TEXT);
        let layout =
            StructuralLayout::build(&chunks, &index, &MatcherConfig::default(), ExtractionMode::Pdf);
        let mut r = result_for("Nitrate levels");
        layout.project(&mut r);
        assert_eq!(r.heading_path, Some(vec!["Intro".to_string()]));
        assert_eq!(r.page_start, None);
        assert_eq!(r.bounding_boxes, None);
    }

    #[test]
    fn test_no_structure_leaves_metadata_empty() {
        let mut r = result_for("Nitrate levels");
        StructuralLayout::default().project(&mut r);
        assert_eq!(r.heading_path, None);
        assert_eq!(r.section_marker, None);
    }

    #[test]
    fn test_epub_markers_derived() {
        let chunks = vec![
            StructuralChunk {
                content: "Introduction. This paper studies rivers.".into(),
                heading_path: Some(vec!["Part One".into(), "Chapter 1 - Rivers & Lakes".into()]),
                ..Default::default()
            },
            StructuralChunk {
                content: "Methods. We sampled water weekly.".into(),
                ..Default::default()
            },
        ];
        let index = ReferenceIndex::build(TEXT);
        let layout =
            StructuralLayout::build(&chunks, &index, &MatcherConfig::default(), ExtractionMode::Epub);
        assert_eq!(
            layout.get(0).and_then(|p| p.chunk.section_marker.as_deref()),
            Some("chapter_1_rivers_lakes")
        );
        assert_eq!(
            layout.get(1).and_then(|p| p.chunk.section_marker.as_deref()),
            Some("section_001")
        );
    }

    #[test]
    fn test_section_slug_truncates() {
        let slug = section_slug(&"word ".repeat(30), 0);
        assert_eq!(slug.chars().count(), 49);
        assert!(slug.starts_with("word_word"));
        assert!(slug.ends_with("word"));
        assert_eq!(section_slug(&format!("{}_tail", "a".repeat(49)), 0), "a".repeat(49));
        assert_eq!(section_slug("!!!", 7), "section_007");
    }
}
