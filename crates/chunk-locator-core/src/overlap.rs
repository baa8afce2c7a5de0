//! Sequential overlap resolution.
//!
//! Chunks are matched independently, so neighbors can claim overlapping
//! spans. [`resolve_overlaps`] walks the results in chunk order and pushes
//! each overlapping chunk to start where its predecessor ends, keeping its
//! length. Every adjustment is recorded in `validation_details`, flagged,
//! and warned about. A chunk loses at most one confidence tier per pass,
//! however often it is moved.
//!
//! After this pass `results[i].end_offset <= results[i + 1].start_offset`
//! and every span is non-empty and inside the text, provided there are no
//! more results than characters in the text.

use crate::models::{MatchResult, ValidationDetails};
use crate::trigram::TrigramIndex;

const OVERLAP_KIND: &str = "overlap_corrected";

/// Resolve overlaps in place. `results` must be sorted by `chunk_index`.
/// Returns how many results were adjusted.
pub fn resolve_overlaps(results: &mut [MatchResult], index: &TrigramIndex) -> usize {
    let text_len = index.len_bytes();
    if text_len == 0 {
        return 0;
    }
    for r in results.iter_mut() {
        clamp_span(r, index);
    }

    let mut adjusted = vec![false; results.len()];
    for i in 1..results.len() {
        let prev_end = results[i - 1].end_offset;
        if results[i].start_offset >= prev_end {
            continue;
        }

        let original = results[i].offsets();
        if prev_end >= text_len {
            reclaim_tail(results, i, index, &mut adjusted);
            continue;
        }

        let chars = index
            .char_index(original[1])
            .saturating_sub(index.char_index(original[0]))
            .max(1);
        let r = &mut results[i];
        r.start_offset = prev_end;
        r.end_offset = index.advance(prev_end, chars);
        mark_adjusted(
            r,
            original,
            format!("overlapped previous chunk ending at {}", prev_end),
            &mut adjusted[i],
        );
        tracing::warn!(
            chunk = r.chunk_index,
            from = ?original,
            to = ?r.offsets(),
            tier = %r.confidence_tier,
            "overlap corrected"
        );
    }
    adjusted.iter().filter(|&&a| a).count()
}

/// Force a span onto char boundaries, inside the text, and non-empty.
fn clamp_span(r: &mut MatchResult, index: &TrigramIndex) {
    let len = index.len_bytes();
    let start = index.floor_boundary(r.start_offset.min(len));
    let end = index.ceil_boundary(r.end_offset.min(len));
    if end > start {
        r.start_offset = start;
        r.end_offset = end;
        return;
    }

    let original = r.offsets();
    if start < len {
        r.start_offset = start;
        r.end_offset = index.next_boundary(start);
    } else {
        r.start_offset = index.prev_boundary(len);
        r.end_offset = len;
    }
    r.make_synthetic();
    r.push_warning("empty_span: span widened to one character");
    tracing::warn!(chunk = r.chunk_index, from = ?original, to = ?r.offsets(), "empty span repaired");
}

/// The text is used up before chunk `i`: put it on the last character and
/// shrink its predecessors backwards until the ordering holds again.
fn reclaim_tail(results: &mut [MatchResult], i: usize, index: &TrigramIndex, adjusted: &mut [bool]) {
    let len = index.len_bytes();
    let original = results[i].offsets();
    {
        let r = &mut results[i];
        r.start_offset = index.prev_boundary(len);
        r.end_offset = len;
        mark_adjusted(
            r,
            original,
            "reference text exhausted before this chunk".to_string(),
            &mut adjusted[i],
        );
        r.make_synthetic();
    }
    tracing::warn!(chunk = results[i].chunk_index, from = ?original, "reference text exhausted, reclaiming tail");

    let mut j = i;
    while j > 0 && results[j - 1].end_offset > results[j].start_offset {
        let limit = results[j].start_offset;
        let r = &mut results[j - 1];
        let before = r.offsets();
        r.end_offset = limit;
        if r.start_offset >= r.end_offset {
            r.start_offset = index.prev_boundary(limit);
        }
        mark_adjusted(
            r,
            before,
            "shrunk to make room for a following chunk".to_string(),
            &mut adjusted[j - 1],
        );
        j -= 1;
    }
}

/// Record a move. `already` is set on the first adjustment of this pass;
/// only that one costs a tier.
fn mark_adjusted(r: &mut MatchResult, original: [usize; 2], reason: String, already: &mut bool) {
    if r.offsets() == original {
        return;
    }
    // Keep the first pre-adjustment span when a result is moved twice.
    let original_offsets = r
        .validation_details
        .as_ref()
        .filter(|d| d.kind == OVERLAP_KIND)
        .map(|d| d.original_offsets)
        .unwrap_or(original);
    r.push_warning(format!(
        "overlap_corrected: moved from [{}, {}) to [{}, {})",
        original[0], original[1], r.start_offset, r.end_offset
    ));
    r.validation_details = Some(ValidationDetails {
        kind: OVERLAP_KIND.to_string(),
        original_offsets,
        adjusted_offsets: r.offsets(),
        reason,
    });
    r.overlap_corrected = true;
    if !*already {
        r.downgrade();
        *already = true;
    }
}
