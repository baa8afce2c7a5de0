//! Property-based tests for the matching cascade and overlap resolver.
//!
//! - Totality: every candidate gets exactly one non-empty, in-bounds span
//! - Ordering: resolved spans never overlap and follow candidate order
//! - Round trip: verbatim slices of the text come back exact
//! - Confidence: no score exceeds its tier's ceiling

use chunk_locator_core::matcher::locate_all;
use chunk_locator_core::models::ConfidenceTier;
use chunk_locator_core::overlap::resolve_overlaps;
use chunk_locator_core::{CandidateChunk, MatchResult, MatcherConfig, ReferenceIndex};
use proptest::prelude::*;

// =============================================================================
// Generators
// =============================================================================

fn word() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zé]{1,9}").unwrap()
}

/// Space-separated words, at least 20 bytes long.
fn reference_text() -> impl Strategy<Value = String> {
    prop::collection::vec(word(), 8..60)
        .prop_map(|words| words.join(" "))
        .prop_filter("long enough", |t| t.chars().count() >= 20)
}

fn candidate_contents() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::string::string_regex("[a-zé .,-]{0,40}").unwrap(), 1..8)
}

fn candidates(contents: &[String]) -> Vec<CandidateChunk> {
    contents
        .iter()
        .enumerate()
        .map(|(index, content)| CandidateChunk {
            index,
            content: content.clone(),
        })
        .collect()
}

fn run(text: &str, contents: &[String]) -> Vec<MatchResult> {
    let index = ReferenceIndex::build(text);
    let mut results = locate_all(&candidates(contents), &index, &MatcherConfig::default());
    resolve_overlaps(&mut results, &index.trigrams);
    results
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn every_candidate_gets_a_valid_span(text in reference_text(), contents in candidate_contents()) {
        let results = run(&text, &contents);
        prop_assert_eq!(results.len(), contents.len());
        for (i, r) in results.iter().enumerate() {
            prop_assert_eq!(r.chunk_index, i);
            prop_assert!(r.start_offset < r.end_offset);
            prop_assert!(r.end_offset <= text.len());
            prop_assert!(text.is_char_boundary(r.start_offset));
            prop_assert!(text.is_char_boundary(r.end_offset));
        }
    }

    #[test]
    fn resolved_spans_are_ordered(text in reference_text(), contents in candidate_contents()) {
        let results = run(&text, &contents);
        for pair in results.windows(2) {
            prop_assert!(pair[0].end_offset <= pair[1].start_offset,
                "{:?} overlaps {:?}", pair[0].offsets(), pair[1].offsets());
        }
    }

    #[test]
    fn scores_respect_tier_ceilings(text in reference_text(), contents in candidate_contents()) {
        for r in run(&text, &contents) {
            prop_assert!(r.confidence_score <= r.confidence_tier.score_ceiling());
            prop_assert!(r.confidence_score >= 0.0);
        }
    }

    #[test]
    fn verbatim_slices_round_trip(words in prop::collection::vec(word(), 6..40), cuts in 1usize..5) {
        let text = words.join(" ");
        let per = (words.len() / (cuts + 1)).max(1);
        let pieces: Vec<String> = words.chunks(per).map(|c| c.join(" ")).collect();

        let results = run(&text, &pieces);
        for (piece, r) in pieces.iter().zip(&results) {
            prop_assert_eq!(r.confidence_tier, ConfidenceTier::Exact);
            prop_assert_eq!(r.confidence_score, 1.0);
            prop_assert_eq!(&text[r.start_offset..r.end_offset], piece.as_str());
            prop_assert!(!r.overlap_corrected);
        }
    }
}
