//! Tiered matching of candidate chunks against the reference text.
//!
//! Each tier is a plain function with the signature
//! `(candidate, ctx) -> Option<MatchResult>`; `None` means "try the next
//! tier". The cascade is:
//!
//! | Tier | Function | Tier / score |
//! |------|----------|--------------|
//! | exact | [`exact_tier`] | `Exact`, 1.0 |
//! | normalized | [`normalized_tier`] | `Fuzzy`, 0.99 |
//! | fuzzy | [`fuzzy_tier`] | `Fuzzy`, 0.75–0.99 |
//! | semantic, AI | [`AssistTier`] impls in the app crate | `Semantic` / `AiAssisted` |
//! | synthetic | [`synthetic_tier`] | `Synthetic`, 0.3 |
//!
//! Exact and normalized matches are cheap and depend on the previous
//! chunk's end, so they run in one sequential [`anchor_pass`]. The
//! remaining tiers run per chunk with position hints taken from the
//! nearest anchored neighbors ([`neighbor_hints`]).

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{CandidateChunk, ConfidenceTier, MatchResult, SYNTHETIC_CONFIDENCE};
use crate::normalize::NormalizedText;
use crate::trigram::{SlideParams, TrigramIndex};

/// Thresholds and search parameters for the cascade.
#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_fuzzy_min")]
    pub fuzzy_min: f64,
    #[serde(default = "default_semantic_min")]
    pub semantic_min: f64,
    /// Words captured on each side of a match for human review.
    #[serde(default = "default_context_words")]
    pub context_words: usize,
    #[serde(flatten)]
    pub slide: SlideParams,
}

fn default_fuzzy_min() -> f64 {
    0.75
}
fn default_semantic_min() -> f64 {
    0.80
}
fn default_context_words() -> usize {
    5
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            fuzzy_min: default_fuzzy_min(),
            semantic_min: default_semantic_min(),
            context_words: default_context_words(),
            slide: SlideParams::default(),
        }
    }
}

/// Everything built once per reference text.
#[derive(Debug, Clone)]
pub struct ReferenceIndex {
    pub trigrams: TrigramIndex,
    pub normalized: NormalizedText,
}

impl ReferenceIndex {
    pub fn build(text: &str) -> Self {
        Self {
            trigrams: TrigramIndex::build(text),
            normalized: NormalizedText::new(text),
        }
    }

    pub fn text(&self) -> &str {
        self.trigrams.text()
    }

    pub fn len(&self) -> usize {
        self.trigrams.len_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-call inputs shared by every tier.
#[derive(Debug, Clone, Copy)]
pub struct TierContext<'a> {
    pub index: &'a ReferenceIndex,
    pub config: &'a MatcherConfig,
    /// End of the previous placed chunk; matches are preferred after it.
    pub prior_end: usize,
    /// Start of the next anchored chunk, when known.
    pub next_start: Option<usize>,
    /// `(rank, run)`: this chunk's position among the `run` unanchored
    /// chunks between its anchored neighbors. `None` without hints.
    pub gap_slot: Option<(usize, usize)>,
    pub total: usize,
}

impl<'a> TierContext<'a> {
    /// Byte range where this chunk is expected to sit.
    pub fn expected_region(&self, needle_len: usize) -> (usize, usize) {
        let len = self.index.len();
        let from = self.prior_end.min(len);
        let to = self
            .next_start
            .map(|n| n.saturating_add(needle_len).min(len))
            .unwrap_or(len)
            .max(from);
        (from, to)
    }
}

/// Signature shared by every synchronous tier.
pub type TierFn = fn(&CandidateChunk, &TierContext<'_>) -> Option<MatchResult>;

/// A named synchronous tier.
#[derive(Clone, Copy)]
pub struct Tier {
    pub name: &'static str,
    pub run: TierFn,
}

/// Tiers that run in the sequential anchor pass.
pub const ANCHOR_TIERS: &[Tier] = &[
    Tier {
        name: "exact",
        run: exact_tier,
    },
    Tier {
        name: "normalized",
        run: normalized_tier,
    },
];

/// CPU-bound approximate tiers that run per chunk after the anchor pass.
pub const APPROXIMATE_TIERS: &[Tier] = &[Tier {
    name: "fuzzy",
    run: fuzzy_tier,
}];

/// First `Some` from `tiers`, in order.
pub fn run_tiers(
    tiers: &[Tier],
    candidate: &CandidateChunk,
    ctx: &TierContext<'_>,
) -> Option<MatchResult> {
    tiers.iter().find_map(|tier| {
        let result = (tier.run)(candidate, ctx);
        if result.is_some() {
            tracing::trace!(chunk = candidate.index, tier = tier.name, "tier matched");
        }
        result
    })
}

/// A tier that needs an external collaborator (embedding service,
/// language model). Failures are returned as `Err` and treated by the
/// caller as "no match".
#[async_trait]
pub trait AssistTier: Send + Sync {
    fn name(&self) -> &str;

    async fn locate(
        &self,
        candidate: &CandidateChunk,
        ctx: &TierContext<'_>,
    ) -> anyhow::Result<Option<MatchResult>>;
}

/// Verbatim occurrence, preferring the first one after `prior_end`.
pub fn exact_tier(candidate: &CandidateChunk, ctx: &TierContext<'_>) -> Option<MatchResult> {
    let needle = candidate.content.trim();
    if needle.is_empty() {
        return None;
    }
    let text = ctx.index.text();
    let from = ctx.index.trigrams.floor_boundary(ctx.prior_end);
    let start = text[from..]
        .find(needle)
        .map(|pos| from + pos)
        .or_else(|| text.find(needle))?;

    Some(MatchResult::new(
        candidate.index,
        start,
        start + needle.len(),
        ConfidenceTier::Exact,
        1.0,
        "exact",
    ))
}

/// Occurrence after quote/dash/whitespace/hyphenation normalization.
pub fn normalized_tier(candidate: &CandidateChunk, ctx: &TierContext<'_>) -> Option<MatchResult> {
    let needle = NormalizedText::new(&candidate.content);
    let hay = &ctx.index.normalized;
    let (start, end) = hay
        .find_from(&needle, ctx.prior_end)
        .or_else(|| hay.find_from(&needle, 0))?;

    Some(MatchResult::new(
        candidate.index,
        start,
        end,
        ConfidenceTier::Fuzzy,
        0.99,
        "normalized",
    ))
}

/// Trigram sliding-window match scoring at least `fuzzy_min`.
///
/// Searches the expected region first and falls back to the whole text.
pub fn fuzzy_tier(candidate: &CandidateChunk, ctx: &TierContext<'_>) -> Option<MatchResult> {
    let needle = candidate.content.trim();
    if needle.is_empty() {
        return None;
    }
    let min = ctx.config.fuzzy_min;
    let trigrams = &ctx.index.trigrams;
    if trigrams.max_possible_similarity(needle) < min {
        return None;
    }

    let (from, to) = ctx.expected_region(needle.len());
    let regional = trigrams
        .search(needle, from, to, &ctx.config.slide)
        .filter(|m| m.score >= min);
    let best = match regional {
        Some(m) => m,
        None => trigrams
            .search(needle, 0, trigrams.len_bytes(), &ctx.config.slide)
            .filter(|m| m.score >= min)?,
    };
    if best.end <= best.start {
        return None;
    }

    Some(MatchResult::new(
        candidate.index,
        best.start,
        best.end,
        ConfidenceTier::Fuzzy,
        best.score.min(ConfidenceTier::Fuzzy.score_ceiling()),
        "fuzzy",
    ))
}

/// Position estimate for a chunk no tier located. Always succeeds for a
/// non-empty text.
///
/// With a [`TierContext::gap_slot`] the chunk is interpolated inside the
/// gap between its anchored neighbors and clipped to its share of that
/// gap, so it never lands on an anchor. Without one the position is
/// proportional over the whole text.
pub fn synthetic_tier(candidate: &CandidateChunk, ctx: &TierContext<'_>) -> MatchResult {
    let trigrams = &ctx.index.trigrams;
    let chars = trigrams.len_chars();
    let last = chars.saturating_sub(1);
    let len_chars = candidate.content.trim().chars().count().max(1);

    let (start_char, end_char) = match ctx.gap_slot {
        Some((rank, run)) => {
            let bytes = trigrams.len_bytes();
            let from = trigrams.char_index(ctx.prior_end.min(bytes));
            let to = ctx
                .next_start
                .map(|n| trigrams.char_index(n.min(bytes)))
                .unwrap_or(chars)
                .max(from);
            let run = run.max(1);
            let rank = rank.min(run - 1);
            let width = to - from;
            let share_start = from + rank * width / run;
            let share_end = from + (rank + 1) * width / run;

            let start = share_start.min(last);
            let end = (start + len_chars).min(share_end).max(start + 1).min(chars);
            (start, end)
        }
        None => {
            let total = ctx.total.max(1);
            let position = candidate.index.min(total - 1);
            let start = (position * chars / total).min(last);
            (start, (start + len_chars).min(chars))
        }
    };

    let mut result = MatchResult::new(
        candidate.index,
        trigrams.byte_offset(start_char),
        trigrams.byte_offset(end_char),
        ConfidenceTier::Synthetic,
        SYNTHETIC_CONFIDENCE,
        "synthetic",
    );
    result.push_warning("synthetic_position: no tier located this chunk; position estimated proportionally");
    result
}

/// Run [`ANCHOR_TIERS`] over all candidates in order, threading each
/// anchored chunk's end into the next search.
pub fn anchor_pass(
    candidates: &[CandidateChunk],
    index: &ReferenceIndex,
    config: &MatcherConfig,
) -> Vec<Option<MatchResult>> {
    let mut prior_end = 0;
    candidates
        .iter()
        .map(|candidate| {
            let ctx = TierContext {
                index,
                config,
                prior_end,
                next_start: None,
                gap_slot: None,
                total: candidates.len(),
            };
            let result = run_tiers(ANCHOR_TIERS, candidate, &ctx);
            if let Some(r) = &result {
                prior_end = prior_end.max(r.end_offset);
            }
            result
        })
        .collect()
}

/// `(prior_end, next_start)` for slot `i`, from the nearest anchored
/// neighbors on either side.
pub fn neighbor_hints(slots: &[Option<MatchResult>], i: usize) -> (usize, Option<usize>) {
    let prior_end = slots[..i]
        .iter()
        .rev()
        .find_map(|s| s.as_ref().map(|r| r.end_offset))
        .unwrap_or(0);
    let next_start = slots
        .get(i + 1..)
        .unwrap_or(&[])
        .iter()
        .find_map(|s| s.as_ref().map(|r| r.start_offset))
        .filter(|&n| n >= prior_end);
    (prior_end, next_start)
}

/// `(rank, run)` for slot `i`: its position among the consecutive empty
/// slots around it, and how many there are. Pairs with [`neighbor_hints`].
pub fn gap_slot(slots: &[Option<MatchResult>], i: usize) -> (usize, usize) {
    let first = slots[..i]
        .iter()
        .rposition(Option::is_some)
        .map_or(0, |p| p + 1);
    let end = slots[i..]
        .iter()
        .position(Option::is_some)
        .map_or(slots.len(), |n| i + n);
    (i - first, end - first)
}

/// Fill `context_before` / `context_after` with up to `words` words on
/// each side of the span.
pub fn attach_context(result: &mut MatchResult, text: &str, words: usize) {
    let start = result.start_offset.min(text.len());
    let end = result.end_offset.min(text.len()).max(start);

    let before: Vec<&str> = text
        .get(..start)
        .unwrap_or("")
        .split_whitespace()
        .rev()
        .take(words)
        .collect();
    let after: Vec<&str> = text
        .get(end..)
        .unwrap_or("")
        .split_whitespace()
        .take(words)
        .collect();

    result.context_before = (!before.is_empty())
        .then(|| before.into_iter().rev().collect::<Vec<_>>().join(" "));
    result.context_after = (!after.is_empty()).then(|| after.join(" "));
}

/// Full synchronous cascade without external tiers: anchor pass, fuzzy
/// per chunk, synthetic fallback. Returns one result per candidate.
pub fn locate_all(
    candidates: &[CandidateChunk],
    index: &ReferenceIndex,
    config: &MatcherConfig,
) -> Vec<MatchResult> {
    let slots = anchor_pass(candidates, index, config);
    candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            if let Some(anchored) = &slots[i] {
                return anchored.clone();
            }
            let (prior_end, next_start) = neighbor_hints(&slots, i);
            let ctx = TierContext {
                index,
                config,
                prior_end,
                next_start,
                gap_slot: Some(gap_slot(&slots, i)),
                total: candidates.len(),
            };
            run_tiers(APPROXIMATE_TIERS, candidate, &ctx)
                .unwrap_or_else(|| synthetic_tier(candidate, &ctx))
        })
        .collect()
}
