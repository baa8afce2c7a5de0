//! Validation and correction rules for positioned chunks.
//!
//! A chunk is either unvalidated, validated by a reviewer, or corrected
//! (which also counts as validated). Corrections are checked against the
//! reference text and the chunk's immediate neighbors before anything is
//! written, and each accepted correction appends to a bounded history.
//!
//! The rules live in [`apply_correction`] so every [`Store`] enforces them
//! the same way inside its own transaction; [`validate`] and [`correct`]
//! are the entry points callers use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matcher::attach_context;
use crate::models::{ChunkRecord, CorrectionEntry};
use crate::store::Store;

pub const DEFAULT_HISTORY_RETENTION: usize = 50;

/// Which neighbor a rejected correction collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeighborSide {
    Previous,
    Next,
}

impl std::fmt::Display for NeighborSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Previous => "previous",
            Self::Next => "next",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("chunk not found: {0}")]
    NotFound(String),

    #[error("invalid range [{start}, {end}): {reason}")]
    InvalidRange {
        start: usize,
        end: usize,
        reason: &'static str,
    },

    #[error("range [{start}, {end}) exceeds reference text length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },

    #[error("range overlaps {side} chunk {neighbor_id} (index {neighbor_index}) at [{neighbor_start}, {neighbor_end})")]
    Overlap {
        neighbor_id: String,
        neighbor_index: usize,
        neighbor_start: usize,
        neighbor_end: usize,
        side: NeighborSide,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A reviewer's requested span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub start: usize,
    pub end: usize,
    pub reason: String,
}

/// Knobs applied when a correction is accepted.
#[derive(Debug, Clone, Copy)]
pub struct LedgerPolicy {
    pub history_retention: usize,
    pub context_words: usize,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            history_retention: DEFAULT_HISTORY_RETENTION,
            context_words: 5,
        }
    }
}

/// Append `entry`, dropping the oldest entries beyond `retention`.
pub fn push_correction(history: &mut Vec<CorrectionEntry>, entry: CorrectionEntry, retention: usize) {
    history.push(entry);
    if history.len() > retention {
        let excess = history.len() - retention;
        history.drain(..excess);
    }
}

/// Check `request` and, when it is acceptable, move `chunk` to the new
/// span. `prev` and `next` are the chunks immediately before and after it
/// in the same document. On error `chunk` is left untouched.
pub fn apply_correction(
    chunk: &mut ChunkRecord,
    prev: Option<&ChunkRecord>,
    next: Option<&ChunkRecord>,
    reference: &str,
    request: &CorrectionRequest,
    policy: &LedgerPolicy,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let (start, end) = (request.start, request.end);
    if start >= end {
        return Err(LedgerError::InvalidRange {
            start,
            end,
            reason: "start must be less than end",
        });
    }
    if end > reference.len() {
        return Err(LedgerError::OutOfBounds {
            start,
            end,
            len: reference.len(),
        });
    }
    if !reference.is_char_boundary(start) || !reference.is_char_boundary(end) {
        return Err(LedgerError::InvalidRange {
            start,
            end,
            reason: "offsets must fall on character boundaries",
        });
    }

    if let Some(p) = prev.filter(|p| start < p.result.end_offset) {
        return Err(overlap(p, NeighborSide::Previous));
    }
    if let Some(n) = next.filter(|n| end > n.result.start_offset) {
        return Err(overlap(n, NeighborSide::Next));
    }

    let r = &mut chunk.result;
    let entry = CorrectionEntry {
        timestamp: now,
        old_offsets: r.offsets(),
        new_offsets: [start, end],
        reason: request.reason.clone(),
    };
    push_correction(&mut r.correction_history, entry, policy.history_retention);
    r.start_offset = start;
    r.end_offset = end;
    r.position_corrected = true;
    r.position_validated = true;
    attach_context(r, reference, policy.context_words);
    Ok(())
}

fn overlap(neighbor: &ChunkRecord, side: NeighborSide) -> LedgerError {
    LedgerError::Overlap {
        neighbor_id: neighbor.id.clone(),
        neighbor_index: neighbor.result.chunk_index,
        neighbor_start: neighbor.result.start_offset,
        neighbor_end: neighbor.result.end_offset,
        side,
    }
}

/// Mark a chunk's position as reviewed and accepted.
pub async fn validate(store: &dyn Store, chunk_id: &str) -> Result<ChunkRecord, LedgerError> {
    let record = store.mark_validated(chunk_id).await?;
    tracing::info!(chunk_id, "position validated");
    Ok(record)
}

/// Move a chunk to a reviewer-supplied span.
pub async fn correct(
    store: &dyn Store,
    chunk_id: &str,
    request: &CorrectionRequest,
    policy: &LedgerPolicy,
) -> Result<ChunkRecord, LedgerError> {
    match store.correct_chunk(chunk_id, request, policy).await {
        Ok(record) => {
            tracing::info!(
                chunk_id,
                start = request.start,
                end = request.end,
                history = record.result.correction_history.len(),
                "position corrected"
            );
            Ok(record)
        }
        Err(e) => {
            tracing::warn!(chunk_id, error = %e, "correction rejected");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceTier, MatchResult};

    const TEXT: &str = "alpha beta gamma delta epsilon zeta";

    fn record(id: &str, index: usize, start: usize, end: usize) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document_id: "doc".to_string(),
            content: TEXT[start..end].to_string(),
            result: MatchResult::new(index, start, end, ConfidenceTier::Fuzzy, 0.8, "fuzzy"),
        }
    }

    fn req(start: usize, end: usize) -> CorrectionRequest {
        CorrectionRequest {
            start,
            end,
            reason: "review".into(),
        }
    }

    #[test]
    fn test_accepts_and_records() {
        let prev = record("a", 0, 0, 5);
        let mut chunk = record("b", 1, 6, 10);
        let next = record("c", 2, 17, 22);
        apply_correction(
            &mut chunk,
            Some(&prev),
            Some(&next),
            TEXT,
            &req(6, 16),
            &LedgerPolicy::default(),
            Utc::now(),
        )
        .unwrap();
        let r = &chunk.result;
        assert_eq!(r.offsets(), [6, 16]);
        assert!(r.position_corrected && r.position_validated);
        assert_eq!(r.correction_history.len(), 1);
        assert_eq!(r.correction_history[0].old_offsets, [6, 10]);
        assert_eq!(r.context_before.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_rejects_inverted_and_empty() {
        let mut chunk = record("b", 1, 6, 10);
        for (s, e) in [(10, 6), (7, 7)] {
            let err = apply_correction(&mut chunk, None, None, TEXT, &req(s, e), &LedgerPolicy::default(), Utc::now())
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidRange { .. }));
        }
        assert_eq!(chunk.result.offsets(), [6, 10]);
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        let mut chunk = record("b", 1, 6, 10);
        let err = apply_correction(&mut chunk, None, None, TEXT, &req(6, 999), &LedgerPolicy::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::OutOfBounds { len, .. } if len == TEXT.len()));
    }

    #[test]
    fn test_rejects_overlap_with_neighbors() {
        let prev = record("a", 0, 0, 5);
        let next = record("c", 2, 17, 22);
        let mut chunk = record("b", 1, 6, 10);

        let err = apply_correction(&mut chunk, Some(&prev), Some(&next), TEXT, &req(3, 10), &LedgerPolicy::default(), Utc::now())
            .unwrap_err();
        match err {
            LedgerError::Overlap {
                neighbor_id,
                neighbor_start,
                neighbor_end,
                side,
                ..
            } => {
                assert_eq!(neighbor_id, "a");
                assert_eq!((neighbor_start, neighbor_end), (0, 5));
                assert_eq!(side, NeighborSide::Previous);
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = apply_correction(&mut chunk, Some(&prev), Some(&next), TEXT, &req(6, 20), &LedgerPolicy::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::Overlap { side: NeighborSide::Next, .. }));
        assert_eq!(chunk.result.offsets(), [6, 10]);
        assert!(chunk.result.correction_history.is_empty());
    }

    #[test]
    fn test_rejects_non_char_boundary() {
        let text = "aé b";
        let mut chunk = ChunkRecord {
            id: "x".into(),
            document_id: "doc".into(),
            content: "a".into(),
            result: MatchResult::new(0, 0, 1, ConfidenceTier::Exact, 1.0, "exact"),
        };
        let err = apply_correction(&mut chunk, None, None, text, &req(0, 2), &LedgerPolicy::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRange { .. }));
    }

    #[test]
    fn test_history_bounded_to_most_recent() {
        let mut chunk = record("b", 0, 0, 5);
        let policy = LedgerPolicy::default();
        let base = Utc::now();
        for i in 0..60 {
            let end = 5 + (i % 10);
            apply_correction(
                &mut chunk,
                None,
                None,
                TEXT,
                &CorrectionRequest {
                    start: 0,
                    end,
                    reason: format!("pass {i}"),
                },
                &policy,
                base + chrono::Duration::seconds(i as i64),
            )
            .unwrap();
        }
        let history = &chunk.result.correction_history;
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].reason, "pass 10");
        assert_eq!(history[49].reason, "pass 59");
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
