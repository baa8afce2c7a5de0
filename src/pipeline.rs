//! The `locate` stage.
//!
//! Flow for one document:
//!
//! ```text
//! cache / extractor ─► ReferenceIndex + StructuralLayout
//!                  ─► anchor pass (exact, normalized; sequential)
//!                  ─► per-chunk tasks (fuzzy ─► semantic ─► AI ─► synthetic)
//!                  ─► overlap resolver ─► projector ─► context ─► store
//! ```
//!
//! Per-chunk tasks run on a [`JoinSet`]. Network tiers hold a permit from a
//! shared [`Semaphore`] while they run, are bounded by a per-call timeout,
//! and stop as soon as the [`CancellationToken`] fires. A chunk whose
//! network tiers fail, time out, or are cancelled falls to the synthetic
//! tier, so every candidate still gets a position.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use chunk_locator_core::cache::{ExtractionCache, StructuralExtractor};
use chunk_locator_core::matcher::{
    anchor_pass, attach_context, gap_slot, neighbor_hints, run_tiers, synthetic_tier, AssistTier,
    APPROXIMATE_TIERS,
};
use chunk_locator_core::models::{
    content_hash, CandidateChunk, ChunkRecord, ConfidenceTier, DocumentRecord, MatchResult,
};
use chunk_locator_core::overlap::resolve_overlaps;
use chunk_locator_core::projector::StructuralLayout;
use chunk_locator_core::store::Store;
use chunk_locator_core::{MatcherConfig, ReferenceIndex, TierContext};

use crate::assist::{AiAssistTier, ChatModel, QuoteModel};
use crate::config::Config;
use crate::embedding::{ConfiguredEmbedder, Embedder, SemanticTier};

/// Precondition failures and fatal storage errors. Matching difficulty
/// never produces an error.
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("reference text is empty")]
    EmptyReference,
    #[error("no candidate chunks supplied")]
    NoCandidates,
    #[error("reference text has {chars} characters, fewer than the {candidates} candidates")]
    ReferenceTooShort { candidates: usize, chars: usize },
    #[error("structural extraction failed: {0:#}")]
    Extraction(#[source] anyhow::Error),
    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

/// One document's worth of input.
#[derive(Debug, Clone)]
pub struct LocateInput {
    pub document_id: String,
    pub title: Option<String>,
    pub reference_text: String,
    pub candidates: Vec<CandidateChunk>,
}

/// Concurrency and timeout limits for the per-chunk phase.
#[derive(Debug, Clone, Copy)]
pub struct StageLimits {
    pub max_in_flight: usize,
    pub call_timeout: Duration,
}

impl StageLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_in_flight: config.pipeline.max_in_flight.max(1),
            call_timeout: Duration::from_secs(config.pipeline.stage_timeout_secs),
        }
    }
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            max_in_flight: 10,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// External collaborators for the semantic and AI-assisted tiers. Either
/// may be absent.
#[derive(Clone, Default)]
pub struct Assists {
    pub embedder: Option<Arc<dyn Embedder>>,
    pub quote_model: Option<Arc<dyn QuoteModel>>,
    pub max_span_chars: usize,
}

impl Assists {
    /// Collaborators enabled in `config`. A provider that cannot be built
    /// is logged and left out.
    pub fn from_config(config: &Config) -> Self {
        let embedder: Option<Arc<dyn Embedder>> = if config.embedding.is_enabled() {
            match ConfiguredEmbedder::new(&config.embedding) {
                Ok(e) => Some(Arc::new(e)),
                Err(e) => {
                    tracing::warn!(error = %e, "semantic tier disabled");
                    None
                }
            }
        } else {
            None
        };

        let quote_model: Option<Arc<dyn QuoteModel>> = if config.ai.enabled {
            match ChatModel::new(&config.ai) {
                Ok(m) => Some(Arc::new(m)),
                Err(e) => {
                    tracing::warn!(error = %e, "AI-assisted tier disabled");
                    None
                }
            }
        } else {
            None
        };

        Self {
            embedder,
            quote_model,
            max_span_chars: config.ai.max_span_chars,
        }
    }

    /// Build the per-document tier list, semantic before AI.
    async fn tiers(&self, layout: &Arc<StructuralLayout>, limits: StageLimits) -> Vec<Arc<dyn AssistTier>> {
        let mut tiers: Vec<Arc<dyn AssistTier>> = Vec::new();

        if let Some(embedder) = &self.embedder {
            let prepared = tokio::time::timeout(
                limits.call_timeout,
                SemanticTier::prepare(embedder.clone(), layout.clone()),
            )
            .await;
            match prepared {
                Ok(Ok(tier)) => tiers.push(Arc::new(tier)),
                Ok(Err(e)) => tracing::warn!(error = %e, "structural embeddings failed; semantic tier skipped"),
                Err(_) => tracing::warn!("structural embeddings timed out; semantic tier skipped"),
            }
        }

        if let Some(model) = &self.quote_model {
            tiers.push(Arc::new(AiAssistTier::new(model.clone(), self.max_span_chars)));
        }
        tiers
    }
}

/// Counts reported after a run.
#[derive(Debug, Clone, Serialize)]
pub struct LocateReport {
    pub document_id: String,
    pub chunks: usize,
    pub tiers: BTreeMap<ConfidenceTier, usize>,
    pub overlap_corrected: usize,
    pub warnings: usize,
    pub cancelled: usize,
    pub cache_hit: bool,
    pub elapsed_ms: u64,
}

/// Result of [`locate_document`]: the report and the stored rows.
#[derive(Debug, Clone)]
pub struct LocateOutcome {
    pub report: LocateReport,
    pub chunks: Vec<ChunkRecord>,
}

/// Output of [`match_candidates`].
#[derive(Debug)]
pub struct MatchOutcome {
    pub results: Vec<MatchResult>,
    pub cancelled: usize,
}

fn check_preconditions(text: &str, candidates: &[CandidateChunk]) -> Result<(), LocateError> {
    if text.trim().is_empty() {
        return Err(LocateError::EmptyReference);
    }
    if candidates.is_empty() {
        return Err(LocateError::NoCandidates);
    }
    let chars = text.chars().count();
    if candidates.len() > chars {
        return Err(LocateError::ReferenceTooShort {
            candidates: candidates.len(),
            chars,
        });
    }
    Ok(())
}

/// Run the whole stage for one document and persist the results.
pub async fn locate_document(
    store: &dyn Store,
    extractor: &dyn StructuralExtractor,
    input: LocateInput,
    matcher: &MatcherConfig,
    assists: &Assists,
    limits: StageLimits,
    cancel: CancellationToken,
) -> Result<LocateOutcome, LocateError> {
    let started = Instant::now();
    check_preconditions(&input.reference_text, &input.candidates)?;

    let document_id = input.document_id.as_str();
    let hash = content_hash(&input.reference_text);
    tracing::info!(
        document_id,
        candidates = input.candidates.len(),
        bytes = input.reference_text.len(),
        "locating chunks"
    );

    let now = Utc::now().timestamp();
    let created_at = store
        .get_document(document_id)
        .await
        .map_err(LocateError::Storage)?
        .map(|d| d.created_at)
        .unwrap_or(now);
    store
        .upsert_document(&DocumentRecord {
            id: input.document_id.clone(),
            title: input.title.clone(),
            reference_text: input.reference_text.clone(),
            content_hash: hash.clone(),
            created_at,
            updated_at: now,
        })
        .await
        .map_err(LocateError::Storage)?;

    let cache = ExtractionCache::new(store);
    let (extraction, cache_hit) = cache
        .load_or_extract(document_id, &hash, extractor)
        .await
        .map_err(LocateError::Extraction)?;
    tracing::debug!(document_id, cache_hit, structural = extraction.structural_chunks.len(), "extraction ready");

    let index = Arc::new(ReferenceIndex::build(&input.reference_text));
    let config = Arc::new(matcher.clone());
    let layout = Arc::new(StructuralLayout::build(
        &extraction.structural_chunks,
        &index,
        &config,
        extraction.mode,
    ));
    let tiers = assists.tiers(&layout, limits).await;

    let MatchOutcome {
        mut results,
        cancelled,
    } = match_candidates(&input.candidates, index.clone(), config.clone(), tiers, limits, cancel).await;

    let overlap_corrected = resolve_overlaps(&mut results, &index.trigrams);
    layout.project_all(&mut results);
    for r in &mut results {
        attach_context(r, index.text(), config.context_words);
    }

    let chunks: Vec<ChunkRecord> = input
        .candidates
        .iter()
        .zip(results)
        .map(|(candidate, result)| ChunkRecord {
            id: Uuid::new_v4().to_string(),
            document_id: input.document_id.clone(),
            content: candidate.content.clone(),
            result,
        })
        .collect();
    store
        .replace_chunks(document_id, &chunks)
        .await
        .map_err(LocateError::Storage)?;

    let mut tiers = BTreeMap::new();
    for c in &chunks {
        *tiers.entry(c.result.confidence_tier).or_insert(0) += 1;
    }
    let report = LocateReport {
        document_id: input.document_id.clone(),
        chunks: chunks.len(),
        tiers,
        overlap_corrected,
        warnings: chunks
            .iter()
            .filter(|c| c.result.validation_warning.is_some())
            .count(),
        cancelled,
        cache_hit,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        document_id,
        chunks = report.chunks,
        overlaps = report.overlap_corrected,
        warnings = report.warnings,
        cache_hit,
        elapsed_ms = report.elapsed_ms,
        "chunks located"
    );

    Ok(LocateOutcome { report, chunks })
}

/// Match every candidate. Returns one result per candidate, in order.
///
/// Results are not yet overlap-resolved or projected.
pub async fn match_candidates(
    candidates: &[CandidateChunk],
    index: Arc<ReferenceIndex>,
    config: Arc<MatcherConfig>,
    tiers: Vec<Arc<dyn AssistTier>>,
    limits: StageLimits,
    cancel: CancellationToken,
) -> MatchOutcome {
    let mut slots = anchor_pass(candidates, &index, &config);
    let anchored = slots.iter().filter(|s| s.is_some()).count();
    tracing::debug!(anchored, total = candidates.len(), "anchor pass done");

    let total = candidates.len();
    let tiers = Arc::new(tiers);
    let permits = Arc::new(Semaphore::new(limits.max_in_flight.max(1)));
    let mut set = JoinSet::new();

    for (i, candidate) in candidates.iter().enumerate() {
        if slots[i].is_some() {
            continue;
        }
        let (prior_end, next_start) = neighbor_hints(&slots, i);
        let task = ChunkTask {
            slot: i,
            candidate: candidate.clone(),
            index: index.clone(),
            config: config.clone(),
            tiers: tiers.clone(),
            permits: permits.clone(),
            cancel: cancel.clone(),
            call_timeout: limits.call_timeout,
            prior_end,
            next_start,
            gap_slot: gap_slot(&slots, i),
            total,
        };
        set.spawn(task.run());
    }

    let mut cancelled = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((slot, result, was_cancelled)) => {
                if was_cancelled {
                    cancelled += 1;
                }
                slots[slot] = Some(result);
            }
            Err(e) => tracing::warn!(error = %e, "chunk task failed"),
        }
    }

    // Slots left empty belong to tasks that panicked.
    let results = candidates
        .iter()
        .zip(slots)
        .enumerate()
        .map(|(i, (candidate, slot))| {
            slot.unwrap_or_else(|| {
                let ctx = TierContext {
                    index: &index,
                    config: &config,
                    prior_end: 0,
                    next_start: None,
                    gap_slot: None,
                    total,
                };
                tracing::warn!(chunk = i, "no result collected; using synthetic position");
                synthetic_tier(candidate, &ctx)
            })
        })
        .collect();

    MatchOutcome { results, cancelled }
}

struct ChunkTask {
    slot: usize,
    candidate: CandidateChunk,
    index: Arc<ReferenceIndex>,
    config: Arc<MatcherConfig>,
    tiers: Arc<Vec<Arc<dyn AssistTier>>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    call_timeout: Duration,
    prior_end: usize,
    next_start: Option<usize>,
    gap_slot: (usize, usize),
    total: usize,
}

impl ChunkTask {
    /// `(slot, result, cancelled)`.
    async fn run(self) -> (usize, MatchResult, bool) {
        let ctx = TierContext {
            index: &self.index,
            config: &self.config,
            prior_end: self.prior_end,
            next_start: self.next_start,
            gap_slot: Some(self.gap_slot),
            total: self.total,
        };

        if let Some(result) = run_tiers(APPROXIMATE_TIERS, &self.candidate, &ctx) {
            return (self.slot, result, false);
        }

        let mut cancelled = false;
        for tier in self.tiers.iter() {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => None,
                permit = self.permits.clone().acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                cancelled = true;
                break;
            };

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => None,
                r = tokio::time::timeout(self.call_timeout, tier.locate(&self.candidate, &ctx)) => Some(r),
            };
            match attempt {
                None => {
                    cancelled = true;
                    break;
                }
                Some(Ok(Ok(Some(result)))) => return (self.slot, result, false),
                Some(Ok(Ok(None))) => {}
                Some(Ok(Err(e))) => {
                    tracing::debug!(chunk = self.candidate.index, tier = tier.name(), error = %e, "tier failed")
                }
                Some(Err(_)) => {
                    tracing::debug!(chunk = self.candidate.index, tier = tier.name(), "tier timed out")
                }
            }
        }

        let mut result = synthetic_tier(&self.candidate, &ctx);
        if cancelled {
            result.push_warning("cancelled: network tiers were interrupted");
        }
        (self.slot, result, cancelled)
    }
}
