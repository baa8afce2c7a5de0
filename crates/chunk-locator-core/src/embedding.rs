//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that embedding backends
//! implement, plus pure helpers for similarity and for mapping a cosine
//! score into the semantic tier's confidence band.
//!
//! Concrete providers (OpenAI, Ollama) live in the `chunk-locator` app
//! crate.

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Index and score of the vector in `candidates` most similar to `query`.
/// Ties keep the earliest candidate.
pub fn nearest(query: &[f32], candidates: &[Vec<f32>]) -> Option<(usize, f32)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, v)| (i, cosine_similarity(query, v)))
        .fold(None, |best, (i, score)| match best {
            Some((_, s)) if s >= score => best,
            _ => Some((i, score)),
        })
}

const SEMANTIC_FLOOR: f64 = 0.5;
const SEMANTIC_CEILING: f64 = 0.75;

/// Map a cosine score at or above `min` into `[0.5, 0.75)`.
///
/// ```rust
/// use chunk_locator_core::embedding::semantic_confidence;
///
/// assert!((semantic_confidence(0.80, 0.80) - 0.5).abs() < 1e-6);
/// assert!(semantic_confidence(1.0, 0.80) < 0.75);
/// ```
pub fn semantic_confidence(cosine: f32, min: f64) -> f64 {
    let span = (1.0 - min).max(f64::EPSILON);
    let t = ((cosine as f64 - min) / span).clamp(0.0, 1.0);
    let score = SEMANTIC_FLOOR + t * (SEMANTIC_CEILING - SEMANTIC_FLOOR);
    score.min(SEMANTIC_CEILING - 0.001)
}
