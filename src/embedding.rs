//! Embedding providers and the semantic matching tier.
//!
//! Providers:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! [`SemanticTier`] embeds every structural chunk once per document, then
//! anchors a candidate on its most similar structural chunk and refines
//! the position inside that chunk's span with a trigram slide.
//!
//! # Retry Strategy
//!
//! Both HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use chunk_locator_core::embedding::{nearest, semantic_confidence};
pub use chunk_locator_core::embedding::EmbeddingProvider;
use chunk_locator_core::matcher::{AssistTier, TierContext};
use chunk_locator_core::models::{CandidateChunk, ConfidenceTier, MatchResult};
use chunk_locator_core::projector::StructuralLayout;

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Something that turns texts into vectors, one per input, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// [`Embedder`] backed by the configured HTTP provider.
pub struct ConfiguredEmbedder {
    provider: Box<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
}

impl ConfiguredEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        tracing::info!(
            provider = %config.provider,
            model = provider.model_name(),
            dims = provider.dims(),
            "embedding provider ready"
        );
        Ok(Self {
            provider,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Embedder for ConfiguredEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let vectors = embed_texts(self.provider.as_ref(), &self.config, batch).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "Embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Embed one batch of texts with the provider named in `config`.
pub async fn embed_texts(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let vectors = match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await?,
        "ollama" => embed_ollama(config, texts).await?,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    };
    if let Some(v) = vectors.iter().find(|v| v.len() != provider.dims()) {
        bail!(
            "Embedding dimension mismatch: expected {}, got {}",
            provider.dims(),
            v.len()
        );
    }
    Ok(vectors)
}

// ============ Disabled Provider ============

/// A no-op embedding provider.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let base = config.url.as_deref().unwrap_or(OPENAI_URL);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/embeddings", base.trim_end_matches('/')))
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_response(&json);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                    continue;
                }
                bail!("OpenAI API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance's `/api/embed`.
pub struct OllamaProvider {
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let url = config.url.as_deref().unwrap_or(OLLAMA_URL);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/api/embed", url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_ollama_response(&json);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("Ollama API error {}: {}", status, body_text));
                    continue;
                }
                bail!("Ollama API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    url,
                    e
                ));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama embedding failed after retries")))
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            Ok(embedding
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect())
        })
        .collect()
}

/// Instantiate the provider named in `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Semantic tier ============

/// Anchors candidates on their most similar structural chunk.
pub struct SemanticTier {
    embedder: Arc<dyn Embedder>,
    layout: Arc<StructuralLayout>,
    /// One vector per structural chunk, by extractor position.
    vectors: Vec<Vec<f32>>,
}

impl SemanticTier {
    /// Embed every structural chunk of `layout` up front.
    pub async fn prepare(embedder: Arc<dyn Embedder>, layout: Arc<StructuralLayout>) -> Result<Self> {
        let texts: Vec<String> = (0..layout.len())
            .filter_map(|i| layout.get(i))
            .map(|p| p.chunk.content.clone())
            .collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed(&texts).await?
        };
        if vectors.len() != texts.len() {
            bail!(
                "Expected {} structural embeddings, got {}",
                texts.len(),
                vectors.len()
            );
        }
        tracing::debug!(structural = vectors.len(), "structural chunks embedded");
        Ok(Self {
            embedder,
            layout,
            vectors,
        })
    }
}

#[async_trait]
impl AssistTier for SemanticTier {
    fn name(&self) -> &str {
        "semantic"
    }

    async fn locate(
        &self,
        candidate: &CandidateChunk,
        ctx: &TierContext<'_>,
    ) -> Result<Option<MatchResult>> {
        let needle = candidate.content.trim();
        if needle.is_empty() || self.vectors.is_empty() {
            return Ok(None);
        }
        let query = self.embedder.embed(&[needle.to_string()]).await?;
        let Some(query) = query.first() else {
            return Ok(None);
        };
        let Some((best, cosine)) = nearest(query, &self.vectors) else {
            return Ok(None);
        };
        if (cosine as f64) < ctx.config.semantic_min {
            return Ok(None);
        }
        let Some(anchor) = self.layout.get(best) else {
            return Ok(None);
        };

        let trigrams = &ctx.index.trigrams;
        let (start, end) = match trigrams.search(needle, anchor.start, anchor.end, &ctx.config.slide) {
            Some(window) if window.end > window.start => (window.start, window.end),
            _ => (
                anchor.start,
                trigrams
                    .advance(anchor.start, needle.chars().count())
                    .min(anchor.end.max(trigrams.next_boundary(anchor.start))),
            ),
        };
        if end <= start {
            return Ok(None);
        }

        Ok(Some(MatchResult::new(
            candidate.index,
            start,
            end,
            ConfidenceTier::Semantic,
            semantic_confidence(cosine, ctx.config.semantic_min),
            "semantic",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunk_locator_core::matcher::{MatcherConfig, ReferenceIndex};
    use chunk_locator_core::models::{ExtractionMode, StructuralChunk};

    /// Embeds by keyword: one axis per topic word.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    ["river", "budget", "music"]
                        .iter()
                        .map(|k| if t.contains(k) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect())
        }
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_ollama() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.25]]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_create_provider_disabled() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
    }

    #[tokio::test]
    async fn test_semantic_tier_anchors_on_structural_chunk() {
        let text = "The river flooded the valley every spring. The council debated the budget for weeks.";
        let index = ReferenceIndex::build(text);
        let config = MatcherConfig::default();
        let chunks = vec![
            StructuralChunk {
                content: "The river flooded the valley every spring.".into(),
                ..Default::default()
            },
            StructuralChunk {
                content: "The council debated the budget for weeks.".into(),
                ..Default::default()
            },
        ];
        let layout = Arc::new(StructuralLayout::build(&chunks, &index, &config, ExtractionMode::Pdf));
        let tier = SemanticTier::prepare(Arc::new(KeywordEmbedder), layout).await.unwrap();

        let candidate = CandidateChunk {
            index: 0,
            content: "Spending plans (the budget) were argued over at length.".into(),
        };
        let ctx = TierContext {
            index: &index,
            config: &config,
            prior_end: 0,
            next_start: None,
            gap_slot: None,
            total: 1,
        };
        let r = tier.locate(&candidate, &ctx).await.unwrap().unwrap();
        assert_eq!(r.confidence_tier, ConfidenceTier::Semantic);
        assert!(r.confidence_score >= 0.5 && r.confidence_score < 0.75);
        let second = text.find("The council").unwrap();
        assert!(r.start_offset >= second && r.end_offset <= text.len());
    }

    #[tokio::test]
    async fn test_semantic_tier_below_threshold() {
        let text = "The river flooded the valley every spring.";
        let index = ReferenceIndex::build(text);
        let config = MatcherConfig::default();
        let chunks = vec![StructuralChunk {
            content: text.into(),
            ..Default::default()
        }];
        let layout = Arc::new(StructuralLayout::build(&chunks, &index, &config, ExtractionMode::Pdf));
        let tier = SemanticTier::prepare(Arc::new(KeywordEmbedder), layout).await.unwrap();
        let candidate = CandidateChunk {
            index: 0,
            content: "Music played all night".into(),
        };
        let ctx = TierContext {
            index: &index,
            config: &config,
            prior_end: 0,
            next_start: None,
            gap_slot: None,
            total: 1,
        };
        assert!(tier.locate(&candidate, &ctx).await.unwrap().is_none());
    }
}
