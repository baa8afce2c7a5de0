//! Language-model assisted location.
//!
//! The model is shown a window of the reference text around the chunk's
//! expected position and asked to quote the passage that the rewritten
//! chunk came from. The quote is then located inside the window, verbatim
//! first and by trigram similarity second. The model never supplies
//! offsets directly.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use chunk_locator_core::matcher::{AssistTier, TierContext};
use chunk_locator_core::models::{CandidateChunk, ConfidenceTier, MatchResult};

use crate::config::AiConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Confidence assigned to every AI-assisted match.
pub const AI_ASSISTED_CONFIDENCE: f64 = 0.45;

const NO_MATCH: &str = "NONE";

const SYSTEM_PROMPT: &str = "You align rewritten text with its source. \
Given a SOURCE excerpt and a REWRITTEN passage, reply with the exact \
contiguous text from SOURCE that the passage was derived from, copied \
character for character. Reply with NONE if no part of SOURCE matches.";

/// Something that can quote the source passage behind a rewritten chunk.
#[async_trait]
pub trait QuoteModel: Send + Sync {
    /// `Ok(None)` when the model finds nothing to quote.
    async fn quote(&self, rewritten: &str, source: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatProvider {
    OpenAi,
    Ollama,
}

/// Chat-completions client for OpenAI or a local Ollama instance.
pub struct ChatModel {
    http: reqwest::Client,
    provider: ChatProvider,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl ChatModel {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ai.model required"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let (provider, base_url, api_key) = match config.provider.as_str() {
            "openai" => {
                let key = std::env::var("OPENAI_API_KEY")
                    .context("OPENAI_API_KEY environment variable not set")?;
                (
                    ChatProvider::OpenAi,
                    config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
                    Some(key),
                )
            }
            "ollama" => (
                ChatProvider::Ollama,
                config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
                None,
            ),
            other => bail!("Unknown ai provider: {}", other),
        };

        Ok(Self {
            http,
            provider,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn chat(&self, user: &str) -> Result<String> {
        let messages = serde_json::json!([
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": user},
        ]);

        match self.provider {
            ChatProvider::OpenAi => {
                let payload = serde_json::json!({
                    "model": self.model,
                    "messages": messages,
                    "temperature": 0.0,
                });
                let mut req = self
                    .http
                    .post(format!("{}/chat/completions", self.base_url))
                    .json(&payload);
                if let Some(key) = &self.api_key {
                    req = req.bearer_auth(key);
                }
                let response = req.send().await.context("chat request failed")?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    bail!("OpenAI chat error {}: {}", status, body);
                }
                let json: serde_json::Value = response.json().await?;
                parse_openai_chat(&json)
            }
            ChatProvider::Ollama => {
                let payload = serde_json::json!({
                    "model": self.model,
                    "messages": messages,
                    "stream": false,
                    "options": {"temperature": 0.0},
                });
                let response = self
                    .http
                    .post(format!("{}/api/chat", self.base_url))
                    .json(&payload)
                    .send()
                    .await
                    .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.base_url))?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    bail!("Ollama chat error {}: {}", status, body);
                }
                let json: serde_json::Value = response.json().await?;
                parse_ollama_chat(&json)
            }
        }
    }
}

#[async_trait]
impl QuoteModel for ChatModel {
    async fn quote(&self, rewritten: &str, source: &str) -> Result<Option<String>> {
        let user = format!("SOURCE:\n{}\n\nREWRITTEN:\n{}", source, rewritten);
        let reply = self.chat(&user).await?;
        Ok(clean_quote(&reply))
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

fn parse_ollama_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

/// Strip wrapping quotes / code fences; `None` for empty or NONE replies.
fn clean_quote(reply: &str) -> Option<String> {
    let mut text = reply.trim();
    if let Some(inner) = text.strip_prefix("```") {
        text = inner
            .split_once('\n')
            .map(|(_, rest)| rest)
            .unwrap_or(inner)
            .trim_end_matches('`')
            .trim();
    }
    for (open, close) in [('"', '"'), ('\u{201C}', '\u{201D}')] {
        if text.len() > 1 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
        }
    }
    if text.is_empty() || text.eq_ignore_ascii_case(NO_MATCH) {
        None
    } else {
        Some(text.to_string())
    }
}

/// AI-assisted tier: asks a [`QuoteModel`] for the source passage.
pub struct AiAssistTier {
    model: Arc<dyn QuoteModel>,
    max_span_chars: usize,
}

impl AiAssistTier {
    pub fn new(model: Arc<dyn QuoteModel>, max_span_chars: usize) -> Self {
        Self {
            model,
            max_span_chars,
        }
    }

    /// Expected region widened by the needle length on both sides and
    /// capped so the prompt stays bounded.
    fn window(&self, needle_len: usize, ctx: &TierContext<'_>) -> (usize, usize) {
        let trigrams = &ctx.index.trigrams;
        let (from, to) = ctx.expected_region(needle_len);
        let from = trigrams.floor_boundary(from.saturating_sub(needle_len));
        let cap = self.max_span_chars.saturating_mul(8).max(needle_len * 3);
        let to = to.saturating_add(needle_len).min(from.saturating_add(cap));
        (from, trigrams.floor_boundary(to.min(trigrams.len_bytes())))
    }
}

#[async_trait]
impl AssistTier for AiAssistTier {
    fn name(&self) -> &str {
        "ai_assisted"
    }

    async fn locate(
        &self,
        candidate: &CandidateChunk,
        ctx: &TierContext<'_>,
    ) -> Result<Option<MatchResult>> {
        let needle = candidate.content.trim();
        if needle.is_empty() || needle.chars().count() > self.max_span_chars {
            return Ok(None);
        }

        let (from, to) = self.window(needle.len(), ctx);
        let text = ctx.index.text();
        let Some(window) = text.get(from..to).filter(|w| !w.trim().is_empty()) else {
            return Ok(None);
        };

        let Some(quote) = self.model.quote(needle, window).await? else {
            tracing::debug!(chunk = candidate.index, "model found no source passage");
            return Ok(None);
        };

        let span = match window.find(quote.as_str()) {
            Some(pos) => Some((from + pos, from + pos + quote.len())),
            None => ctx
                .index
                .trigrams
                .search(&quote, from, to, &ctx.config.slide)
                .filter(|m| m.score >= ctx.config.fuzzy_min && m.end > m.start)
                .map(|m| (m.start, m.end)),
        };
        let Some((start, end)) = span else {
            tracing::debug!(chunk = candidate.index, "model quote not found in window");
            return Ok(None);
        };

        Ok(Some(MatchResult::new(
            candidate.index,
            start,
            end,
            ConfidenceTier::AiAssisted,
            AI_ASSISTED_CONFIDENCE,
            "ai_assisted",
        )))
    }
}
