//! TOML configuration for the `chunkloc` binary.
//!
//! Only `[db]` is required; every other section falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/chunkloc.sqlite"
//!
//! [matcher]
//! fuzzy_min = 0.75
//! semantic_min = 0.80
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [pipeline]
//! max_in_flight = 10
//! ```

use anyhow::{Context, Result};
use chunk_locator_core::ledger::{LedgerPolicy, DEFAULT_HISTORY_RETENTION};
use chunk_locator_core::MatcherConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Defaults for everything, with the database at `db_path`.
    pub fn with_db(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            matcher: MatcherConfig::default(),
            embedding: EmbeddingConfig::default(),
            ai: AiConfig::default(),
            pipeline: PipelineConfig::default(),
            ledger: LedgerConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            history_retention: self.ledger.history_retention,
            context_words: self.matcher.context_words,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL; provider default when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Language-model assisted location. Off unless `enabled = true`.
#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ai_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Longer candidates skip this tier.
    #[serde(default = "default_max_span_chars")]
    pub max_span_chars: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_ai_provider(),
            model: None,
            url: None,
            max_span_chars: default_max_span_chars(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_ai_provider() -> String {
    "openai".to_string()
}
fn default_max_span_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Bound on concurrently running semantic / AI lookups.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Per-call timeout for the network tiers.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_extractor_version")]
    pub extractor_version: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            stage_timeout_secs: default_stage_timeout_secs(),
            extractor_version: default_extractor_version(),
        }
    }
}

fn default_max_in_flight() -> usize {
    10
}
fn default_stage_timeout_secs() -> u64 {
    60
}
fn default_extractor_version() -> String {
    "json-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            history_retention: default_history_retention(),
        }
    }
}

fn default_history_retention() -> usize {
    DEFAULT_HISTORY_RETENTION
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let m = &config.matcher;
    for (name, value) in [
        ("matcher.fuzzy_min", m.fuzzy_min),
        ("matcher.semantic_min", m.semantic_min),
        ("matcher.early_exit", m.slide.early_exit),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 1.0]", name);
        }
    }
    if m.slide.stride_pct <= 0.0 || m.slide.wide_stride_pct <= 0.0 {
        anyhow::bail!("matcher.stride_pct and matcher.wide_stride_pct must be > 0");
    }
    if m.slide.max_windows == 0 {
        anyhow::bail!("matcher.max_windows must be >= 1");
    }

    if config.pipeline.max_in_flight == 0 {
        anyhow::bail!("pipeline.max_in_flight must be >= 1");
    }
    if config.ledger.history_retention == 0 {
        anyhow::bail!("ledger.history_retention must be >= 1");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if e.is_enabled() {
        if e.dims.is_none() || e.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
        }
        if e.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
        if e.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }
    }

    let ai = &config.ai;
    if ai.enabled {
        match ai.provider.as_str() {
            "openai" | "ollama" => {}
            other => anyhow::bail!("Unknown ai provider: '{}'. Must be openai or ollama.", other),
        }
        if ai.model.is_none() {
            anyhow::bail!("ai.model must be specified when ai.enabled = true");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(config.matcher.fuzzy_min, 0.75);
        assert_eq!(config.matcher.slide.max_windows, 100);
        assert_eq!(config.pipeline.max_in_flight, 10);
        assert_eq!(config.ledger.history_retention, 50);
        assert!(!config.embedding.is_enabled());
        assert!(!config.ai.enabled);
    }

    #[test]
    fn test_flat_matcher_keys() {
        let config = parse(
            "[db]\npath = \"x\"\n[matcher]\nfuzzy_min = 0.8\nstride_pct = 0.05\nmax_windows = 400\n",
        )
        .unwrap();
        assert_eq!(config.matcher.fuzzy_min, 0.8);
        assert_eq!(config.matcher.slide.stride_pct, 0.05);
        assert_eq!(config.matcher.slide.max_windows, 400);
        assert_eq!(config.matcher.slide.early_exit, 0.95);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        assert!(parse("[db]\npath = \"x\"\n[matcher]\nfuzzy_min = 1.5\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_enabled_embedding_needs_model_and_dims() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\n").is_err());
        assert!(parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\ndims = 8\n"
        )
        .is_ok());
    }

    #[test]
    fn test_enabled_ai_needs_model() {
        assert!(parse("[db]\npath = \"x\"\n[ai]\nenabled = true\n").is_err());
    }
}
