use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use claim_harness_core::lexicon::{Lexicon, LexiconTable};
use claim_harness_core::normalize::NormalizerConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_max_facts_per_item")]
    pub max_facts_per_item: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_max_claims")]
    pub max_claims: usize,
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
    #[serde(default = "default_completion_max_chars")]
    pub completion_max_chars: usize,
    /// Optional TOML file replacing the built-in pattern tables.
    #[serde(default)]
    pub lexicon_path: Option<PathBuf>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_facts_per_item: default_max_facts_per_item(),
            min_confidence: default_min_confidence(),
            max_claims: default_max_claims(),
            coverage_threshold: default_coverage_threshold(),
            completion_max_chars: default_completion_max_chars(),
            lexicon_path: None,
        }
    }
}

fn default_max_facts_per_item() -> usize {
    12
}
fn default_min_confidence() -> f64 {
    0.70
}
fn default_max_claims() -> usize {
    64
}
fn default_coverage_threshold() -> f64 {
    0.55
}
fn default_completion_max_chars() -> usize {
    24
}

impl ExtractConfig {
    pub fn normalizer(&self) -> NormalizerConfig {
        NormalizerConfig {
            coverage_threshold: self.coverage_threshold,
            completion_max_chars: self.completion_max_chars,
        }
    }

    /// The configured lexicon, or the built-in one.
    pub fn lexicon(&self) -> Result<Lexicon> {
        let Some(path) = &self.lexicon_path else {
            return Ok(Lexicon::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lexicon file: {}", path.display()))?;
        let table: LexiconTable =
            toml::from_str(&content).with_context(|| "Failed to parse lexicon file")?;
        Lexicon::from_table(&table)
            .with_context(|| format!("Invalid lexicon file: {}", path.display()))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenizerConfig {
    #[serde(default = "default_tokenizer_provider")]
    pub provider: String,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            provider: default_tokenizer_provider(),
        }
    }
}

fn default_tokenizer_provider() -> String {
    "disabled".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            max_input_chars: default_max_input_chars(),
            reasoning_effort: default_reasoning_effort(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    45
}
fn default_max_input_chars() -> usize {
    7000
}
fn default_reasoning_effort() -> String {
    "none".to_string()
}

impl LlmConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_retry_delay_secs() -> i64 {
    300
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate extraction
    if config.extract.max_facts_per_item == 0 {
        anyhow::bail!("extract.max_facts_per_item must be > 0");
    }
    if config.extract.max_claims == 0 {
        anyhow::bail!("extract.max_claims must be > 0");
    }
    if !(0.0..=1.0).contains(&config.extract.min_confidence) {
        anyhow::bail!("extract.min_confidence must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.extract.coverage_threshold) {
        anyhow::bail!("extract.coverage_threshold must be in [0.0, 1.0]");
    }

    // Validate model client
    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }
    if config.llm.max_input_chars == 0 {
        anyhow::bail!("llm.max_input_chars must be > 0");
    }
    if config.retry.delay_secs < 0 {
        anyhow::bail!("retry.delay_secs must be >= 0");
    }

    match config.tokenizer.provider.as_str() {
        "disabled" | "script" => {}
        other => anyhow::bail!(
            "Unknown tokenizer provider: '{}'. Must be disabled or script.",
            other
        ),
    }

    Ok(config)
}
