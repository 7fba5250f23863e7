use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub source: SourceConfig,
    pub blob: BlobConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Root of a mailbox export directory (`messages.json` + `attachments/`).
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    /// Directory that receives raw attachment payloads.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    /// Absolute cap applied in a second, stricter chunking pass.
    #[serde(default = "default_hard_cap")]
    pub hard_cap_tokens: usize,
}

fn default_max_tokens() -> usize {
    700
}
fn default_overlap() -> usize {
    80
}
fn default_hard_cap() -> usize {
    2000
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            hard_cap_tokens: default_hard_cap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// In-flight provider call cap; batches run in sequential groups of this size.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pause between sequential groups, to ease rate-limit pressure.
    #[serde(default = "default_group_pause_ms")]
    pub group_pause_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff when the provider gives no hint.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            concurrency: default_concurrency(),
            group_pause_ms: default_group_pause_ms(),
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_concurrency() -> usize {
    5
}
fn default_group_pause_ms() -> u64 {
    200
}
fn default_max_retries() -> u32 {
    5
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Messages processed concurrently per job.
    #[serde(default = "default_message_concurrency")]
    pub message_concurrency: usize,
    /// Attachments downloaded concurrently per message.
    #[serde(default = "default_attachment_concurrency")]
    pub attachment_concurrency: usize,
    /// Attempts for transient blob-store failures (1s/2s/4s backoff).
    #[serde(default = "default_blob_attempts")]
    pub blob_attempts: u32,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            message_concurrency: default_message_concurrency(),
            attachment_concurrency: default_attachment_concurrency(),
            blob_attempts: default_blob_attempts(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

fn default_message_concurrency() -> usize {
    10
}
fn default_attachment_concurrency() -> usize {
    5
}
fn default_blob_attempts() -> u32 {
    3
}
fn default_fetch_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Query-time similarity floor; lower than write-path defaults to favor recall.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// Multiplier on `top_k` to leave room for post-filtering.
    #[serde(default = "default_k_multiplier")]
    pub k_multiplier: i64,
    #[serde(default = "default_email_display")]
    pub email_display: usize,
    #[serde(default = "default_attachment_display")]
    pub attachment_display: usize,
    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: usize,
    /// Hard character budget per chunk quoted in the context block.
    #[serde(default = "default_chunk_char_budget")]
    pub chunk_char_budget: usize,
    /// Similarity gap under which the more recent document wins.
    #[serde(default = "default_recency_epsilon")]
    pub recency_epsilon: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            top_k: default_top_k(),
            k_multiplier: default_k_multiplier(),
            email_display: default_email_display(),
            attachment_display: default_attachment_display(),
            max_chunks_per_doc: default_max_chunks_per_doc(),
            chunk_char_budget: default_chunk_char_budget(),
            recency_epsilon: default_recency_epsilon(),
        }
    }
}

fn default_threshold() -> f64 {
    0.25
}
fn default_top_k() -> i64 {
    15
}
fn default_k_multiplier() -> i64 {
    3
}
fn default_email_display() -> usize {
    5
}
fn default_attachment_display() -> usize {
    3
}
fn default_max_chunks_per_doc() -> usize {
    3
}
fn default_chunk_char_budget() -> usize {
    600
}
fn default_recency_epsilon() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_timeout_secs() -> u64 {
    60
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    if config.chunking.hard_cap_tokens == 0 {
        anyhow::bail!("chunking.hard_cap_tokens must be > 0");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.k_multiplier < 1 {
        anyhow::bail!("retrieval.k_multiplier must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.threshold) {
        anyhow::bail!("retrieval.threshold must be in [0.0, 1.0]");
    }

    // Validate ingestion
    if config.ingestion.message_concurrency == 0 || config.ingestion.attachment_concurrency == 0 {
        anyhow::bail!("ingestion concurrency caps must be > 0");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.concurrency == 0 {
            anyhow::bail!("embedding.concurrency must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
